//! Community metadata store.
//!
//! Tracks every community the crawl has seen, its acquisition status and the
//! derived searchable text. Writes follow a read-then-diff discipline so a
//! duplicate or restarted run never inserts a name twice.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;

use super::diesel_models::{CommunityRecord, NewCommunity};
use super::pool::{DbError, DbPool};
use super::util::{
    now_rfc3339, parse_datetime, parse_datetime_opt, parse_name_list, to_diesel_error,
};
use super::MAX_BIND_PARAMS;
use crate::models::{
    normalize_name, AcquisitionStatus, Community, CommunityMetadata, EdgeKind,
    ModeratorRoleStatus,
};
use crate::schema::{communities, frontier_entries};
use crate::with_conn;

/// Outcome recorded for a community's one-time fetch.
#[derive(Debug, Clone, Copy)]
pub enum FetchRecord<'a> {
    Fetched(&'a CommunityMetadata),
    Unavailable { reason: &'a str },
}

/// Attribute key the rule list is stored under.
const RULES_KEY: &str = "rules";

/// Serialize the attribute bag, folding the rule list in under `rules`.
fn encode_attributes(metadata: &CommunityMetadata) -> Result<String, DbError> {
    let mut attributes = metadata.attributes.clone();
    attributes.insert(
        RULES_KEY.to_string(),
        serde_json::Value::Array(metadata.rules.clone()),
    );
    serde_json::to_string(&attributes).map_err(to_diesel_error)
}

/// Inverse of [`encode_attributes`].
fn decode_metadata(attributes: &str, moderators: Option<&str>) -> CommunityMetadata {
    let mut attributes: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(attributes).unwrap_or_default();
    let rules = match attributes.remove(RULES_KEY) {
        Some(serde_json::Value::Array(rules)) => rules,
        _ => Vec::new(),
    };
    CommunityMetadata {
        attributes,
        moderators: parse_name_list(moderators),
        rules,
    }
}

impl From<CommunityRecord> for Community {
    fn from(record: CommunityRecord) -> Self {
        let metadata = record
            .attributes
            .as_deref()
            .map(|attrs| decode_metadata(attrs, record.moderators.as_deref()));

        Community {
            name: record.name,
            status: AcquisitionStatus::from_str(&record.status)
                .unwrap_or(AcquisitionStatus::Unfetched),
            metadata,
            searchable_text: record.searchable_text,
            created_at: parse_datetime_opt(record.created_at.as_deref()),
            moderator_status: ModeratorRoleStatus::from_str(&record.moderator_status)
                .unwrap_or(ModeratorRoleStatus::NotFetched),
            fetch_attempts: record.fetch_attempts.max(0) as u32,
            last_error: record.last_error,
            discovered_at: parse_datetime(&record.discovered_at),
            fetched_at: parse_datetime_opt(record.fetched_at.as_deref()),
        }
    }
}

/// Diesel-backed community store.
#[derive(Clone)]
pub struct CommunityRepository {
    pool: DbPool,
}

impl CommunityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Track communities as `unfetched` unless already present.
    ///
    /// Returns the number of names newly inserted.
    pub async fn ensure_tracked(&self, names: &[String]) -> Result<usize, DbError> {
        let wanted: BTreeSet<String> = names.iter().map(|n| normalize_name(n)).collect();
        if wanted.is_empty() {
            return Ok(0);
        }

        let existing = self.existing_names(&wanted).await?;
        let missing: Vec<String> = wanted.difference(&existing).cloned().collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            conn.transaction::<_, DbError, _>(|conn| {
                Box::pin(async move {
                    let mut inserted = 0;
                    for name in &missing {
                        inserted += diesel::insert_or_ignore_into(communities::table)
                            .values(NewCommunity {
                                name,
                                status: AcquisitionStatus::Unfetched.as_str(),
                                moderator_status: ModeratorRoleStatus::NotFetched.as_str(),
                                fetch_attempts: 0,
                                discovered_at: &now,
                            })
                            .execute(conn)
                            .await?;
                    }
                    debug!("Tracked {} new communities", inserted);
                    Ok(inserted)
                })
            })
            .await
        })
    }

    /// Names from `candidates` that are already tracked.
    async fn existing_names(&self, candidates: &BTreeSet<String>) -> Result<BTreeSet<String>, DbError> {
        let candidates: Vec<&String> = candidates.iter().collect();
        let mut found = BTreeSet::new();
        with_conn!(self.pool, conn => {
            for chunk in candidates.chunks(MAX_BIND_PARAMS) {
                let names: Vec<String> = communities::table
                    .filter(communities::name.eq_any(chunk.iter().copied()))
                    .select(communities::name)
                    .load(&mut conn)
                    .await?;
                found.extend(names);
            }
        });
        Ok(found)
    }

    /// Get a community by name.
    pub async fn get(&self, name: &str) -> Result<Option<Community>, DbError> {
        let name = normalize_name(name);
        with_conn!(self.pool, conn => {
            communities::table
                .find(&name)
                .select(CommunityRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
                .map(|record| record.map(Community::from))
        })
    }

    /// Acquisition status, or `None` if the community is not tracked.
    pub async fn get_status(&self, name: &str) -> Result<Option<AcquisitionStatus>, DbError> {
        let name = normalize_name(name);
        let status: Option<String> = with_conn!(self.pool, conn => {
            communities::table
                .find(&name)
                .select(communities::status)
                .first(&mut conn)
                .await
                .optional()?
        });
        Ok(status.and_then(|s| AcquisitionStatus::from_str(&s)))
    }

    /// Apply the one-time transition out of `unfetched`.
    ///
    /// Returns `false` when the community was not `unfetched` (already
    /// resolved by an earlier or concurrent run), in which case nothing changes.
    pub async fn record_fetch_result(
        &self,
        name: &str,
        result: FetchRecord<'_>,
    ) -> Result<bool, DbError> {
        let name = normalize_name(name);
        let now = now_rfc3339();
        let pending = communities::table
            .filter(communities::name.eq(&name))
            .filter(communities::status.eq(AcquisitionStatus::Unfetched.as_str()));

        match result {
            FetchRecord::Fetched(metadata) => {
                let attributes = encode_attributes(metadata)?;
                let moderators: Vec<String> =
                    metadata.moderators.iter().map(|m| m.to_lowercase()).collect();
                let moderators = serde_json::to_string(&moderators).map_err(to_diesel_error)?;
                let created_at = metadata.created_at().map(|dt| dt.to_rfc3339());
                let text = metadata.searchable_text();

                with_conn!(self.pool, conn => {
                    let updated = diesel::update(pending)
                        .set((
                            communities::status.eq(AcquisitionStatus::Fetched.as_str()),
                            communities::attributes.eq(Some(attributes)),
                            communities::moderators.eq(Some(moderators)),
                            communities::created_at.eq(created_at),
                            communities::last_error.eq(None::<String>),
                            communities::fetched_at.eq(Some(now.clone())),
                        ))
                        .execute(&mut conn)
                        .await?;

                    if updated > 0 {
                        diesel::update(
                            communities::table
                                .filter(communities::name.eq(&name))
                                .filter(communities::searchable_text.is_null()),
                        )
                        .set(communities::searchable_text.eq(Some(text)))
                        .execute(&mut conn)
                        .await?;
                    }
                    Ok(updated > 0)
                })
            }
            FetchRecord::Unavailable { reason } => with_conn!(self.pool, conn => {
                diesel::update(pending)
                    .set((
                        communities::status.eq(AcquisitionStatus::Unavailable.as_str()),
                        communities::last_error.eq(Some(reason)),
                        communities::fetched_at.eq(Some(now.clone())),
                    ))
                    .execute(&mut conn)
                    .await
                    .map(|updated| updated > 0)
            }),
        }
    }

    /// Count a transient fetch failure against the retry budget.
    ///
    /// The community stays `unfetched` until `budget` attempts have failed,
    /// then collapses to `unavailable`. Returns the resulting status. A
    /// community that already left `unfetched` is not counted against and
    /// keeps its stored status; an untracked one is `NotFound`.
    pub async fn record_transient_failure(
        &self,
        name: &str,
        error: &str,
        budget: u32,
    ) -> Result<AcquisitionStatus, DbError> {
        let name = normalize_name(name);
        let attempts: Option<i32> = with_conn!(self.pool, conn => {
            let updated = diesel::update(
                communities::table
                    .filter(communities::name.eq(&name))
                    .filter(communities::status.eq(AcquisitionStatus::Unfetched.as_str())),
            )
            .set((
                communities::fetch_attempts.eq(communities::fetch_attempts + 1),
                communities::last_error.eq(Some(error)),
            ))
            .execute(&mut conn)
            .await?;

            if updated == 0 {
                None
            } else {
                Some(
                    communities::table
                        .find(&name)
                        .select(communities::fetch_attempts)
                        .first(&mut conn)
                        .await?,
                )
            }
        });

        let Some(attempts) = attempts else {
            debug!("Transient failure for settled or untracked community {}", name);
            return self.get_status(&name).await?.ok_or(DbError::NotFound);
        };

        if attempts.max(0) as u32 >= budget.max(1) {
            self.record_fetch_result(
                &name,
                FetchRecord::Unavailable {
                    reason: &format!("retry budget exhausted: {}", error),
                },
            )
            .await?;
            return Ok(AcquisitionStatus::Unavailable);
        }
        Ok(AcquisitionStatus::Unfetched)
    }

    /// Fill in searchable text for fetched communities that lack it.
    ///
    /// Idempotent: rows that already carry text are never touched.
    pub async fn backfill_searchable_text(&self) -> Result<usize, DbError> {
        let rows: Vec<(String, Option<String>, Option<String>)> = with_conn!(self.pool, conn => {
            communities::table
                .filter(communities::status.eq(AcquisitionStatus::Fetched.as_str()))
                .filter(communities::searchable_text.is_null())
                .select((communities::name, communities::attributes, communities::moderators))
                .load(&mut conn)
                .await?
        });

        let mut filled = 0;
        for (name, attributes, moderators) in rows {
            let text = decode_metadata(attributes.as_deref().unwrap_or("{}"), moderators.as_deref())
                .searchable_text();
            filled += with_conn!(self.pool, conn => {
                diesel::update(
                    communities::table
                        .filter(communities::name.eq(&name))
                        .filter(communities::searchable_text.is_null()),
                )
                .set(communities::searchable_text.eq(Some(text)))
                .execute(&mut conn)
                .await?
            });
        }
        Ok(filled)
    }

    /// Searchable text of a successfully fetched community.
    ///
    /// Fails with `NotFound` when the community was never fetched.
    pub async fn get_searchable_text(&self, name: &str) -> Result<String, DbError> {
        let name = normalize_name(name);
        let text: Option<String> = with_conn!(self.pool, conn => {
            communities::table
                .filter(communities::name.eq(&name))
                .filter(communities::status.eq(AcquisitionStatus::Fetched.as_str()))
                .select(communities::searchable_text)
                .first(&mut conn)
                .await?
        });
        Ok(text.unwrap_or_default())
    }

    /// Unfetched communities that currently sit in the given frontier.
    pub async fn unfetched_in_frontier(&self, frontier: EdgeKind) -> Result<Vec<String>, DbError> {
        with_conn!(self.pool, conn => {
            communities::table
                .filter(communities::status.eq(AcquisitionStatus::Unfetched.as_str()))
                .filter(
                    communities::name.eq_any(
                        frontier_entries::table
                            .filter(frontier_entries::frontier.eq(frontier.as_str()))
                            .select(frontier_entries::name),
                    ),
                )
                .select(communities::name)
                .order(communities::name.asc())
                .load(&mut conn)
                .await
        })
    }

    /// Record whether the community's moderators have had their roles pulled.
    pub async fn set_moderator_status(
        &self,
        name: &str,
        status: ModeratorRoleStatus,
    ) -> Result<(), DbError> {
        let name = normalize_name(name);
        with_conn!(self.pool, conn => {
            diesel::update(communities::table.find(&name))
                .set(communities::moderator_status.eq(status.as_str()))
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    /// Count communities by acquisition status.
    pub async fn count_by_status(&self) -> Result<HashMap<String, u64>, DbError> {
        let rows: Vec<(String, i64)> = with_conn!(self.pool, conn => {
            communities::table
                .group_by(communities::status)
                .select((communities::status, diesel::dsl::count_star()))
                .load(&mut conn)
                .await?
        });
        Ok(rows
            .into_iter()
            .map(|(status, count)| (status, count.max(0) as u64))
            .collect())
    }
}
