//! Frontier queue operations.
//!
//! One queue per edge kind, stored in `frontier_entries` and keyed by
//! `(frontier, name)`. Entries move `pending -> done | failed` exactly once.

use std::collections::BTreeSet;

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::diesel_models::{FrontierEntryRecord, NewFrontierEntry};
use super::pool::{DbError, DbPool};
use super::util::{now_rfc3339, parse_datetime, parse_datetime_opt};
use super::MAX_BIND_PARAMS;
use crate::models::{
    normalize_name, AcquisitionStatus, EdgeKind, FrontierCounts, FrontierEntry, ProcessedState,
};
use crate::schema::{communities, frontier_entries};
use crate::with_conn;

impl From<FrontierEntryRecord> for FrontierEntry {
    fn from(record: FrontierEntryRecord) -> Self {
        FrontierEntry {
            frontier: EdgeKind::from_str(&record.frontier).unwrap_or(EdgeKind::Hyperlink),
            name: record.name,
            processed: ProcessedState::from_str(&record.processed)
                .unwrap_or(ProcessedState::Pending),
            depth: record.depth.max(0) as u32,
            discovered_at: parse_datetime(&record.discovered_at),
            completed_at: parse_datetime_opt(record.completed_at.as_deref()),
        }
    }
}

/// Queue of communities awaiting expansion along one edge kind.
#[derive(Clone)]
pub struct FrontierRepository {
    pool: DbPool,
    kind: EdgeKind,
}

impl FrontierRepository {
    pub fn new(pool: DbPool, kind: EdgeKind) -> Self {
        Self { pool, kind }
    }

    /// Number of entries still `pending`.
    pub async fn count_pending(&self) -> Result<u64, DbError> {
        let count: i64 = with_conn!(self.pool, conn => {
            frontier_entries::table
                .filter(frontier_entries::frontier.eq(self.kind.as_str()))
                .filter(frontier_entries::processed.eq(ProcessedState::Pending.as_str()))
                .count()
                .get_result(&mut conn)
                .await?
        });
        Ok(count.max(0) as u64)
    }

    /// All pending entries as `(name, depth)`, ordered by depth then name.
    ///
    /// Reading does not change state; entries stay pending until marked.
    pub async fn pop_all_pending(&self) -> Result<Vec<(String, u32)>, DbError> {
        let rows: Vec<(String, i32)> = with_conn!(self.pool, conn => {
            frontier_entries::table
                .filter(frontier_entries::frontier.eq(self.kind.as_str()))
                .filter(frontier_entries::processed.eq(ProcessedState::Pending.as_str()))
                .order((frontier_entries::depth.asc(), frontier_entries::name.asc()))
                .select((frontier_entries::name, frontier_entries::depth))
                .load(&mut conn)
                .await?
        });
        Ok(rows
            .into_iter()
            .map(|(name, depth)| (name, depth.max(0) as u32))
            .collect())
    }

    /// Enqueue names at `depth` unless already members of this frontier.
    ///
    /// Existing entries keep their depth and state. Returns the number of
    /// entries inserted.
    pub async fn enqueue(&self, names: &[String], depth: u32) -> Result<usize, DbError> {
        let wanted: BTreeSet<String> = names.iter().map(|n| normalize_name(n)).collect();
        if wanted.is_empty() {
            return Ok(0);
        }

        let members = self.members_among(&wanted).await?;
        let missing: Vec<String> = wanted.difference(&members).cloned().collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let frontier = self.kind.as_str();
        let depth = depth as i32;
        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            conn.transaction::<_, DbError, _>(|conn| {
                Box::pin(async move {
                    let mut inserted = 0;
                    for name in &missing {
                        inserted += diesel::insert_or_ignore_into(frontier_entries::table)
                            .values(NewFrontierEntry {
                                frontier,
                                name,
                                processed: ProcessedState::Pending.as_str(),
                                depth,
                                discovered_at: &now,
                            })
                            .execute(conn)
                            .await?;
                    }
                    Ok(inserted)
                })
            })
            .await
        })
    }

    /// Names from `candidates` already present in this frontier.
    async fn members_among(&self, candidates: &BTreeSet<String>) -> Result<BTreeSet<String>, DbError> {
        let candidates: Vec<&String> = candidates.iter().collect();
        let mut found = BTreeSet::new();
        with_conn!(self.pool, conn => {
            for chunk in candidates.chunks(MAX_BIND_PARAMS) {
                let names: Vec<String> = frontier_entries::table
                    .filter(frontier_entries::frontier.eq(self.kind.as_str()))
                    .filter(frontier_entries::name.eq_any(chunk.iter().copied()))
                    .select(frontier_entries::name)
                    .load(&mut conn)
                    .await?;
                found.extend(names);
            }
        });
        Ok(found)
    }

    /// Mark pending entries done in one batch.
    pub async fn mark_done(&self, names: &[String]) -> Result<usize, DbError> {
        self.finish(names, ProcessedState::Done).await
    }

    /// Mark a pending entry failed.
    pub async fn mark_failed(&self, name: &str) -> Result<bool, DbError> {
        let updated = self
            .finish(&[normalize_name(name)], ProcessedState::Failed)
            .await?;
        Ok(updated > 0)
    }

    async fn finish(&self, names: &[String], state: ProcessedState) -> Result<usize, DbError> {
        if names.is_empty() {
            return Ok(0);
        }
        let now = now_rfc3339();
        let mut updated = 0;
        with_conn!(self.pool, conn => {
            for chunk in names.chunks(MAX_BIND_PARAMS) {
                updated += diesel::update(
                    frontier_entries::table
                        .filter(frontier_entries::frontier.eq(self.kind.as_str()))
                        .filter(frontier_entries::processed.eq(ProcessedState::Pending.as_str()))
                        .filter(frontier_entries::name.eq_any(chunk)),
                )
                .set((
                    frontier_entries::processed.eq(state.as_str()),
                    frontier_entries::completed_at.eq(Some(now.clone())),
                ))
                .execute(&mut conn)
                .await?;
            }
        });
        Ok(updated)
    }

    /// Fail every pending entry whose community can never yield metadata.
    pub async fn mark_failed_if_source_unavailable(&self) -> Result<usize, DbError> {
        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            diesel::update(
                frontier_entries::table
                    .filter(frontier_entries::frontier.eq(self.kind.as_str()))
                    .filter(frontier_entries::processed.eq(ProcessedState::Pending.as_str()))
                    .filter(
                        frontier_entries::name.eq_any(
                            communities::table
                                .filter(communities::status.eq(AcquisitionStatus::Unavailable.as_str()))
                                .select(communities::name),
                        ),
                    ),
            )
            .set((
                frontier_entries::processed.eq(ProcessedState::Failed.as_str()),
                frontier_entries::completed_at.eq(Some(now)),
            ))
            .execute(&mut conn)
            .await
        })
    }

    /// Get one entry.
    pub async fn get(&self, name: &str) -> Result<Option<FrontierEntry>, DbError> {
        let name = normalize_name(name);
        with_conn!(self.pool, conn => {
            frontier_entries::table
                .find((self.kind.as_str(), &name))
                .select(FrontierEntryRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
                .map(|record| record.map(FrontierEntry::from))
        })
    }

    /// Every entry, ordered like the processing order.
    pub async fn entries(&self) -> Result<Vec<FrontierEntry>, DbError> {
        with_conn!(self.pool, conn => {
            frontier_entries::table
                .filter(frontier_entries::frontier.eq(self.kind.as_str()))
                .order((frontier_entries::depth.asc(), frontier_entries::name.asc()))
                .select(FrontierEntryRecord::as_select())
                .load(&mut conn)
                .await
                .map(|records| records.into_iter().map(FrontierEntry::from).collect())
        })
    }

    /// Entry counts by processed state.
    pub async fn counts(&self) -> Result<FrontierCounts, DbError> {
        let rows: Vec<(String, i64)> = with_conn!(self.pool, conn => {
            frontier_entries::table
                .filter(frontier_entries::frontier.eq(self.kind.as_str()))
                .group_by(frontier_entries::processed)
                .select((frontier_entries::processed, diesel::dsl::count_star()))
                .load(&mut conn)
                .await?
        });

        let mut counts = FrontierCounts::default();
        for (state, count) in rows {
            let count = count.max(0) as u64;
            match ProcessedState::from_str(&state) {
                Some(ProcessedState::Pending) => counts.pending += count,
                Some(ProcessedState::Done) => counts.done += count,
                Some(ProcessedState::Failed) => counts.failed += count,
                None => {}
            }
        }
        Ok(counts)
    }
}
