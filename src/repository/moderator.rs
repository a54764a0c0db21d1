//! Moderator account store.

use std::collections::{BTreeSet, HashMap};

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;

use super::diesel_models::{ModeratorAccountRecord, NewModeratorAccount};
use super::pool::{DbError, DbPool};
use super::util::{now_rfc3339, parse_datetime, parse_datetime_opt, parse_name_list, to_diesel_error};
use super::MAX_BIND_PARAMS;
use crate::models::{normalize_name, AccountStatus, ModeratorAccount};
use crate::schema::moderator_accounts;
use crate::with_conn;

impl From<ModeratorAccountRecord> for ModeratorAccount {
    fn from(record: ModeratorAccountRecord) -> Self {
        ModeratorAccount {
            username: record.username,
            status: AccountStatus::from_str(&record.status).unwrap_or(AccountStatus::NotFetched),
            communities: parse_name_list(record.communities.as_deref()),
            skip: record.skip != 0,
            discovered_at: parse_datetime(&record.discovered_at),
            fetched_at: parse_datetime_opt(record.fetched_at.as_deref()),
        }
    }
}

/// Diesel-backed moderator account store.
#[derive(Clone)]
pub struct ModeratorRepository {
    pool: DbPool,
}

impl ModeratorRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Track accounts as `not_fetched` unless already present.
    ///
    /// Accounts named in `skip_list` are flagged so they never contribute
    /// shared-moderator edges; the flag of already-tracked accounts is
    /// brought in line with the current list. Returns the number newly
    /// inserted.
    pub async fn ensure_tracked(
        &self,
        usernames: &[String],
        skip_list: &[String],
    ) -> Result<usize, DbError> {
        let wanted: BTreeSet<String> = usernames
            .iter()
            .map(|u| u.trim().to_lowercase())
            .filter(|u| !u.is_empty())
            .collect();
        if wanted.is_empty() {
            return Ok(0);
        }

        let skip: BTreeSet<String> = skip_list.iter().map(|s| s.to_lowercase()).collect();
        let existing = self.existing_usernames(&wanted).await?;
        let missing: Vec<String> = wanted.difference(&existing).cloned().collect();
        let (skipped, kept): (Vec<String>, Vec<String>) =
            existing.into_iter().partition(|u| skip.contains(u));

        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            conn.transaction::<_, DbError, _>(|conn| {
                Box::pin(async move {
                    let mut inserted = 0;
                    for username in &missing {
                        inserted += diesel::insert_or_ignore_into(moderator_accounts::table)
                            .values(NewModeratorAccount {
                                username,
                                status: AccountStatus::NotFetched.as_str(),
                                skip: i32::from(skip.contains(username)),
                                fetch_attempts: 0,
                                discovered_at: &now,
                            })
                            .execute(conn)
                            .await?;
                    }

                    for (flag, names) in [(1, &skipped), (0, &kept)] {
                        for chunk in names.chunks(MAX_BIND_PARAMS) {
                            let changed = diesel::update(
                                moderator_accounts::table
                                    .filter(moderator_accounts::username.eq_any(chunk.iter()))
                                    .filter(moderator_accounts::skip.ne(flag)),
                            )
                            .set(moderator_accounts::skip.eq(flag))
                            .execute(conn)
                            .await?;
                            if changed > 0 {
                                debug!("Set skip={} on {} tracked accounts", flag, changed);
                            }
                        }
                    }
                    Ok(inserted)
                })
            })
            .await
        })
    }

    async fn existing_usernames(&self, candidates: &BTreeSet<String>) -> Result<BTreeSet<String>, DbError> {
        let candidates: Vec<&String> = candidates.iter().collect();
        let mut found = BTreeSet::new();
        with_conn!(self.pool, conn => {
            for chunk in candidates.chunks(MAX_BIND_PARAMS) {
                let names: Vec<String> = moderator_accounts::table
                    .filter(moderator_accounts::username.eq_any(chunk.iter().copied()))
                    .select(moderator_accounts::username)
                    .load(&mut conn)
                    .await?;
                found.extend(names);
            }
        });
        Ok(found)
    }

    pub async fn get(&self, username: &str) -> Result<Option<ModeratorAccount>, DbError> {
        let username = username.trim().to_lowercase();
        with_conn!(self.pool, conn => {
            moderator_accounts::table
                .find(&username)
                .select(ModeratorAccountRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
                .map(|record| record.map(ModeratorAccount::from))
        })
    }

    /// Load the given accounts, skipping usernames that are not tracked.
    pub async fn get_many(&self, usernames: &[String]) -> Result<Vec<ModeratorAccount>, DbError> {
        let wanted: Vec<String> = usernames
            .iter()
            .map(|u| u.trim().to_lowercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut accounts = Vec::with_capacity(wanted.len());
        with_conn!(self.pool, conn => {
            for chunk in wanted.chunks(MAX_BIND_PARAMS) {
                let records: Vec<ModeratorAccountRecord> = moderator_accounts::table
                    .filter(moderator_accounts::username.eq_any(chunk))
                    .order(moderator_accounts::username.asc())
                    .select(ModeratorAccountRecord::as_select())
                    .load(&mut conn)
                    .await?;
                accounts.extend(records.into_iter().map(ModeratorAccount::from));
            }
        });
        Ok(accounts)
    }

    /// Record the communities an account moderates. One-time transition.
    pub async fn record_roles(&self, username: &str, communities: &[String]) -> Result<bool, DbError> {
        let username = username.trim().to_lowercase();
        let communities: BTreeSet<String> = communities.iter().map(|c| normalize_name(c)).collect();
        let communities = serde_json::to_string(&communities).map_err(to_diesel_error)?;
        let now = now_rfc3339();

        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                moderator_accounts::table
                    .filter(moderator_accounts::username.eq(&username))
                    .filter(moderator_accounts::status.eq(AccountStatus::NotFetched.as_str())),
            )
            .set((
                moderator_accounts::status.eq(AccountStatus::Fetched.as_str()),
                moderator_accounts::communities.eq(Some(communities)),
                moderator_accounts::fetched_at.eq(Some(now)),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Record that an account's roles cannot be read. One-time transition.
    pub async fn record_unavailable(&self, username: &str, attempts: u32) -> Result<bool, DbError> {
        let username = username.trim().to_lowercase();
        let now = now_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                moderator_accounts::table
                    .filter(moderator_accounts::username.eq(&username))
                    .filter(moderator_accounts::status.eq(AccountStatus::NotFetched.as_str())),
            )
            .set((
                moderator_accounts::status.eq(AccountStatus::Unavailable.as_str()),
                moderator_accounts::fetch_attempts.eq(attempts as i32),
                moderator_accounts::fetched_at.eq(Some(now)),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Count accounts by status.
    pub async fn count_by_status(&self) -> Result<HashMap<String, u64>, DbError> {
        let rows: Vec<(String, i64)> = with_conn!(self.pool, conn => {
            moderator_accounts::table
                .group_by(moderator_accounts::status)
                .select((moderator_accounts::status, diesel::dsl::count_star()))
                .load(&mut conn)
                .await?
        });
        Ok(rows
            .into_iter()
            .map(|(status, count)| (status, count.max(0) as u64))
            .collect())
    }
}
