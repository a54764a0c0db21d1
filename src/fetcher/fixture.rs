//! Offline fetcher backed by a JSON fixture.
//!
//! ```json
//! {
//!   "communities": {
//!     "alpha": { "attributes": { "description": "see r/beta" }, "moderators": ["m1"] }
//!   },
//!   "forbidden": ["private_club"],
//!   "unauthorized": ["members_only"],
//!   "flaky": { "beta": 1 },
//!   "moderators": { "m1": ["alpha", "gamma"] }
//! }
//! ```
//!
//! Communities absent from the fixture are `NotFound`; accounts absent from
//! `moderators` are `Unavailable`. A `flaky` entry fails transiently that
//! many times before answering normally. Names in `unauthorized` (community
//! or account) answer as if the credentials had been refused.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{FetchOutcome, MetadataFetcher, ModeratorRoleFetcher, RoleOutcome};
use crate::models::{normalize_name, CommunityMetadata};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid fixture {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fixture contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub communities: BTreeMap<String, CommunityMetadata>,
    #[serde(default)]
    pub forbidden: BTreeSet<String>,
    #[serde(default)]
    pub unauthorized: BTreeSet<String>,
    #[serde(default)]
    pub flaky: BTreeMap<String, u32>,
    #[serde(default)]
    pub moderators: BTreeMap<String, Vec<String>>,
}

impl Fixture {
    /// Key every table by its normalized name.
    fn normalized(self) -> Self {
        Self {
            communities: self
                .communities
                .into_iter()
                .map(|(k, v)| (normalize_name(&k), v))
                .collect(),
            forbidden: self.forbidden.iter().map(|k| normalize_name(k)).collect(),
            unauthorized: self.unauthorized.iter().map(|k| normalize_name(k)).collect(),
            flaky: self
                .flaky
                .into_iter()
                .map(|(k, v)| (normalize_name(&k), v))
                .collect(),
            moderators: self
                .moderators
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }
}

/// Fetcher that answers from a [`Fixture`] and counts every call.
#[derive(Debug, Default)]
pub struct FixtureFetcher {
    fixture: Fixture,
    calls: Mutex<HashMap<String, u32>>,
    role_calls: Mutex<HashMap<String, u32>>,
}

impl FixtureFetcher {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture: fixture.normalized(),
            calls: Mutex::new(HashMap::new()),
            role_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, FixtureError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
            path: display.clone(),
            source,
        })?;
        let fixture: Fixture = serde_json::from_str(&content).map_err(|source| {
            FixtureError::Parse {
                path: display,
                source,
            }
        })?;
        Ok(Self::new(fixture))
    }

    /// Metadata fetches made for one community.
    pub fn calls_for(&self, name: &str) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.get(&normalize_name(name)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Metadata fetches made in total.
    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    /// Role fetches made for one account.
    pub fn role_calls_for(&self, username: &str) -> u32 {
        self.role_calls
            .lock()
            .map(|calls| calls.get(&username.to_lowercase()).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_call(counter: &Mutex<HashMap<String, u32>>, key: &str) -> u32 {
        match counter.lock() {
            Ok(mut calls) => {
                let count = calls.entry(key.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl MetadataFetcher for FixtureFetcher {
    async fn fetch(&self, name: &str) -> FetchOutcome {
        let name = normalize_name(name);
        let call = Self::record_call(&self.calls, &name);

        if let Some(failures) = self.fixture.flaky.get(&name) {
            if call <= *failures {
                return FetchOutcome::TransientError(format!("simulated failure {} for {}", call, name));
            }
        }
        if self.fixture.unauthorized.contains(&name) {
            return FetchOutcome::Unauthorized(format!("simulated 401 for {}", name));
        }
        if self.fixture.forbidden.contains(&name) {
            return FetchOutcome::Forbidden;
        }
        match self.fixture.communities.get(&name) {
            Some(metadata) => FetchOutcome::Success(metadata.clone()),
            None => FetchOutcome::NotFound,
        }
    }
}

#[async_trait]
impl ModeratorRoleFetcher for FixtureFetcher {
    async fn fetch_roles(&self, username: &str) -> RoleOutcome {
        let username = username.to_lowercase();
        Self::record_call(&self.role_calls, &username);
        if self.fixture.unauthorized.contains(&username) {
            return RoleOutcome::Unauthorized(format!("simulated 401 for {}", username));
        }
        match self.fixture.moderators.get(&username) {
            Some(communities) => RoleOutcome::Success(communities.clone()),
            None => RoleOutcome::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture_json() -> &'static str {
        r#"{
            "communities": {
                "Alpha": { "attributes": { "description": "see r/beta" }, "moderators": ["m1"] }
            },
            "forbidden": ["secret"],
            "flaky": { "alpha": 1 },
            "moderators": { "M1": ["alpha", "gamma"] }
        }"#
    }

    #[tokio::test]
    async fn test_fixture_outcomes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(fixture_json().as_bytes()).unwrap();
        let fetcher = FixtureFetcher::from_path(file.path()).unwrap();

        assert!(matches!(fetcher.fetch("alpha").await, FetchOutcome::TransientError(_)));
        match fetcher.fetch("r/alpha").await {
            FetchOutcome::Success(metadata) => assert_eq!(metadata.moderators, vec!["m1"]),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fetcher.fetch("secret").await, FetchOutcome::Forbidden);
        assert_eq!(fetcher.fetch("nobody").await, FetchOutcome::NotFound);
        assert_eq!(fetcher.calls_for("alpha"), 2);
        assert_eq!(fetcher.total_calls(), 4);

        assert_eq!(
            fetcher.fetch_roles("m1").await,
            RoleOutcome::Success(vec!["alpha".to_string(), "gamma".to_string()])
        );
        assert_eq!(fetcher.fetch_roles("m2").await, RoleOutcome::Unavailable);
        assert_eq!(fetcher.role_calls_for("M1"), 1);
    }

    #[test]
    fn test_invalid_fixture_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            FixtureFetcher::from_path(file.path()),
            Err(FixtureError::Parse { .. })
        ));
    }
}
