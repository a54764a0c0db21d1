//! Moderator account models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role acquisition status for a moderator account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    NotFetched,
    Fetched,
    Unavailable,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFetched => "not_fetched",
            Self::Fetched => "fetched",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_fetched" => Some(Self::NotFetched),
            "fetched" => Some(Self::Fetched),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }
}

/// A moderator account and the communities it moderates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratorAccount {
    pub username: String,
    pub status: AccountStatus,
    /// Normalized community names; empty unless `Fetched`.
    pub communities: Vec<String>,
    /// Excluded from shared-moderator extraction (bots and the like).
    pub skip: bool,
    pub discovered_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ModeratorAccount {
    /// Whether this account contributes shared-moderator edges.
    pub fn contributes_edges(&self) -> bool {
        self.status == AccountStatus::Fetched && !self.skip
    }
}
