//! Frontier models: per-edge-kind processing queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The relationship a frontier traces. Each kind owns one frontier and one
/// logical edge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// `reddit.com/r/name` links in community text.
    Hyperlink,
    /// Informal `r/name` mentions in community text.
    Reference,
    /// Communities sharing a moderator account.
    Moderator,
}

impl EdgeKind {
    /// All kinds, in the order a full crawl runs them.
    pub const ALL: [EdgeKind; 3] = [EdgeKind::Hyperlink, EdgeKind::Reference, EdgeKind::Moderator];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hyperlink => "hyperlink",
            Self::Reference => "reference",
            Self::Moderator => "moderator",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hyperlink" => Some(Self::Hyperlink),
            "reference" => Some(Self::Reference),
            "moderator" => Some(Self::Moderator),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of a frontier entry. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessedState {
    Pending,
    Done,
    Failed,
}

impl ProcessedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A community waiting in (or finished with) a frontier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub frontier: EdgeKind,
    pub name: String,
    pub processed: ProcessedState,
    /// Snowball step at which the community was discovered (seeds are 0).
    pub depth: u32,
    pub discovered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Frontier counts by processed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierCounts {
    pub pending: u64,
    pub done: u64,
    pub failed: u64,
}

impl FrontierCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.done + self.failed
    }
}
