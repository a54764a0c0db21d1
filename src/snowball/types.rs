//! Driver configuration, events and statistics.

use std::time::Duration;

use crate::models::EdgeKind;

/// Tuning for one driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Transient failures tolerated per community or account before it
    /// is recorded unavailable.
    pub retry_budget: u32,
    /// Moderator accounts that never contribute shared-moderator edges.
    pub skip_moderators: Vec<String>,
    pub pacing_every: u32,
    pub pacing_pause: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            skip_moderators: vec!["automoderator".to_string()],
            pacing_every: 60,
            pacing_pause: Duration::from_secs(60),
        }
    }
}

/// Events emitted while a driver runs.
#[derive(Debug, Clone)]
pub enum SnowballEvent {
    SweepStarted {
        kind: EdgeKind,
        sweep: u32,
        pending: u64,
    },
    /// One metadata fetch finished.
    Fetched { name: String, outcome: String },
    /// One frontier entry was expanded.
    Expanded {
        name: String,
        depth: u32,
        edges: usize,
    },
    SweepFinished(SweepStats),
}

/// Counts for one metadata-then-snowball sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub kind: Option<EdgeKind>,
    pub sweep: u32,
    /// Communities fetched successfully.
    pub fetched: usize,
    /// Communities recorded unavailable.
    pub unavailable: usize,
    /// Communities left unfetched after a transient failure.
    pub retrying: usize,
    pub backfilled: usize,
    pub roles_fetched: usize,
    pub roles_unavailable: usize,
    /// Entries marked done.
    pub processed: usize,
    /// Entries marked failed.
    pub failed: usize,
    /// Entries left pending because their community is still unfetched.
    pub deferred: usize,
    pub edges: usize,
    /// Communities seen for the first time.
    pub discovered: usize,
    pub enqueued: usize,
    pub interrupted: bool,
}

impl SweepStats {
    /// Whether the sweep changed any persisted state.
    pub fn made_progress(&self) -> bool {
        self.fetched
            + self.unavailable
            + self.retrying
            + self.roles_fetched
            + self.roles_unavailable
            + self.processed
            + self.failed
            + self.enqueued
            + self.discovered
            > 0
    }
}

/// Totals for a whole driver run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub kind: Option<EdgeKind>,
    pub sweeps: u32,
    pub fetched: usize,
    pub unavailable: usize,
    pub processed: usize,
    pub failed: usize,
    pub edges: usize,
    pub discovered: usize,
    /// Pending entries left when the run ended.
    pub pending: u64,
    pub interrupted: bool,
    /// The run stopped because a sweep changed nothing.
    pub stalled: bool,
}

impl RunSummary {
    pub fn new(kind: EdgeKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn absorb(&mut self, stats: &SweepStats) {
        self.sweeps += 1;
        self.fetched += stats.fetched;
        self.unavailable += stats.unavailable;
        self.processed += stats.processed;
        self.failed += stats.failed;
        self.edges += stats.edges;
        self.discovered += stats.discovered;
        self.interrupted |= stats.interrupted;
    }
}
