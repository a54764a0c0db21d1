//! Snowball driver: the crawl state machine for one frontier.
//!
//! Each sweep runs a metadata phase (fetch every unfetched community in the
//! frontier) and a snowball phase (expand every pending entry whose
//! community has metadata). Sweeps repeat until the frontier has nothing
//! pending. All state lives in the store, so a run can stop between any two
//! entries and resume later from disk.

mod error;
mod pacing;
mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::extract::ExtractionPolicy;
use crate::fetcher::{FetchOutcome, MetadataFetcher, ModeratorRoleFetcher, RoleOutcome};
use crate::models::{
    normalize_name, AccountStatus, AcquisitionStatus, Edge, EdgeKind, ModeratorRoleStatus,
};
use crate::repository::{
    CommunityRepository, DbPool, EdgeRepository, FetchRecord, FrontierRepository,
    ModeratorRepository,
};

pub use error::SnowballError;
pub use pacing::Pacer;
pub use types::{DriverConfig, RunSummary, SnowballEvent, SweepStats};

/// Drives one frontier to exhaustion.
pub struct SnowballDriver {
    kind: EdgeKind,
    store: CommunityRepository,
    frontier: FrontierRepository,
    edges: EdgeRepository,
    moderators: ModeratorRepository,
    fetcher: Arc<dyn MetadataFetcher>,
    role_fetcher: Option<Arc<dyn ModeratorRoleFetcher>>,
    policy: ExtractionPolicy,
    config: DriverConfig,
    pacer: Pacer,
    events: Option<mpsc::Sender<SnowballEvent>>,
}

impl SnowballDriver {
    pub fn new(
        pool: DbPool,
        kind: EdgeKind,
        fetcher: Arc<dyn MetadataFetcher>,
        policy: ExtractionPolicy,
        config: DriverConfig,
    ) -> Self {
        let pacer = Pacer::new(config.pacing_every, config.pacing_pause);
        Self {
            kind,
            store: CommunityRepository::new(pool.clone()),
            frontier: FrontierRepository::new(pool.clone(), kind),
            edges: EdgeRepository::new(pool.clone(), kind),
            moderators: ModeratorRepository::new(pool),
            fetcher,
            role_fetcher: None,
            policy,
            config,
            pacer,
            events: None,
        }
    }

    /// Set the collaborator used to pull moderator roles.
    pub fn with_role_fetcher(mut self, fetcher: Arc<dyn ModeratorRoleFetcher>) -> Self {
        self.role_fetcher = Some(fetcher);
        self
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<SnowballEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn frontier(&self) -> &FrontierRepository {
        &self.frontier
    }

    /// Admit seed communities at depth 0.
    ///
    /// Returns the number of entries added to the frontier.
    pub async fn seed(&self, names: &[String]) -> Result<usize, SnowballError> {
        let names: Vec<String> = names
            .iter()
            .map(|n| normalize_name(n))
            .filter(|n| !n.is_empty())
            .collect();
        self.store.ensure_tracked(&names).await?;
        let added = self.frontier.enqueue(&names, 0).await?;
        info!("Seeded {} of {} communities into {}", added, names.len(), self.kind);
        Ok(added)
    }

    /// Run until nothing is pending or no more progress is possible.
    pub async fn run_to_completion(&mut self) -> Result<RunSummary, SnowballError> {
        let (_tx, rx) = watch::channel(false);
        self.run(rx).await
    }

    /// Run sweeps until the frontier is exhausted or `shutdown` flips to true.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary, SnowballError> {
        if self.policy.needs_moderator_roles() && self.role_fetcher.is_none() {
            return Err(SnowballError::Config(format!(
                "the {} frontier needs a moderator role fetcher",
                self.kind
            )));
        }

        let mut summary = RunSummary::new(self.kind);
        loop {
            if *shutdown.borrow() {
                summary.interrupted = true;
                break;
            }

            let pending = self.frontier.count_pending().await?;
            if pending == 0 {
                break;
            }

            let sweep = summary.sweeps + 1;
            info!("{} sweep {}: {} pending", self.kind, sweep, pending);
            self.emit(SnowballEvent::SweepStarted {
                kind: self.kind,
                sweep,
                pending,
            })
            .await;

            let stats = self.sweep(sweep, &mut shutdown).await?;
            info!(
                "{} sweep {}: fetched {}, unavailable {}, processed {}, failed {}, deferred {}, {} edges, {} new communities",
                self.kind,
                sweep,
                stats.fetched,
                stats.unavailable,
                stats.processed,
                stats.failed,
                stats.deferred,
                stats.edges,
                stats.discovered
            );
            summary.absorb(&stats);
            self.emit(SnowballEvent::SweepFinished(stats.clone())).await;

            if stats.interrupted {
                break;
            }
            if !stats.made_progress() {
                warn!(
                    "{} sweep {} changed nothing; stopping with entries still pending",
                    self.kind, sweep
                );
                summary.stalled = true;
                break;
            }
        }

        summary.pending = self.frontier.count_pending().await?;
        info!(
            "{} run finished after {} sweeps: {} processed, {} failed, {} edges, {} pending",
            self.kind, summary.sweeps, summary.processed, summary.failed, summary.edges, summary.pending
        );
        Ok(summary)
    }

    /// One metadata phase followed by one snowball phase.
    pub async fn sweep(
        &mut self,
        sweep: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SweepStats, SnowballError> {
        let mut stats = SweepStats {
            kind: Some(self.kind),
            sweep,
            ..Default::default()
        };

        self.metadata_phase(&mut stats, shutdown).await?;
        if stats.interrupted {
            return Ok(stats);
        }

        stats.backfilled = self.store.backfill_searchable_text().await?;
        self.snowball_phase(&mut stats, shutdown).await?;
        Ok(stats)
    }

    /// Fetch every unfetched community that sits in this frontier.
    async fn metadata_phase(
        &mut self,
        stats: &mut SweepStats,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SnowballError> {
        let unfetched = self.store.unfetched_in_frontier(self.kind).await?;
        debug!("{} communities to fetch for {}", unfetched.len(), self.kind);

        for name in unfetched {
            if *shutdown.borrow() {
                stats.interrupted = true;
                return Ok(());
            }

            self.pacer.tick(shutdown).await;
            let outcome = self.fetcher.fetch(&name).await;
            let label = outcome.label().to_string();

            match outcome {
                FetchOutcome::Unauthorized(error) => {
                    warn!("Stopping {} run at {}: {}", self.kind, name, error);
                    return Err(SnowballError::Unauthorized(error));
                }
                FetchOutcome::Success(metadata) => {
                    self.store
                        .record_fetch_result(&name, FetchRecord::Fetched(&metadata))
                        .await?;
                    stats.fetched += 1;
                }
                FetchOutcome::NotFound | FetchOutcome::Forbidden => {
                    self.store
                        .record_fetch_result(&name, FetchRecord::Unavailable { reason: &label })
                        .await?;
                    stats.unavailable += 1;
                }
                FetchOutcome::TransientError(error) => {
                    let status = self
                        .store
                        .record_transient_failure(&name, &error, self.config.retry_budget)
                        .await?;
                    if status == AcquisitionStatus::Unavailable {
                        warn!("Giving up on {} after repeated failures: {}", name, error);
                        stats.unavailable += 1;
                    } else {
                        warn!("Fetching {} failed, will retry: {}", name, error);
                        stats.retrying += 1;
                    }
                }
            }
            self.emit(SnowballEvent::Fetched {
                name,
                outcome: label,
            })
            .await;
        }
        Ok(())
    }

    /// Expand every pending entry in (depth, name) order.
    async fn snowball_phase(
        &mut self,
        stats: &mut SweepStats,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SnowballError> {
        stats.failed += self.frontier.mark_failed_if_source_unavailable().await?;

        let batch = self.frontier.pop_all_pending().await?;
        let mut done = Vec::with_capacity(batch.len());

        for (name, depth) in batch {
            if *shutdown.borrow() {
                stats.interrupted = true;
                break;
            }

            match self.store.get_status(&name).await? {
                Some(AcquisitionStatus::Fetched) => {}
                Some(AcquisitionStatus::Unavailable) => {
                    if self.frontier.mark_failed(&name).await? {
                        stats.failed += 1;
                    }
                    continue;
                }
                Some(AcquisitionStatus::Unfetched) => {
                    stats.deferred += 1;
                    continue;
                }
                None => {
                    // Enqueued without being tracked; the next metadata phase picks it up.
                    stats.discovered += self.store.ensure_tracked(std::slice::from_ref(&name)).await?;
                    stats.deferred += 1;
                    continue;
                }
            }

            let found = self.extract(&name, stats, shutdown).await?;
            let unique: BTreeSet<Edge> = found.into_iter().collect();
            let edges: Vec<Edge> = unique.into_iter().collect();
            let targets: Vec<String> = edges
                .iter()
                .map(|e| e.target.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            if !targets.is_empty() {
                stats.discovered += self.store.ensure_tracked(&targets).await?;
                stats.enqueued += self.frontier.enqueue(&targets, depth + 1).await?;
                stats.edges += self.edges.insert_batch(&edges).await?;
            }
            debug!("{} (depth {}) yielded {} edges", name, depth, edges.len());
            self.emit(SnowballEvent::Expanded {
                name: name.clone(),
                depth,
                edges: edges.len(),
            })
            .await;
            done.push(name);
        }

        stats.processed += self.frontier.mark_done(&done).await?;
        Ok(())
    }

    async fn extract(
        &mut self,
        name: &str,
        stats: &mut SweepStats,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Vec<Edge>, SnowballError> {
        if !self.policy.needs_moderator_roles() {
            let text = self.store.get_searchable_text(name).await?;
            return Ok(self.policy.extract_from_text(self.kind, name, &text));
        }

        let moderators: Vec<String> = match self.store.get(name).await? {
            Some(community) => community.moderators().to_vec(),
            None => Vec::new(),
        };
        self.moderators
            .ensure_tracked(&moderators, &self.config.skip_moderators)
            .await?;

        let accounts = self.moderators.get_many(&moderators).await?;
        for account in accounts
            .iter()
            .filter(|a| a.status == AccountStatus::NotFetched && !a.skip)
        {
            self.fetch_roles(&account.username, stats, shutdown).await?;
        }
        self.store
            .set_moderator_status(name, ModeratorRoleStatus::Fetched)
            .await?;

        let accounts = self.moderators.get_many(&moderators).await?;
        Ok(self.policy.extract_from_moderators(name, &accounts))
    }

    /// Pull one account's roles, retrying transient failures in place.
    async fn fetch_roles(
        &mut self,
        username: &str,
        stats: &mut SweepStats,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SnowballError> {
        let Some(fetcher) = self.role_fetcher.clone() else {
            return Err(SnowballError::Config(format!(
                "the {} frontier needs a moderator role fetcher",
                self.kind
            )));
        };

        let budget = self.config.retry_budget.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.pacer.tick(shutdown).await;

            match fetcher.fetch_roles(username).await {
                RoleOutcome::Success(communities) => {
                    self.moderators.record_roles(username, &communities).await?;
                    stats.roles_fetched += 1;
                    return Ok(());
                }
                RoleOutcome::Unavailable => {
                    self.moderators.record_unavailable(username, attempts).await?;
                    stats.roles_unavailable += 1;
                    return Ok(());
                }
                RoleOutcome::Unauthorized(error) => {
                    warn!("Stopping {} run at account {}: {}", self.kind, username, error);
                    return Err(SnowballError::Unauthorized(error));
                }
                RoleOutcome::TransientError(error) if attempts >= budget => {
                    warn!("Giving up on roles for {}: {}", username, error);
                    self.moderators.record_unavailable(username, attempts).await?;
                    stats.roles_unavailable += 1;
                    return Ok(());
                }
                RoleOutcome::TransientError(error) => {
                    debug!("Retrying roles for {} ({}/{}): {}", username, attempts, budget, error);
                }
            }
        }
    }

    async fn emit(&self, event: SnowballEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{Fixture, FixtureFetcher};
    use crate::models::{CommunityMetadata, ProcessedState};
    use crate::repository::run_migrations;
    use serde_json::json;
    use tempfile::tempdir;

    fn community(description: &str, moderators: &[&str]) -> CommunityMetadata {
        let mut metadata = CommunityMetadata::default();
        metadata
            .attributes
            .insert("description".to_string(), json!(description));
        metadata.moderators = moderators.iter().map(|m| m.to_string()).collect();
        metadata
    }

    fn quiet_config() -> DriverConfig {
        DriverConfig {
            pacing_every: 0,
            ..Default::default()
        }
    }

    async fn setup() -> (DbPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_path(&dir.path().join("crawl.db"));
        run_migrations(&pool).await.unwrap();
        (pool, dir)
    }

    fn driver(pool: &DbPool, kind: EdgeKind, fetcher: Arc<FixtureFetcher>) -> SnowballDriver {
        let policy = ExtractionPolicy::for_kind(kind, &Default::default()).unwrap();
        SnowballDriver::new(pool.clone(), kind, fetcher.clone(), policy, quiet_config())
            .with_role_fetcher(fetcher)
    }

    #[tokio::test]
    async fn test_transient_failure_defers_then_succeeds() {
        let (pool, _dir) = setup().await;
        let mut fixture = Fixture::default();
        fixture
            .communities
            .insert("alpha".to_string(), community("see r/beta", &[]));
        fixture.flaky.insert("alpha".to_string(), 1);
        let fetcher = Arc::new(FixtureFetcher::new(fixture));

        let mut driver = driver(&pool, EdgeKind::Reference, fetcher.clone());
        driver.seed(&["alpha".to_string()]).await.unwrap();

        let (_tx, mut rx) = watch::channel(false);
        let first = driver.sweep(1, &mut rx).await.unwrap();
        assert_eq!(first.retrying, 1);
        assert_eq!(first.deferred, 1);
        assert_eq!(first.processed, 0);

        let summary = driver.run_to_completion().await.unwrap();
        assert_eq!(summary.pending, 0);
        assert_eq!(fetcher.calls_for("alpha"), 2);
        assert_eq!(
            driver.frontier().get("alpha").await.unwrap().unwrap().processed,
            ProcessedState::Done
        );
    }

    #[tokio::test]
    async fn test_retry_budget_collapses_to_failed() {
        let (pool, _dir) = setup().await;
        let mut fixture = Fixture::default();
        fixture
            .communities
            .insert("alpha".to_string(), community("nothing", &[]));
        fixture.flaky.insert("alpha".to_string(), 10);
        let fetcher = Arc::new(FixtureFetcher::new(fixture));

        let mut driver = driver(&pool, EdgeKind::Hyperlink, fetcher.clone());
        driver.seed(&["alpha".to_string()]).await.unwrap();
        let summary = driver.run_to_completion().await.unwrap();

        assert_eq!(summary.pending, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(fetcher.calls_for("alpha"), 3);
        assert_eq!(
            driver.store.get_status("alpha").await.unwrap(),
            Some(AcquisitionStatus::Unavailable)
        );
    }

    #[tokio::test]
    async fn test_moderator_frontier_snowballs() {
        let (pool, _dir) = setup().await;
        let mut fixture = Fixture::default();
        fixture
            .communities
            .insert("a".to_string(), community("", &["m1", "m2", "AutoModerator"]));
        fixture.communities.insert("b".to_string(), community("", &["m1"]));
        fixture.communities.insert("c".to_string(), community("", &["m2"]));
        fixture.moderators.insert("m1".to_string(), vec!["a".into(), "b".into()]);
        fixture
            .moderators
            .insert("m2".to_string(), vec!["a".into(), "c".into(), "d".into()]);
        fixture
            .moderators
            .insert("automoderator".to_string(), vec!["a".into(), "b".into(), "c".into(), "z".into()]);
        let fetcher = Arc::new(FixtureFetcher::new(fixture));

        let mut driver = driver(&pool, EdgeKind::Moderator, fetcher.clone());
        driver.seed(&["a".to_string()]).await.unwrap();
        let summary = driver.run_to_completion().await.unwrap();
        assert_eq!(summary.pending, 0);

        let edges: BTreeSet<Edge> = driver.edges.list().await.unwrap().into_iter().collect();
        let expected: BTreeSet<Edge> = [
            ("a", "b", "m1"),
            ("a", "c", "m2"),
            ("a", "d", "m2"),
            ("b", "a", "m1"),
            ("c", "a", "m2"),
            ("c", "d", "m2"),
        ]
        .into_iter()
        .map(|(s, t, l)| Edge::new(EdgeKind::Moderator, s, t, l))
        .collect();
        assert_eq!(edges, expected);

        // Roles are pulled once per account, never for skipped ones.
        assert_eq!(fetcher.role_calls_for("m1"), 1);
        assert_eq!(fetcher.role_calls_for("m2"), 1);
        assert_eq!(fetcher.role_calls_for("automoderator"), 0);

        let d = driver.frontier().get("d").await.unwrap().unwrap();
        assert_eq!(d.processed, ProcessedState::Failed);
        assert_eq!(d.depth, 1);
    }

    #[tokio::test]
    async fn test_refused_role_credentials_stop_the_run() {
        let (pool, _dir) = setup().await;
        let mut fixture = Fixture::default();
        fixture.communities.insert("a".to_string(), community("", &["m1"]));
        fixture.moderators.insert("m1".to_string(), vec!["a".into(), "b".into()]);
        fixture.unauthorized.insert("m1".to_string());
        let fetcher = Arc::new(FixtureFetcher::new(fixture));

        let mut driver = driver(&pool, EdgeKind::Moderator, fetcher.clone());
        driver.seed(&["a".to_string()]).await.unwrap();
        assert!(matches!(
            driver.run_to_completion().await,
            Err(SnowballError::Unauthorized(_))
        ));

        assert_eq!(fetcher.role_calls_for("m1"), 1);
        let account = driver.moderators.get("m1").await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::NotFetched);
        assert_eq!(
            driver.frontier().get("a").await.unwrap().unwrap().processed,
            ProcessedState::Pending
        );
    }

    #[tokio::test]
    async fn test_moderator_frontier_requires_role_fetcher() {
        let (pool, _dir) = setup().await;
        let fetcher = Arc::new(FixtureFetcher::new(Fixture::default()));
        let policy = ExtractionPolicy::for_kind(EdgeKind::Moderator, &Default::default()).unwrap();
        let mut driver = SnowballDriver::new(pool, EdgeKind::Moderator, fetcher, policy, quiet_config());
        assert!(matches!(
            driver.run_to_completion().await,
            Err(SnowballError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_run_changes_nothing() {
        let (pool, _dir) = setup().await;
        let mut fixture = Fixture::default();
        fixture
            .communities
            .insert("alpha".to_string(), community("r/beta", &[]));
        let fetcher = Arc::new(FixtureFetcher::new(fixture));
        let mut driver = driver(&pool, EdgeKind::Reference, fetcher.clone());
        driver.seed(&["alpha".to_string()]).await.unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let summary = driver.run(rx).await.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.pending, 1);
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let (pool, _dir) = setup().await;
        let mut fixture = Fixture::default();
        fixture
            .communities
            .insert("alpha".to_string(), community("nothing here", &[]));
        let fetcher = Arc::new(FixtureFetcher::new(fixture));
        let (tx, mut rx) = mpsc::channel(64);
        let mut driver = driver(&pool, EdgeKind::Reference, fetcher).with_events(tx);
        driver.seed(&["alpha".to_string()]).await.unwrap();
        driver.run_to_completion().await.unwrap();
        drop(driver);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(SnowballEvent::SweepStarted { sweep: 1, pending: 1, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SnowballEvent::Fetched { name, outcome } if name == "alpha" && outcome == "success")));
        assert!(matches!(events.last(), Some(SnowballEvent::SweepFinished(stats)) if stats.processed == 1));
    }
}
