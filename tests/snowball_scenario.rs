//! End-to-end crawl scenarios against a temporary SQLite store.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::sync::watch;

use snowball::extract::ExtractionPolicy;
use snowball::fetcher::{FetchOutcome, Fixture, FixtureFetcher, MetadataFetcher};
use snowball::models::{AcquisitionStatus, CommunityMetadata, Edge, EdgeKind, ProcessedState};
use snowball::repository::{run_migrations, CommunityRepository, DbPool, EdgeRepository};
use snowball::snowball::{DriverConfig, SnowballDriver, SnowballError};

async fn setup_db() -> (DbPool, TempDir) {
    let dir = tempdir().unwrap();
    let pool = DbPool::from_path(&dir.path().join("snowball.db"));
    run_migrations(&pool).await.unwrap();
    (pool, dir)
}

fn described(text: &str) -> CommunityMetadata {
    let mut metadata = CommunityMetadata::default();
    metadata
        .attributes
        .insert("description".to_string(), json!(text));
    metadata
}

fn fixture(communities: &[(&str, &str)]) -> Fixture {
    let mut fixture = Fixture::default();
    for (name, text) in communities {
        fixture
            .communities
            .insert(name.to_string(), described(text));
    }
    fixture
}

fn driver(pool: &DbPool, kind: EdgeKind, fetcher: &Arc<FixtureFetcher>) -> SnowballDriver {
    let policy = ExtractionPolicy::for_kind(kind, &Default::default()).unwrap();
    let config = DriverConfig {
        pacing_every: 0,
        ..Default::default()
    };
    SnowballDriver::new(pool.clone(), kind, fetcher.clone(), policy, config)
        .with_role_fetcher(fetcher.clone())
}

fn seeds(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn alpha_beta_gamma() -> Arc<FixtureFetcher> {
    Arc::new(FixtureFetcher::new(fixture(&[
        ("alpha", "come visit r/beta"),
        ("beta", "friends: r/alpha and r/gamma"),
        ("gamma", "quiet here"),
    ])))
}

#[tokio::test]
async fn reference_scenario_advances_one_depth_per_sweep() {
    let (pool, _dir) = setup_db().await;
    let fetcher = alpha_beta_gamma();
    let mut driver = driver(&pool, EdgeKind::Reference, &fetcher);
    driver.seed(&seeds(&["alpha"])).await.unwrap();

    let (_tx, mut rx) = watch::channel(false);
    let first = driver.sweep(1, &mut rx).await.unwrap();
    assert_eq!(first.fetched, 1);
    assert_eq!(first.processed, 1);
    let second = driver.sweep(2, &mut rx).await.unwrap();
    assert_eq!(second.fetched, 1);
    assert_eq!(second.processed, 1);

    let frontier = driver.frontier();
    let alpha = frontier.get("alpha").await.unwrap().unwrap();
    let beta = frontier.get("beta").await.unwrap().unwrap();
    let gamma = frontier.get("gamma").await.unwrap().unwrap();
    assert_eq!((alpha.depth, alpha.processed), (0, ProcessedState::Done));
    assert_eq!((beta.depth, beta.processed), (1, ProcessedState::Done));
    assert_eq!((gamma.depth, gamma.processed), (2, ProcessedState::Pending));

    let third = driver.sweep(3, &mut rx).await.unwrap();
    assert_eq!(third.processed, 1);
    assert_eq!(third.edges, 0);
    assert_eq!(
        driver.frontier().get("gamma").await.unwrap().unwrap().processed,
        ProcessedState::Done
    );
    assert_eq!(driver.frontier().count_pending().await.unwrap(), 0);

    let edges: BTreeSet<(String, String)> = EdgeRepository::new(pool.clone(), EdgeKind::Reference)
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.source, e.target))
        .collect();
    let expected: BTreeSet<(String, String)> = [("alpha", "beta"), ("beta", "alpha"), ("beta", "gamma")]
        .into_iter()
        .map(|(s, t)| (s.to_string(), t.to_string()))
        .collect();
    assert_eq!(edges, expected);
}

#[tokio::test]
async fn run_to_completion_fetches_each_community_once() {
    let (pool, _dir) = setup_db().await;
    let fetcher = alpha_beta_gamma();
    let mut driver = driver(&pool, EdgeKind::Reference, &fetcher);
    driver.seed(&seeds(&["alpha"])).await.unwrap();

    let summary = driver.run_to_completion().await.unwrap();
    assert_eq!(summary.sweeps, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.pending, 0);
    assert!(!summary.stalled);
    for name in ["alpha", "beta", "gamma"] {
        assert_eq!(fetcher.calls_for(name), 1, "{} fetched more than once", name);
    }

    // A second run over a finished frontier does nothing.
    let again = driver.run_to_completion().await.unwrap();
    assert_eq!(again.sweeps, 0);
    assert_eq!(fetcher.total_calls(), 3);
}

#[tokio::test]
async fn reseeding_never_changes_depth_or_state() {
    let (pool, _dir) = setup_db().await;
    let fetcher = alpha_beta_gamma();
    let mut driver = driver(&pool, EdgeKind::Reference, &fetcher);
    assert_eq!(driver.seed(&seeds(&["alpha", "Alpha", "r/alpha"])).await.unwrap(), 1);
    driver.run_to_completion().await.unwrap();

    assert_eq!(driver.seed(&seeds(&["alpha", "gamma"])).await.unwrap(), 0);
    let gamma = driver.frontier().get("gamma").await.unwrap().unwrap();
    assert_eq!(gamma.depth, 2);
    assert_eq!(gamma.processed, ProcessedState::Done);
}

#[tokio::test]
async fn closed_universe_terminates() {
    let (pool, _dir) = setup_db().await;
    let names = ["n0", "n1", "n2", "n3", "n4"];
    let text = names
        .iter()
        .map(|n| format!("r/{}", n))
        .collect::<Vec<_>>()
        .join(" and ");
    let communities: Vec<(&str, &str)> = names.iter().map(|n| (*n, text.as_str())).collect();
    let fetcher = Arc::new(FixtureFetcher::new(fixture(&communities)));

    let mut driver = driver(&pool, EdgeKind::Reference, &fetcher);
    driver.seed(&seeds(&["n0"])).await.unwrap();
    let summary = driver.run_to_completion().await.unwrap();

    assert_eq!(summary.pending, 0);
    assert_eq!(summary.processed, names.len());
    assert_eq!(summary.edges, names.len() * (names.len() - 1));
    assert_eq!(fetcher.total_calls(), names.len() as u32);
}

#[tokio::test]
async fn unavailable_communities_fail_without_edges() {
    let (pool, _dir) = setup_db().await;
    let mut fx = fixture(&[("hub", "see r/ghost and r/secret and r/real"), ("real", "")]);
    fx.forbidden.insert("secret".to_string());
    let fetcher = Arc::new(FixtureFetcher::new(fx));

    let mut driver = driver(&pool, EdgeKind::Reference, &fetcher);
    driver.seed(&seeds(&["hub"])).await.unwrap();
    let summary = driver.run_to_completion().await.unwrap();

    assert_eq!(summary.pending, 0);
    assert_eq!(summary.failed, 2);
    for name in ["ghost", "secret"] {
        let entry = driver.frontier().get(name).await.unwrap().unwrap();
        assert_eq!(entry.processed, ProcessedState::Failed);
    }

    let store = CommunityRepository::new(pool.clone());
    assert_eq!(
        store.get_status("secret").await.unwrap(),
        Some(AcquisitionStatus::Unavailable)
    );
    let edges = EdgeRepository::new(pool.clone(), EdgeKind::Reference);
    assert!(edges.from_source("ghost").await.unwrap().is_empty());
    assert_eq!(edges.count().await.unwrap(), 3);
}

#[tokio::test]
async fn hyperlink_frontier_collapses_link_variants() {
    let (pool, _dir) = setup_db().await;
    let fetcher = Arc::new(FixtureFetcher::new(fixture(&[(
        "links",
        "https://www.reddit.com/r/Foo/ and http://reddit.com/r/foo plus r/bar",
    )])));

    let mut driver = driver(&pool, EdgeKind::Hyperlink, &fetcher);
    driver.seed(&seeds(&["links"])).await.unwrap();
    driver.run_to_completion().await.unwrap();

    let edges = EdgeRepository::new(pool.clone(), EdgeKind::Hyperlink)
        .from_source("links")
        .await
        .unwrap();
    assert_eq!(edges, vec![Edge::new(EdgeKind::Hyperlink, "links", "foo", "r/foo")]);
}

#[tokio::test]
async fn interrupted_run_resumes_from_disk() {
    let (pool, _dir) = setup_db().await;
    let fetcher = alpha_beta_gamma();

    {
        let mut first = driver(&pool, EdgeKind::Reference, &fetcher);
        first.seed(&seeds(&["alpha"])).await.unwrap();
        let (_tx, mut rx) = watch::channel(false);
        first.sweep(1, &mut rx).await.unwrap();
    }

    let mut second = driver(&pool, EdgeKind::Reference, &fetcher);
    let summary = second.run_to_completion().await.unwrap();
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.processed, 2);
    assert_eq!(fetcher.calls_for("alpha"), 1);
}

#[tokio::test]
async fn frontiers_share_fetched_metadata() {
    let (pool, _dir) = setup_db().await;
    let fetcher = alpha_beta_gamma();

    let mut reference = driver(&pool, EdgeKind::Reference, &fetcher);
    reference.seed(&seeds(&["alpha"])).await.unwrap();
    reference.run_to_completion().await.unwrap();

    let mut hyperlink = driver(&pool, EdgeKind::Hyperlink, &fetcher);
    hyperlink.seed(&seeds(&["beta"])).await.unwrap();
    let summary = hyperlink.run_to_completion().await.unwrap();

    assert_eq!(summary.fetched, 0);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.edges, 0);
    assert_eq!(fetcher.calls_for("beta"), 1);
}

#[tokio::test]
async fn shared_moderators_link_communities() {
    let (pool, _dir) = setup_db().await;
    let mut fx = Fixture::default();
    let mut a = described("");
    a.moderators = seeds(&["m1", "m2"]);
    fx.communities.insert("a".to_string(), a);
    fx.moderators.insert("m1".to_string(), seeds(&["a", "b"]));
    fx.moderators.insert("m2".to_string(), seeds(&["a", "c"]));
    let fetcher = Arc::new(FixtureFetcher::new(fx));

    let mut driver = driver(&pool, EdgeKind::Moderator, &fetcher);
    driver.seed(&seeds(&["a"])).await.unwrap();
    let (_tx, mut rx) = watch::channel(false);
    driver.sweep(1, &mut rx).await.unwrap();

    let edges: BTreeSet<Edge> = EdgeRepository::new(pool.clone(), EdgeKind::Moderator)
        .from_source("a")
        .await
        .unwrap()
        .into_iter()
        .collect();
    let expected: BTreeSet<Edge> = [
        Edge::new(EdgeKind::Moderator, "a", "b", "m1"),
        Edge::new(EdgeKind::Moderator, "a", "c", "m2"),
    ]
    .into_iter()
    .collect();
    assert_eq!(edges, expected);

    let b = driver.frontier().get("b").await.unwrap().unwrap();
    assert_eq!((b.depth, b.processed), (1, ProcessedState::Pending));
}

/// Answers from a fixture, but drops the edge table before answering.
struct EdgeTableVanishes {
    inner: Arc<FixtureFetcher>,
    db_path: PathBuf,
}

#[async_trait]
impl MetadataFetcher for EdgeTableVanishes {
    async fn fetch(&self, name: &str) -> FetchOutcome {
        let conn = rusqlite::Connection::open(&self.db_path).unwrap();
        conn.execute_batch("DROP TABLE IF EXISTS edges").unwrap();
        self.inner.fetch(name).await
    }
}

#[tokio::test]
async fn store_failure_stops_the_run() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("snowball.db");
    let pool = DbPool::from_path(&db_path);
    run_migrations(&pool).await.unwrap();

    let fetcher = Arc::new(EdgeTableVanishes {
        inner: alpha_beta_gamma(),
        db_path,
    });
    let policy = ExtractionPolicy::for_kind(EdgeKind::Reference, &Default::default()).unwrap();
    let config = DriverConfig {
        pacing_every: 0,
        ..Default::default()
    };
    let mut driver = SnowballDriver::new(pool.clone(), EdgeKind::Reference, fetcher, policy, config);
    driver.seed(&seeds(&["alpha"])).await.unwrap();

    let result = driver.run_to_completion().await;
    assert!(
        matches!(result, Err(SnowballError::Database(_))),
        "expected a database error, got {:?}",
        result
    );

    // Nothing past the failed write was marked done.
    let alpha = driver.frontier().get("alpha").await.unwrap().unwrap();
    assert_eq!(alpha.processed, ProcessedState::Pending);
}

#[tokio::test]
async fn refused_credentials_stop_without_recording_absence() {
    let (pool, _dir) = setup_db().await;
    let mut fx = fixture(&[
        ("alpha", "come visit r/beta"),
        ("beta", "quiet here"),
    ]);
    fx.unauthorized.insert("beta".to_string());
    let refused = Arc::new(FixtureFetcher::new(fx));

    let mut first = driver(&pool, EdgeKind::Reference, &refused);
    first.seed(&seeds(&["alpha"])).await.unwrap();
    let result = first.run_to_completion().await;
    assert!(matches!(result, Err(SnowballError::Unauthorized(_))));

    let store = CommunityRepository::new(pool.clone());
    let beta = store.get("beta").await.unwrap().unwrap();
    assert_eq!(beta.status, AcquisitionStatus::Unfetched);
    assert_eq!(beta.fetch_attempts, 0);
    assert_eq!(
        first.frontier().get("beta").await.unwrap().unwrap().processed,
        ProcessedState::Pending
    );

    // With working credentials the crawl picks up where it stopped.
    let fetcher = Arc::new(FixtureFetcher::new(fixture(&[
        ("alpha", "come visit r/beta"),
        ("beta", "quiet here"),
    ])));
    let mut second = driver(&pool, EdgeKind::Reference, &fetcher);
    let summary = second.run_to_completion().await.unwrap();
    assert_eq!(summary.pending, 0);
    assert_eq!(fetcher.calls_for("alpha"), 0);
    assert_eq!(
        store.get_status("beta").await.unwrap(),
        Some(AcquisitionStatus::Fetched)
    );
}
