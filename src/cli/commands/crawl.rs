//! Run command: drive one or more frontiers to exhaustion.

use std::path::Path;
use std::sync::Arc;

use console::style;
use tokio::sync::{mpsc, watch};

use crate::config::Settings;
use crate::extract::ExtractionPolicy;
use crate::fetcher::{
    FixtureFetcher, MetadataFetcher, ModeratorRoleFetcher, RateLimiter, RedditFetcher,
};
use crate::models::EdgeKind;
use crate::repository::run_migrations;
use crate::snowball::{RunSummary, SnowballDriver, SnowballEvent};

type Fetchers = (Arc<dyn MetadataFetcher>, Arc<dyn ModeratorRoleFetcher>);

/// Build the fetch collaborators: a fixture file when given, the network otherwise.
fn build_fetchers(settings: &Settings, fixtures: Option<&Path>) -> anyhow::Result<Fetchers> {
    match fixtures {
        Some(path) => {
            let fetcher = Arc::new(FixtureFetcher::from_path(path)?);
            let metadata: Arc<dyn MetadataFetcher> = fetcher.clone();
            let roles: Arc<dyn ModeratorRoleFetcher> = fetcher;
            Ok((metadata, roles))
        }
        None => {
            let rate_limiter = RateLimiter::with_config(settings.rate_limit_config());
            let fetcher = Arc::new(RedditFetcher::new(settings.fetcher_config(), rate_limiter)?);
            let metadata: Arc<dyn MetadataFetcher> = fetcher.clone();
            let roles: Arc<dyn ModeratorRoleFetcher> = fetcher;
            Ok((metadata, roles))
        }
    }
}

/// Print driver events as they arrive.
async fn print_events(mut rx: mpsc::Receiver<SnowballEvent>, verbose: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            SnowballEvent::SweepStarted {
                kind,
                sweep,
                pending,
            } => {
                println!(
                    "{} {} sweep {} ({} pending)",
                    style("→").cyan(),
                    kind,
                    sweep,
                    pending
                );
            }
            SnowballEvent::Fetched { name, outcome } => {
                if verbose {
                    println!("    fetched r/{}: {}", name, style(outcome).dim());
                }
            }
            SnowballEvent::Expanded { name, depth, edges } => {
                if verbose {
                    println!("    expanded r/{} at depth {}: {} edges", name, depth, edges);
                }
            }
            SnowballEvent::SweepFinished(stats) => {
                println!(
                    "  {} fetched, {} unavailable, {} processed, {} failed, {} deferred, {} edges",
                    stats.fetched,
                    stats.unavailable,
                    stats.processed,
                    stats.failed,
                    stats.deferred,
                    stats.edges
                );
            }
        }
    }
}

fn print_summary(summary: &RunSummary) {
    let kind = summary.kind.map(|k| k.as_str()).unwrap_or("?");
    let marker = if summary.interrupted {
        style("!").yellow()
    } else if summary.stalled {
        style("!").red()
    } else {
        style("✓").green()
    };
    println!(
        "{} {}: {} sweeps, {} processed, {} failed, {} edges, {} new communities, {} pending",
        marker,
        kind,
        summary.sweeps,
        summary.processed,
        summary.failed,
        summary.edges,
        summary.discovered,
        summary.pending
    );
    if summary.stalled {
        println!("  Stopped early: a sweep made no progress");
    }
}

/// Run each frontier in turn. Ctrl-C stops the current frontier between entries.
pub async fn cmd_run(
    settings: &Settings,
    kinds: &[EdgeKind],
    fixtures: Option<&Path>,
) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let pool = settings.create_pool().map_err(|e| anyhow::anyhow!(e))?;
    run_migrations(&pool).await?;

    let (metadata, roles) = build_fetchers(settings, fixtures)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n{} Interrupted, finishing current entry...", style("!").yellow());
            let _ = shutdown_tx.send(true);
        }
    });

    let verbose = super::is_verbose();
    for &kind in kinds {
        let policy = ExtractionPolicy::for_kind(kind, &settings.patterns)?;
        let (tx, rx) = mpsc::channel(256);
        let printer = tokio::spawn(print_events(rx, verbose));

        let mut driver = SnowballDriver::new(
            pool.clone(),
            kind,
            metadata.clone(),
            policy,
            settings.driver_config(),
        )
        .with_role_fetcher(roles.clone())
        .with_events(tx);

        let result = driver.run(shutdown_rx.clone()).await;
        drop(driver);
        let _ = printer.await;

        let summary = result?;
        print_summary(&summary);
        if summary.interrupted {
            break;
        }
    }

    Ok(())
}
