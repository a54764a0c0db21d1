//! Status command.

use std::collections::HashMap;

use console::style;

use crate::config::Settings;
use crate::models::{AccountStatus, AcquisitionStatus, EdgeKind};
use crate::repository::{
    run_migrations, CommunityRepository, EdgeRepository, FrontierRepository, ModeratorRepository,
};

fn count(counts: &HashMap<String, u64>, key: &str) -> u64 {
    counts.get(key).copied().unwrap_or(0)
}

/// Show store, frontier and edge counts.
pub async fn cmd_status(settings: &Settings, frontier: Option<EdgeKind>) -> anyhow::Result<()> {
    if !settings.database_exists() {
        println!(
            "{} No database at {}; run 'snowball init' first",
            style("!").yellow(),
            settings.database_path().display()
        );
        return Ok(());
    }

    let pool = settings.create_pool().map_err(|e| anyhow::anyhow!(e))?;
    run_migrations(&pool).await?;

    let communities = CommunityRepository::new(pool.clone()).count_by_status().await?;
    println!("\n{}", style("Communities").bold());
    println!("{}", "-".repeat(40));
    for status in [
        AcquisitionStatus::Unfetched,
        AcquisitionStatus::Fetched,
        AcquisitionStatus::Unavailable,
    ] {
        println!("{:<20} {}", format!("{}:", status.as_str()), count(&communities, status.as_str()));
    }

    let accounts = ModeratorRepository::new(pool.clone()).count_by_status().await?;
    if !accounts.is_empty() {
        println!("\n{}", style("Moderator accounts").bold());
        println!("{}", "-".repeat(40));
        for status in [
            AccountStatus::NotFetched,
            AccountStatus::Fetched,
            AccountStatus::Unavailable,
        ] {
            println!("{:<20} {}", format!("{}:", status.as_str()), count(&accounts, status.as_str()));
        }
    }

    let kinds = match frontier {
        Some(kind) => vec![kind],
        None => EdgeKind::ALL.to_vec(),
    };

    println!("\n{}", style("Frontiers").bold());
    println!("{}", "-".repeat(40));
    println!(
        "{:<12} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "frontier", "total", "pending", "done", "failed", "edges"
    );
    for kind in kinds {
        let counts = FrontierRepository::new(pool.clone(), kind).counts().await?;
        let edges = EdgeRepository::new(pool.clone(), kind).count().await?;
        let pending = if counts.pending > 0 {
            style(counts.pending.to_string()).yellow()
        } else {
            style(counts.pending.to_string()).dim()
        };
        println!(
            "{:<12} {:>8} {:>8} {:>8} {:>8} {:>8}",
            kind.as_str(),
            counts.total(),
            pending,
            counts.done,
            counts.failed,
            edges
        );
    }

    Ok(())
}
