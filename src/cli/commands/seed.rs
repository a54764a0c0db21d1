//! Seed command.

use std::collections::BTreeSet;
use std::path::Path;

use console::style;

use crate::config::Settings;
use crate::models::{normalize_name, EdgeKind};
use crate::repository::{run_migrations, CommunityRepository, FrontierRepository};

/// Parse a seed list: one name per line, `#` starts a comment.
fn parse_seed_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Admit seed communities at depth 0.
pub async fn cmd_seed(
    settings: &Settings,
    kind: EdgeKind,
    mut names: Vec<String>,
    file: Option<&Path>,
) -> anyhow::Result<()> {
    if let Some(path) = file {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read seed file {}: {}", path.display(), e))?;
        names.extend(parse_seed_list(&contents));
    }

    let names: Vec<String> = names
        .iter()
        .map(|n| normalize_name(n))
        .filter(|n| !n.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if names.is_empty() {
        println!("{} No seed names given", style("!").yellow());
        return Ok(());
    }

    settings.ensure_directories()?;
    let pool = settings.create_pool().map_err(|e| anyhow::anyhow!(e))?;
    run_migrations(&pool).await?;

    let tracked = CommunityRepository::new(pool.clone())
        .ensure_tracked(&names)
        .await?;
    let added = FrontierRepository::new(pool, kind).enqueue(&names, 0).await?;

    println!(
        "{} Seeded {} communities into the {} frontier ({} already queued, {} new to the store)",
        style("✓").green(),
        added,
        kind,
        names.len().saturating_sub(added),
        tracked
    );

    Ok(())
}
