//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::repository::run_migrations;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let pool = settings.create_pool().map_err(|e| anyhow::anyhow!(e))?;
    run_migrations(&pool).await?;

    println!(
        "{} Initialized snowball in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  Database: {}", pool.database_url());
    println!("  Next: snowball seed <frontier> <names...>");

    Ok(())
}
