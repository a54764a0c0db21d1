//! Database migrations using cetane.
//!
//! cetane's migrator is synchronous, so migrations run on a blocking task
//! over a plain rusqlite connection to the same file the repositories use.

use cetane::migration::MigrationRegistry;
use cetane::migrator::MigrationStateStore;
use tracing::info;

use super::pool::{DbError, DbPool};

fn migration_error(msg: impl std::fmt::Display) -> DbError {
    DbError::QueryBuilderError(msg.to_string().into())
}

/// Apply every pending migration to the pool's database.
///
/// Already-applied migrations are skipped, so this is safe to call before
/// every command and a crawl can always resume from disk.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    use cetane::backend::Sqlite;
    use cetane::migrator::Migrator;

    let url = pool.database_url().to_string();

    tokio::task::spawn_blocking(move || {
        let conn = rusqlite::Connection::open(&url).map_err(migration_error)?;
        let backend = Sqlite;
        let registry = crate::migrations::registry();

        let mut state = SqliteState::new(&conn)?;

        // Databases created before migrations were tracked already hold the
        // full schema; record it once instead of recreating it.
        let already_applied = state.applied_migrations().map_err(migration_error)?;
        if already_applied.is_empty() && state.has_untracked_schema()? {
            mark_existing_as_applied(&registry, &mut state)?;
        }

        let mut migrator = Migrator::new(&registry, &backend, state);
        let applied = migrator
            .migrate_forward(|sql| conn.execute_batch(sql).map_err(|e| e.to_string()))
            .map_err(migration_error)?;

        for name in &applied {
            info!("Applied migration: {}", name);
        }

        if applied.is_empty() {
            info!("No pending migrations for {}", url);
        }

        Ok(())
    })
    .await
    .map_err(|e| DbError::QueryBuilderError(Box::new(e)))?
}

/// Mark all migrations as applied for an existing database.
fn mark_existing_as_applied<S: MigrationStateStore>(
    registry: &MigrationRegistry,
    state: &mut S,
) -> Result<(), DbError> {
    let order = registry.resolve_order().map_err(migration_error)?;
    let applied = state.applied_migrations().map_err(migration_error)?;

    for name in order {
        if !applied.contains(&name.to_string()) {
            info!("Marking existing migration as applied: {}", name);
            state.mark_applied(name).map_err(migration_error)?;
        }
    }

    Ok(())
}

struct SqliteState<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SqliteState<'a> {
    fn new(conn: &'a rusqlite::Connection) -> Result<Self, DbError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                name TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .map_err(migration_error)?;

        Ok(Self { conn })
    }

    /// True when the crawl tables exist without any recorded migration.
    fn has_untracked_schema(&self) -> Result<bool, DbError> {
        let exists: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='frontier_entries'",
                [],
                |row| row.get(0),
            )
            .map_err(migration_error)?;

        Ok(exists)
    }
}

impl MigrationStateStore for SqliteState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM __cetane_migrations ORDER BY name")
            .map_err(|e| e.to_string())?;

        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| e.to_string())?;

        Ok(names)
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO __cetane_migrations (name) VALUES (?1)",
                [name],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM __cetane_migrations WHERE name = ?1", [name])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
