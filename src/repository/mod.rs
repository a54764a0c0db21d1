//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! against a SQLite store.

pub mod community;
pub mod diesel_models;
pub mod edge;
pub mod frontier;
pub mod migrations;
pub mod moderator;
pub mod pool;
pub mod util;

pub use community::{CommunityRepository, FetchRecord};
pub use edge::EdgeRepository;
pub use frontier::FrontierRepository;
pub use migrations::run_migrations;
pub use moderator::ModeratorRepository;
pub use pool::{DbError, DbPool};

/// Largest `IN (...)` list sent in one statement. SQLite's default bind
/// limit is 999 on older builds.
pub(crate) const MAX_BIND_PARAMS: usize = 500;
