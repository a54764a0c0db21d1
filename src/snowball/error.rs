//! Driver error types.

use thiserror::Error;

use crate::extract::ExtractError;
use crate::repository::DbError;

/// Errors that stop a crawl run.
///
/// Fetch failures are recorded per community and never appear here, except
/// for refused credentials, which would fail every remaining fetch.
#[derive(Debug, Error)]
pub enum SnowballError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("API refused our credentials: {0}")]
    Unauthorized(String),
}
