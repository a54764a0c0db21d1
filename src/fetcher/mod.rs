//! Metadata fetchers: the remote collaborators behind the crawl.
//!
//! The driver never talks to the network directly. It asks a
//! [`MetadataFetcher`] for one community at a time and a
//! [`ModeratorRoleFetcher`] for one account at a time, and gets back an
//! explicit outcome instead of an error to interpret.

mod fixture;
mod rate_limiter;
mod reddit;

use async_trait::async_trait;

use crate::models::CommunityMetadata;

pub use fixture::{Fixture, FixtureError, FixtureFetcher};
pub use rate_limiter::{HostStats, QuotaHeaders, RateLimitConfig, RateLimiter};
pub use reddit::{RedditFetcher, RedditFetcherConfig, ABOUT_FIELDS, USER_AGENT};

/// Result of fetching one community.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(CommunityMetadata),
    /// The community does not exist (or was banned).
    NotFound,
    /// The community exists but cannot be read (private, quarantined).
    Forbidden,
    /// Credentials were refused. Says nothing about the community, and
    /// every later call would be refused too.
    Unauthorized(String),
    /// Network or server fault; the same call may succeed later.
    TransientError(String),
}

impl FetchOutcome {
    /// Short label for logs and stored error text.
    pub fn label(&self) -> &str {
        match self {
            Self::Success(_) => "success",
            Self::NotFound => "not found",
            Self::Forbidden => "forbidden",
            Self::Unauthorized(_) => "unauthorized",
            Self::TransientError(_) => "transient error",
        }
    }
}

/// Result of fetching the communities one account moderates.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleOutcome {
    Success(Vec<String>),
    Unavailable,
    Unauthorized(String),
    TransientError(String),
}

/// Retrieves one community's attributes and moderator list.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, name: &str) -> FetchOutcome;
}

/// Retrieves the communities moderated by one account.
#[async_trait]
pub trait ModeratorRoleFetcher: Send + Sync {
    async fn fetch_roles(&self, username: &str) -> RoleOutcome;
}
