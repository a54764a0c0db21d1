//! Edge extraction policies.
//!
//! Both policies are pure: the driver gathers their inputs from the store
//! and persists their outputs.

mod moderator;
mod pattern;

use std::collections::HashMap;

use thiserror::Error;

use crate::models::{Edge, EdgeKind, ModeratorAccount};

pub use moderator::shared_moderator_edges;
pub use pattern::{TextPattern, HYPERLINK_PATTERN, REFERENCE_PATTERN};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern '{0}' has no capture group for the community name")]
    MissingCaptureGroup(String),

    #[error("the {0} frontier does not extract from text")]
    NotTextual(EdgeKind),
}

/// How a frontier turns a community into outgoing edges.
#[derive(Debug, Clone)]
pub enum ExtractionPolicy {
    /// Scan the community's searchable text.
    TextPattern(TextPattern),
    /// Pair the community with everything its moderators moderate.
    SharedModerator,
}

impl ExtractionPolicy {
    /// Built-in policy for a frontier, with an optional pattern override
    /// keyed by frontier name.
    pub fn for_kind(kind: EdgeKind, overrides: &HashMap<String, String>) -> Result<Self, ExtractError> {
        match (kind, overrides.get(kind.as_str())) {
            (EdgeKind::Moderator, Some(_)) => Err(ExtractError::NotTextual(kind)),
            (EdgeKind::Moderator, None) => Ok(Self::SharedModerator),
            (_, Some(pattern)) => Ok(Self::TextPattern(TextPattern::new(pattern)?)),
            (EdgeKind::Hyperlink, None) => Ok(Self::TextPattern(TextPattern::hyperlink())),
            (EdgeKind::Reference, None) => Ok(Self::TextPattern(TextPattern::reference())),
        }
    }

    pub fn needs_moderator_roles(&self) -> bool {
        matches!(self, Self::SharedModerator)
    }

    /// Text-pattern edges; empty for the shared-moderator policy.
    pub fn extract_from_text(&self, kind: EdgeKind, source: &str, text: &str) -> Vec<Edge> {
        match self {
            Self::TextPattern(pattern) => pattern.extract(kind, source, text),
            Self::SharedModerator => Vec::new(),
        }
    }

    /// Shared-moderator edges; empty for text policies.
    pub fn extract_from_moderators(&self, source: &str, moderators: &[ModeratorAccount]) -> Vec<Edge> {
        match self {
            Self::SharedModerator => shared_moderator_edges(source, moderators),
            Self::TextPattern(_) => Vec::new(),
        }
    }
}
