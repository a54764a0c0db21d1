//! Edge model: a directed tie between two communities.

use serde::{Deserialize, Serialize};

use super::EdgeKind;

/// A discovered edge. Equality covers `(kind, source, target, label)` so a
/// batch can be deduplicated with set semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub kind: EdgeKind,
    pub source: String,
    pub target: String,
    /// Matched `r/<name>` token for text edges, moderator username for
    /// shared-moderator edges.
    pub label: String,
}

impl Edge {
    pub fn new(kind: EdgeKind, source: &str, target: &str, label: &str) -> Self {
        Self {
            kind,
            source: source.to_string(),
            target: target.to_string(),
            label: label.to_string(),
        }
    }
}
