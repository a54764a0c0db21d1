//! Shared-moderator extraction.

use std::collections::BTreeSet;

use crate::models::{normalize_name, Edge, EdgeKind, ModeratorAccount};

/// One edge per (moderator, other community) pair reachable from `source`.
///
/// Directed: an account moderating both X and Y yields X->Y here and Y->X
/// only when Y is processed as a source. Accounts that are skipped or whose
/// roles were never fetched contribute nothing.
pub fn shared_moderator_edges(source: &str, moderators: &[ModeratorAccount]) -> Vec<Edge> {
    let source = normalize_name(source);
    let mut seen = BTreeSet::new();
    let mut edges = Vec::new();

    for account in moderators.iter().filter(|a| a.contributes_edges()) {
        for community in &account.communities {
            let target = normalize_name(community);
            if target.is_empty() || target == source {
                continue;
            }
            let edge = Edge::new(EdgeKind::Moderator, &source, &target, &account.username);
            if seen.insert(edge.clone()) {
                edges.push(edge);
            }
        }
    }
    edges
}
