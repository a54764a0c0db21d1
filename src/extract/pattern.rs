//! Text-pattern extraction of community references.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::ExtractError;
use crate::models::{normalize_name, Edge, EdgeKind};

/// `reddit.com/r/name` links.
pub const HYPERLINK_PATTERN: &str = r"reddit\.com/r/([A-Za-z0-9_-]+)";

/// Informal `r/name` and `/r/name` mentions, plus full links.
pub const REFERENCE_PATTERN: &str = r"(?:(?:^|\s)/?|reddit\.com/)r/([A-Za-z0-9_-]+)";

static HYPERLINK_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(HYPERLINK_PATTERN).unwrap());
static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(REFERENCE_PATTERN).unwrap());

/// A recognizer for community names embedded in free text.
///
/// The last capture group of each match is the referenced name.
#[derive(Debug, Clone)]
pub struct TextPattern {
    regex: Regex,
}

impl TextPattern {
    pub fn new(pattern: &str) -> Result<Self, ExtractError> {
        let regex = Regex::new(pattern).map_err(|source| ExtractError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        if regex.captures_len() < 2 {
            return Err(ExtractError::MissingCaptureGroup(pattern.to_string()));
        }
        Ok(Self { regex })
    }

    pub fn hyperlink() -> Self {
        Self {
            regex: HYPERLINK_REGEX.clone(),
        }
    }

    pub fn reference() -> Self {
        Self {
            regex: REFERENCE_REGEX.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Referenced names in order of first appearance, case-folded,
    /// without duplicates or `source` itself.
    pub fn find_targets(&self, source: &str, text: &str) -> Vec<String> {
        let source = normalize_name(source);
        let last = self.regex.captures_len() - 1;
        let mut seen = HashSet::new();

        self.regex
            .captures_iter(text)
            .filter_map(|caps| {
                (1..=last)
                    .rev()
                    .find_map(|i| caps.get(i))
                    .map(|m| m.as_str().to_lowercase())
            })
            .filter(|target| !target.is_empty() && *target != source)
            .filter(|target| seen.insert(target.clone()))
            .collect()
    }

    /// Edges from `source` to every community its text references.
    pub fn extract(&self, kind: EdgeKind, source: &str, text: &str) -> Vec<Edge> {
        let source_key = normalize_name(source);
        self.find_targets(&source_key, text)
            .into_iter()
            .map(|target| {
                let label = format!("r/{}", target);
                Edge::new(kind, &source_key, &target, &label)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: &str, target: &str, label: &str) -> Edge {
        Edge::new(EdgeKind::Reference, source, target, label)
    }

    #[test]
    fn test_reference_extraction_dedups_mentions() {
        let edges = TextPattern::reference().extract(
            EdgeKind::Reference,
            "baz",
            "check out r/foo and r/bar, also /r/foo again",
        );
        assert_eq!(edges, vec![edge("baz", "foo", "r/foo"), edge("baz", "bar", "r/bar")]);
    }

    #[test]
    fn test_self_references_are_dropped() {
        let edges = TextPattern::reference().extract(
            EdgeKind::Reference,
            "foo",
            "check out r/foo and r/bar, also /r/foo again",
        );
        assert_eq!(edges, vec![edge("foo", "bar", "r/bar")]);
    }

    #[test]
    fn test_targets_are_case_folded() {
        let targets = TextPattern::reference().find_targets("x", "r/Rust then /r/RUST then r/learnRust");
        assert_eq!(targets, vec!["rust", "learnrust"]);
    }

    #[test]
    fn test_hyperlink_requires_domain() {
        let pattern = TextPattern::hyperlink();
        let targets = pattern.find_targets(
            "src",
            "see https://www.reddit.com/r/AskHistorians/wiki and r/notalink",
        );
        assert_eq!(targets, vec!["askhistorians"]);
    }

    #[test]
    fn test_reference_ignores_embedded_tokens() {
        let targets = TextPattern::reference().find_targets("src", "color/r/blue or for/r/x");
        assert!(targets.is_empty());

        let targets = TextPattern::reference().find_targets("src", "old.reddit.com/r/Foo");
        assert_eq!(targets, vec!["foo"]);
    }

    #[test]
    fn test_custom_pattern_uses_last_group() {
        let pattern = TextPattern::new(r"(sub|community):([a-z]+)").unwrap();
        assert_eq!(pattern.find_targets("src", "sub:alpha community:beta"), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        assert!(matches!(
            TextPattern::new("r/("),
            Err(ExtractError::InvalidPattern { .. })
        ));
        assert!(matches!(
            TextPattern::new("r/[a-z]+"),
            Err(ExtractError::MissingCaptureGroup(_))
        ));
    }
}
