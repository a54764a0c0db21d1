//! Community models: the nodes of the snowball graph.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Attributes that feed the searchable text, in concatenation order.
/// The rule list is appended after these.
pub const SEARCHABLE_FIELDS: &[&str] = &[
    "display_name",
    "header_title",
    "description",
    "title",
    "submit_text",
    "name",
    "public_description",
];

/// Metadata acquisition status for a community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionStatus {
    /// Tracked but never fetched.
    Unfetched,
    /// Metadata was fetched successfully.
    Fetched,
    /// Missing, private, banned, or out of retries.
    Unavailable,
}

impl AcquisitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unfetched => "unfetched",
            Self::Fetched => "fetched",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unfetched" => Some(Self::Unfetched),
            "fetched" => Some(Self::Fetched),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }
}

/// Whether the moderator accounts of a community have had their roles pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeratorRoleStatus {
    NotFetched,
    Fetched,
}

impl ModeratorRoleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFetched => "not_fetched",
            Self::Fetched => "fetched",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_fetched" => Some(Self::NotFetched),
            "fetched" => Some(Self::Fetched),
            _ => None,
        }
    }
}

/// Raw metadata returned by a successful fetch.
///
/// The attribute bag is opaque to the crawler apart from the text fields
/// listed in [`SEARCHABLE_FIELDS`] and `created_utc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityMetadata {
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub moderators: Vec<String>,
    #[serde(default)]
    pub rules: Vec<serde_json::Value>,
}

impl CommunityMetadata {
    /// Build the normalized searchable text from the text-bearing attributes.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<String> = SEARCHABLE_FIELDS
            .iter()
            .filter_map(|key| self.attributes.get(*key))
            .filter_map(attribute_text)
            .map(|text| collapse_text(&text))
            .collect();

        if !self.rules.is_empty() {
            let rules = serde_json::to_string(&self.rules).unwrap_or_default();
            parts.push(collapse_text(&rules));
        }

        parts.join(" ")
    }

    /// Creation time derived from the `created_utc` epoch-seconds attribute.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.attributes.get("created_utc")?.as_f64()?;
        Utc.timestamp_opt(secs as i64, 0).single()
    }
}

fn attribute_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Strip double quotes and collapse runs of line breaks into one space.
pub fn collapse_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for c in text.chars() {
        match c {
            '"' => {}
            '\n' | '\r' => {
                if !in_break {
                    out.push(' ');
                    in_break = true;
                }
            }
            _ => {
                out.push(c);
                in_break = false;
            }
        }
    }
    out
}

/// Normalize a community name into its store key.
///
/// Accepts `Name`, `r/Name` and `/r/Name`.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    let stripped = trimmed
        .strip_prefix("/r/")
        .or_else(|| trimmed.strip_prefix("r/"))
        .unwrap_or(trimmed);
    stripped.trim_matches('/').to_lowercase()
}

/// A tracked community.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub name: String,
    pub status: AcquisitionStatus,
    pub metadata: Option<CommunityMetadata>,
    pub searchable_text: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub moderator_status: ModeratorRoleStatus,
    pub fetch_attempts: u32,
    pub last_error: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Community {
    /// Moderator usernames, empty when metadata is missing.
    pub fn moderators(&self) -> &[String] {
        self.metadata
            .as_ref()
            .map(|m| m.moderators.as_slice())
            .unwrap_or(&[])
    }
}
