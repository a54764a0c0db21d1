//! Reddit JSON API binding for both fetcher traits.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::rate_limiter::{QuotaHeaders, RateLimiter};
use super::{FetchOutcome, MetadataFetcher, ModeratorRoleFetcher, RoleOutcome};
use crate::models::CommunityMetadata;

pub const USER_AGENT: &str = "snowball/0.3 (community graph research crawler)";

/// Attributes kept from a community's `about` payload.
pub const ABOUT_FIELDS: &[&str] = &[
    "display_name",
    "free_form_reports",
    "subreddit_type",
    "community_icon",
    "banner_background_image",
    "header_title",
    "over18",
    "show_media",
    "description",
    "title",
    "collapse_deleted_comments",
    "id",
    "emojis_enabled",
    "can_assign_user_flair",
    "allow_videos",
    "spoilers_enabled",
    "active_user_count",
    "original_content_tag_enabled",
    "display_name_prefixed",
    "can_assign_link_flair",
    "submit_text",
    "allow_videogifs",
    "accounts_active",
    "public_traffic",
    "subscribers",
    "all_original_content",
    "lang",
    "has_menu_widget",
    "name",
    "user_flair_enabled_in_sr",
    "created",
    "url",
    "quarantine",
    "hide_ads",
    "created_utc",
    "allow_discovery",
    "accounts_active_is_fuzzed",
    "advertiser_category",
    "public_description",
    "link_flair_enabled",
    "allow_images",
    "videostream_links_count",
    "comment_score_hide_mins",
    "show_media_preview",
    "submission_type",
];

/// Connection settings for [`RedditFetcher`].
#[derive(Debug, Clone)]
pub struct RedditFetcherConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// OAuth bearer token; anonymous requests when absent.
    pub access_token: Option<String>,
}

impl Default for RedditFetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com".to_string(),
            user_agent: USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            access_token: None,
        }
    }
}

/// Classified response from one API call.
#[derive(Debug)]
enum ApiResponse {
    Json(Value),
    NotFound,
    Forbidden,
    Unauthorized(String),
    Transient(String),
}

impl ApiResponse {
    /// Outcome for a community fetch that got no usable body.
    fn into_fetch_failure(self) -> FetchOutcome {
        match self {
            Self::Json(_) | Self::NotFound => FetchOutcome::NotFound,
            Self::Forbidden => FetchOutcome::Forbidden,
            Self::Unauthorized(e) => FetchOutcome::Unauthorized(e),
            Self::Transient(e) => FetchOutcome::TransientError(e),
        }
    }
}

/// Classify a non-success status.
///
/// Only answers that say the target is absent or closed are permanent.
/// Everything else may succeed on a later attempt.
fn classify_failure(status: StatusCode) -> ApiResponse {
    match status {
        StatusCode::UNAUTHORIZED => {
            ApiResponse::Unauthorized(format!("HTTP {}: access token missing or rejected", status))
        }
        StatusCode::FORBIDDEN => ApiResponse::Forbidden,
        StatusCode::NOT_FOUND | StatusCode::GONE => ApiResponse::NotFound,
        // Unknown communities redirect to a search page.
        s if s.is_redirection() => ApiResponse::NotFound,
        _ => ApiResponse::Transient(format!("HTTP {}", status)),
    }
}

/// Fetcher backed by the public Reddit JSON endpoints.
#[derive(Clone)]
pub struct RedditFetcher {
    client: Client,
    base_url: String,
    access_token: Option<String>,
    rate_limiter: RateLimiter,
}

impl RedditFetcher {
    pub fn new(config: RedditFetcherConfig, rate_limiter: RateLimiter) -> Result<Self, reqwest::Error> {
        // Redirects are classified, never followed.
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(Policy::none())
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token,
            rate_limiter,
        })
    }

    async fn get_json(&self, path: &str) -> ApiResponse {
        let url = format!("{}{}", self.base_url, path);
        let host = self.rate_limiter.acquire(&url).await;

        let mut request = self.client.get(&url).query(&[("raw_json", "1")]);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return ApiResponse::Transient(e.to_string()),
        };
        let status = response.status();

        if let Some(ref host) = host {
            let quota = QuotaHeaders::from_headers(response.headers());
            self.rate_limiter.report(host, status.as_u16(), quota).await;
        }

        debug!("GET {} -> {}", url, status);
        if !status.is_success() {
            return classify_failure(status);
        }
        match response.json::<Value>().await {
            Ok(body) => ApiResponse::Json(body),
            Err(e) => ApiResponse::Transient(format!("invalid JSON from {}: {}", url, e)),
        }
    }

    /// Moderator usernames; unreadable lists come back empty.
    async fn fetch_moderators(&self, name: &str) -> Result<Vec<String>, ApiResponse> {
        let path = format!("/r/{}/about/moderators.json", urlencoding::encode(name));
        match self.get_json(&path).await {
            ApiResponse::Json(body) => Ok(parse_moderators(&body)),
            ApiResponse::NotFound | ApiResponse::Forbidden => Ok(Vec::new()),
            failure => Err(failure),
        }
    }

    async fn fetch_rules(&self, name: &str) -> Result<Vec<Value>, ApiResponse> {
        let path = format!("/r/{}/about/rules.json", urlencoding::encode(name));
        match self.get_json(&path).await {
            ApiResponse::Json(body) => Ok(body
                .get("rules")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()),
            ApiResponse::NotFound | ApiResponse::Forbidden => Ok(Vec::new()),
            failure => Err(failure),
        }
    }
}

/// Pick the kept attributes out of an `about` payload.
///
/// Returns `None` unless the payload describes a community (`kind == "t5"`).
fn parse_about(body: &Value) -> Option<BTreeMap<String, Value>> {
    if body.get("kind").and_then(Value::as_str) != Some("t5") {
        return None;
    }
    let data = body.get("data")?.as_object()?;
    Some(
        ABOUT_FIELDS
            .iter()
            .filter_map(|key| match data.get(*key) {
                Some(Value::Null) | None => None,
                Some(value) => Some((key.to_string(), value.clone())),
            })
            .collect(),
    )
}

fn parse_moderators(body: &Value) -> Vec<String> {
    body.pointer("/data/children")
        .and_then(Value::as_array)
        .map(|children| {
            children
                .iter()
                .filter_map(|child| child.get("name").and_then(Value::as_str))
                .map(|name| name.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_moderated(body: &Value) -> Vec<String> {
    body.get("data")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("sr").and_then(Value::as_str))
                .map(|name| name.to_lowercase())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl MetadataFetcher for RedditFetcher {
    async fn fetch(&self, name: &str) -> FetchOutcome {
        let path = format!("/r/{}/about.json", urlencoding::encode(name));
        let attributes = match self.get_json(&path).await {
            ApiResponse::Json(body) => match parse_about(&body) {
                Some(attributes) => attributes,
                None => return FetchOutcome::NotFound,
            },
            failure => return failure.into_fetch_failure(),
        };

        let moderators = match self.fetch_moderators(name).await {
            Ok(moderators) => moderators,
            Err(failure) => return failure.into_fetch_failure(),
        };
        let rules = match self.fetch_rules(name).await {
            Ok(rules) => rules,
            Err(failure) => return failure.into_fetch_failure(),
        };

        FetchOutcome::Success(CommunityMetadata {
            attributes,
            moderators,
            rules,
        })
    }
}

#[async_trait]
impl ModeratorRoleFetcher for RedditFetcher {
    async fn fetch_roles(&self, username: &str) -> RoleOutcome {
        let path = format!("/user/{}/moderated_subreddits.json", urlencoding::encode(username));
        match self.get_json(&path).await {
            ApiResponse::Json(body) => RoleOutcome::Success(parse_moderated(&body)),
            ApiResponse::NotFound | ApiResponse::Forbidden => {
                warn!("Moderator roles for {} are unavailable", username);
                RoleOutcome::Unavailable
            }
            ApiResponse::Unauthorized(e) => RoleOutcome::Unauthorized(e),
            ApiResponse::Transient(e) => RoleOutcome::TransientError(e),
        }
    }
}
