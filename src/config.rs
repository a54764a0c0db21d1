//! Configuration management for snowball using the prefer crate.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetcher::{RateLimitConfig, RedditFetcherConfig, USER_AGENT};
use crate::repository::util::validate_database_url;
use crate::repository::DbPool;
use crate::snowball::DriverConfig;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "snowball.db";

/// Default API root.
pub const DEFAULT_API_BASE_URL: &str = "https://www.reddit.com";

/// Environment variable holding an OAuth bearer token.
pub const ACCESS_TOKEN_ENV: &str = "SNOWBALL_ACCESS_TOKEN";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Minimum delay between requests in milliseconds.
    pub request_delay_ms: u64,
    pub api_base_url: String,
    pub access_token: Option<String>,
    /// Transient failures tolerated before a community is given up on.
    pub retry_budget: u32,
    /// Remote calls between courtesy pauses (0 disables pausing).
    pub pacing_every: u32,
    pub pacing_pause_secs: u64,
    /// Moderator accounts excluded from shared-moderator edges.
    pub skip_moderators: Vec<String>,
    /// Extraction pattern overrides keyed by frontier name.
    pub patterns: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snowball");

        let driver = DriverConfig::default();
        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            user_agent: USER_AGENT.to_string(),
            request_timeout: 30,
            request_delay_ms: 1000,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            access_token: None,
            retry_budget: driver.retry_budget,
            pacing_every: driver.pacing_every,
            pacing_pause_secs: driver.pacing_pause.as_secs(),
            skip_moderators: driver.skip_moderators,
            patterns: HashMap::new(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Get the full path to the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Check if the database appears to be initialized.
    pub fn database_exists(&self) -> bool {
        match self.database_url {
            Some(ref url) => {
                let path = url.strip_prefix("sqlite:").unwrap_or(url);
                Path::new(path.trim_start_matches("//")).exists()
            }
            None => self.database_path().exists(),
        }
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        tracing::debug!("Ensuring data directory {}", self.data_dir.display());
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }

    /// Connection factory for the configured database.
    pub fn create_pool(&self) -> Result<DbPool, String> {
        let url = self.database_url();
        validate_database_url(&url)?;
        Ok(DbPool::new(url.trim_start_matches("sqlite://")))
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            retry_budget: self.retry_budget.max(1),
            skip_moderators: self.skip_moderators.clone(),
            pacing_every: self.pacing_every,
            pacing_pause: Duration::from_secs(self.pacing_pause_secs),
        }
    }

    pub fn fetcher_config(&self) -> RedditFetcherConfig {
        RedditFetcherConfig {
            base_url: self.api_base_url.clone(),
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.request_timeout),
            access_token: self.access_token.clone(),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            base_delay: Duration::from_millis(self.request_delay_ms),
            ..Default::default()
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Delay between requests in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_budget: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing_every: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing_pause_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_moderators: Option<Vec<String>>,
    /// Extraction pattern overrides keyed by frontier name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub patterns: HashMap<String, String>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers snowball config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("snowball").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_else(|e| {
                    tracing::warn!("{}; using defaults", e);
                    Self::default()
                }),
                None => Self::default(),
            },
            // No config file found
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved against `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(ref url) = self.api_base_url {
            settings.api_base_url = url.clone();
        }
        if let Some(ref token) = self.access_token {
            settings.access_token = Some(token.clone());
        }
        if let Some(budget) = self.retry_budget {
            settings.retry_budget = budget;
        }
        if let Some(every) = self.pacing_every {
            settings.pacing_every = every;
        }
        if let Some(pause) = self.pacing_pause_secs {
            settings.pacing_pause_secs = pause;
        }
        if let Some(ref skip) = self.skip_moderators {
            settings.skip_moderators = skip.iter().map(|s| s.to_lowercase()).collect();
        }
        for (frontier, pattern) in &self.patterns {
            settings
                .patterns
                .insert(frontier.to_lowercase(), pattern.clone());
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory or database file (--data flag).
    pub data: Option<PathBuf>,
}

/// Resolved location of a SQLite database given by `--data`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedData {
    pub data_dir: PathBuf,
    pub database_filename: String,
}

impl ResolvedData {
    /// A `.db`/`.sqlite` path names the database itself; anything else is
    /// a directory holding `snowball.db`.
    pub fn from_path(path: &Path) -> Self {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(path)
        };

        let is_db_file = path
            .extension()
            .is_some_and(|ext| ext == "db" || ext == "sqlite" || ext == "sqlite3")
            || path.is_file();

        if is_db_file {
            Self {
                database_filename: path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_DATABASE_FILENAME)
                    .to_string(),
                data_dir: path.parent().unwrap_or(Path::new(".")).to_path_buf(),
            }
        } else {
            Self {
                data_dir: path,
                database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            }
        }
    }
}

/// Look for a config file inside the data directory.
fn find_config_in_data_dir(data_dir: &Path) -> Option<PathBuf> {
    let extensions = ["json", "yaml", "yml", "toml"];
    let basenames = ["snowball", "config"];

    for basename in basenames {
        for ext in extensions {
            let path = data_dir.join(format!("{}.{}", basename, ext));
            if path.exists() {
                return Some(path);
            }
        }
    }
    None
}

async fn load_file_config(options: &LoadOptions, resolved: Option<&ResolvedData>) -> Result<Config, String> {
    // Priority 1: Explicit --config flag
    if let Some(ref config_path) = options.config_path {
        return Config::load_from_path(config_path).await;
    }

    // Priority 2: Config inside the --data directory
    if let Some(resolved) = resolved {
        if let Some(config_path) = find_config_in_data_dir(&resolved.data_dir) {
            tracing::debug!("Found config in data dir: {}", config_path.display());
            return Config::load_from_path(&config_path).await;
        }
    }

    // Priority 3: Auto-discover via prefer
    Ok(Config::load().await)
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<(Settings, Config), String> {
    let resolved = options.data.as_deref().map(ResolvedData::from_path);
    let config = load_file_config(&options, resolved.as_ref()).await?;

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    // --data takes precedence over the config file
    if let Some(resolved) = resolved {
        settings.data_dir = resolved.data_dir;
        settings.database_filename = resolved.database_filename;
    }

    // DATABASE_URL environment variable takes highest precedence
    if let Some(url) = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
        validate_database_url(&url)?;
        tracing::debug!("Using DATABASE_URL from environment: {}", url);
        settings.database_url = Some(url);
    }

    if let Some(token) = std::env::var(ACCESS_TOKEN_ENV).ok().filter(|s| !s.is_empty()) {
        tracing::debug!("Using access token from {}", ACCESS_TOKEN_ENV);
        settings.access_token = Some(token);
    }

    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_apply_to_settings() {
        let config = Config {
            data_dir: Some("crawl".to_string()),
            retry_budget: Some(5),
            pacing_every: Some(0),
            skip_moderators: Some(vec!["AutoModerator".to_string(), "BotDefense".to_string()]),
            patterns: HashMap::from([("Reference".to_string(), r"r/(\w+)".to_string())]),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/srv"));

        assert_eq!(settings.data_dir, PathBuf::from("/srv/crawl"));
        assert_eq!(settings.database_path(), PathBuf::from("/srv/crawl/snowball.db"));
        assert_eq!(settings.skip_moderators, vec!["automoderator", "botdefense"]);
        assert_eq!(settings.patterns.get("reference").map(String::as_str), Some(r"r/(\w+)"));

        let driver = settings.driver_config();
        assert_eq!(driver.retry_budget, 5);
        assert_eq!(driver.pacing_every, 0);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::with_data_dir(PathBuf::from("/data"));
        assert_eq!(settings.database_url(), "sqlite:/data/snowball.db");
        assert_eq!(settings.retry_budget, 3);
        assert_eq!(settings.skip_moderators, vec!["automoderator"]);
        assert_eq!(settings.rate_limit_config().base_delay, Duration::from_millis(1000));
        assert_eq!(settings.create_pool().unwrap().database_url(), "/data/snowball.db");
    }

    #[test]
    fn test_postgres_url_is_rejected() {
        let settings = Settings {
            database_url: Some("postgres://localhost/crawl".to_string()),
            ..Default::default()
        };
        assert!(settings.create_pool().is_err());
    }

    #[test]
    fn test_resolved_data() {
        let resolved = ResolvedData::from_path(Path::new("/tmp/crawls/run1.db"));
        assert_eq!(resolved.data_dir, PathBuf::from("/tmp/crawls"));
        assert_eq!(resolved.database_filename, "run1.db");

        let resolved = ResolvedData::from_path(Path::new("/tmp/crawls/nonexistent-dir"));
        assert_eq!(resolved.data_dir, PathBuf::from("/tmp/crawls/nonexistent-dir"));
        assert_eq!(resolved.database_filename, DEFAULT_DATABASE_FILENAME);
    }

    #[tokio::test]
    async fn test_load_from_path_by_extension() {
        let dir = tempdir().unwrap();

        let toml_path = dir.path().join("snowball.toml");
        fs::write(&toml_path, "retry_budget = 4\n[patterns]\nhyperlink = 'x/(\\w+)'\n").unwrap();
        let config = Config::load_from_path(&toml_path).await.unwrap();
        assert_eq!(config.retry_budget, Some(4));
        assert_eq!(config.base_dir(), Some(dir.path().to_path_buf()));
        assert!(config.patterns.contains_key("hyperlink"));

        let yaml_path = dir.path().join("snowball.yaml");
        fs::write(&yaml_path, "pacing_every: 10\nskip_moderators: [a, b]\n").unwrap();
        let config = Config::load_from_path(&yaml_path).await.unwrap();
        assert_eq!(config.pacing_every, Some(10));
        assert_eq!(config.skip_moderators, Some(vec!["a".to_string(), "b".to_string()]));

        let json_path = dir.path().join("snowball.json");
        fs::write(&json_path, r#"{"request_delay_ms": 250}"#).unwrap();
        let config = Config::load_from_path(&json_path).await.unwrap();
        assert_eq!(config.request_delay_ms, Some(250));

        let bad_path = dir.path().join("bad.json");
        fs::write(&bad_path, "{").unwrap();
        assert!(Config::load_from_path(&bad_path).await.is_err());
    }

    #[tokio::test]
    async fn test_load_settings_with_data_dir_config() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("snowball.json"), r#"{"retry_budget": 7}"#).unwrap();

        let (settings, config) = load_settings_with_options(LoadOptions {
            config_path: None,
            data: Some(dir.path().to_path_buf()),
        })
        .await
        .unwrap();

        assert_eq!(config.retry_budget, Some(7));
        assert_eq!(settings.retry_budget, 7);
        assert_eq!(settings.data_dir, dir.path().to_path_buf());
    }
}
