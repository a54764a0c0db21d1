//! Per-host request throttle.
//!
//! Spaces requests to each host by an adaptive delay, and additionally
//! honours what the API says about its own limits: a `Retry-After` on a
//! throttled response, and an exhausted `x-ratelimit-remaining` quota that
//! holds every request until `x-ratelimit-reset`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Rate limiter tuning.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Delay between requests to one host when not backing off.
    pub base_delay: Duration,
    /// Ceiling for the delay while backing off, and for any server-requested wait.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub recovery_multiplier: f64,
    /// Consecutive successes needed before the delay shrinks.
    pub recovery_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.8,
            recovery_threshold: 5,
        }
    }
}

/// Limit signals read from one response's headers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuotaHeaders {
    /// `Retry-After`, in seconds.
    pub retry_after: Option<Duration>,
    /// `x-ratelimit-remaining`: requests left in the current window.
    pub remaining: Option<f64>,
    /// `x-ratelimit-reset`: seconds until the window resets.
    pub reset: Option<Duration>,
}

impl QuotaHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| -> Option<f64> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && (0.0..1e9).contains(v))
        };
        Self {
            retry_after: number(RETRY_AFTER.as_str()).map(Duration::from_secs_f64),
            remaining: number("x-ratelimit-remaining"),
            reset: number("x-ratelimit-reset").map(Duration::from_secs_f64),
        }
    }

    /// The window is used up and the server said when it reopens.
    fn exhausted_for(&self) -> Option<Duration> {
        match (self.remaining, self.reset) {
            (Some(remaining), Some(reset)) if remaining < 1.0 => Some(reset),
            _ => None,
        }
    }
}

/// Snapshot of one host's limiter state.
#[derive(Debug, Clone)]
pub struct HostStats {
    pub current_delay: Duration,
    pub in_backoff: bool,
    /// Remaining server-imposed hold, if any.
    pub held_for: Duration,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

#[derive(Debug, Clone)]
struct HostState {
    current_delay: Duration,
    last_request: Option<Instant>,
    hold_until: Option<Instant>,
    consecutive_successes: u32,
    in_backoff: bool,
    total_requests: u64,
    rate_limit_hits: u64,
}

impl HostState {
    fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            last_request: None,
            hold_until: None,
            consecutive_successes: 0,
            in_backoff: false,
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    fn held_for(&self) -> Duration {
        self.hold_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    fn time_until_ready(&self) -> Duration {
        let spacing = match self.last_request {
            Some(last) => self.current_delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };
        spacing.max(self.held_for())
    }

    fn hold(&mut self, wait: Duration) {
        let until = Instant::now() + wait;
        if self.hold_until.map_or(true, |current| until > current) {
            self.hold_until = Some(until);
        }
    }

    fn scale_delay(&mut self, factor: f64, ceiling: Duration) {
        let scaled = Duration::from_secs_f64(self.current_delay.as_secs_f64() * factor);
        self.current_delay = scaled.min(ceiling);
    }
}

/// Throttle shared by every request a fetcher makes.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    hosts: Arc<RwLock<HashMap<String, HostState>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            hosts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn extract_host(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_string()))
    }

    /// Wait until the host is ready, then mark a request as started.
    ///
    /// Returns the host to report the response against.
    pub async fn acquire(&self, url: &str) -> Option<String> {
        let host = Self::extract_host(url)?;

        let wait_time = {
            let hosts = self.hosts.read().await;
            hosts
                .get(&host)
                .map(HostState::time_until_ready)
                .unwrap_or(Duration::ZERO)
        };

        if wait_time > Duration::ZERO {
            debug!("Throttling {}: waiting {:?}", host, wait_time);
            tokio::time::sleep(wait_time).await;
        }

        let mut hosts = self.hosts.write().await;
        let state = hosts
            .entry(host.clone())
            .or_insert_with(|| HostState::new(self.config.base_delay));
        state.last_request = Some(Instant::now());
        state.hold_until = None;
        state.total_requests += 1;

        Some(host)
    }

    /// Record a response: status drives the adaptive delay, headers may
    /// impose a hold.
    pub async fn report(&self, host: &str, status: u16, quota: QuotaHeaders) {
        let mut hosts = self.hosts.write().await;
        let Some(state) = hosts.get_mut(host) else {
            return;
        };

        match status {
            429 | 503 => {
                state.rate_limit_hits += 1;
                state.consecutive_successes = 0;
                state.in_backoff = true;
                state.scale_delay(self.config.backoff_multiplier, self.config.max_delay);
                if let Some(wait) = quota.retry_after {
                    state.hold(wait.min(self.config.max_delay));
                }
                warn!(
                    "Throttled by {} (HTTP {}), delay now {:?}, hold {:?}",
                    host,
                    status,
                    state.current_delay,
                    state.held_for()
                );
            }
            500..=599 => {
                state.consecutive_successes = 0;
                state.scale_delay(1.5, self.config.max_delay);
                debug!("Server error from {}, delay now {:?}", host, state.current_delay);
            }
            200..=299 => {
                state.consecutive_successes += 1;
                if state.in_backoff
                    && state.consecutive_successes >= self.config.recovery_threshold
                {
                    state.consecutive_successes = 0;
                    state.scale_delay(self.config.recovery_multiplier, self.config.max_delay);
                    if state.current_delay <= self.config.base_delay {
                        state.in_backoff = false;
                        state.current_delay = self.config.base_delay;
                        info!("Host {} recovered from backoff", host);
                    }
                }
            }
            _ => {}
        }

        if let Some(reset) = quota.exhausted_for() {
            let wait = reset.min(self.config.max_delay);
            info!("Request quota for {} exhausted, holding {:?}", host, wait);
            state.hold(wait);
        }
    }

    pub async fn get_stats(&self) -> HashMap<String, HostStats> {
        let hosts = self.hosts.read().await;
        hosts
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    HostStats {
                        current_delay: v.current_delay,
                        in_backoff: v.in_backoff,
                        held_for: v.held_for(),
                        total_requests: v.total_requests,
                        rate_limit_hits: v.rate_limit_hits,
                    },
                )
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn fast_config() -> RateLimitConfig {
        RateLimitConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            recovery_threshold: 2,
            ..Default::default()
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            RateLimiter::extract_host("https://www.reddit.com/r/rust/about.json"),
            Some("www.reddit.com".to_string())
        );
        assert_eq!(RateLimiter::extract_host("not a url"), None);
    }

    #[test]
    fn test_quota_headers() {
        let quota = QuotaHeaders::from_headers(&headers(&[
            ("retry-after", "7"),
            ("x-ratelimit-remaining", "0.0"),
            ("x-ratelimit-reset", "42"),
            ("x-ratelimit-used", "600"),
        ]));
        assert_eq!(quota.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(quota.remaining, Some(0.0));
        assert_eq!(quota.exhausted_for(), Some(Duration::from_secs(42)));

        let plenty = QuotaHeaders::from_headers(&headers(&[
            ("x-ratelimit-remaining", "598.0"),
            ("x-ratelimit-reset", "42"),
        ]));
        assert_eq!(plenty.exhausted_for(), None);

        let garbage = QuotaHeaders::from_headers(&headers(&[("retry-after", "soon")]));
        assert_eq!(garbage, QuotaHeaders::default());
    }

    #[tokio::test]
    async fn test_backoff_then_recovery() {
        let limiter = RateLimiter::with_config(fast_config());

        limiter.acquire("https://example.com/a").await;
        limiter.report("example.com", 429, QuotaHeaders::default()).await;

        let stats = limiter.get_stats().await;
        let host = stats.get("example.com").unwrap();
        assert!(host.current_delay >= Duration::from_millis(19));
        assert!(host.current_delay <= Duration::from_millis(21));
        assert!(host.in_backoff);
        assert_eq!(host.rate_limit_hits, 1);
        assert_eq!(host.held_for, Duration::ZERO);

        for _ in 0..10 {
            limiter.report("example.com", 200, QuotaHeaders::default()).await;
        }
        let stats = limiter.get_stats().await;
        let host = stats.get("example.com").unwrap();
        assert!(!host.in_backoff);
        assert_eq!(host.current_delay, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_backoff_is_capped() {
        let limiter = RateLimiter::with_config(fast_config());
        limiter.acquire("https://example.com/a").await;
        for _ in 0..10 {
            limiter.report("example.com", 503, QuotaHeaders::default()).await;
        }
        let stats = limiter.get_stats().await;
        assert_eq!(
            stats.get("example.com").unwrap().current_delay,
            Duration::from_millis(100)
        );
    }

    #[tokio::test]
    async fn test_retry_after_holds_next_request() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(1),
            ..Default::default()
        });
        limiter.acquire("https://example.com/a").await;
        let quota = QuotaHeaders {
            retry_after: Some(Duration::from_millis(80)),
            ..Default::default()
        };
        limiter.report("example.com", 429, quota).await;

        let held = limiter.get_stats().await["example.com"].held_for;
        assert!(held > Duration::from_millis(40));

        let started = Instant::now();
        limiter.acquire("https://example.com/b").await;
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(limiter.get_stats().await["example.com"].held_for, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_exhausted_quota_holds_even_on_success() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::ZERO,
            max_delay: Duration::from_millis(50),
            ..Default::default()
        });
        limiter.acquire("https://example.com/a").await;
        let quota = QuotaHeaders {
            remaining: Some(0.0),
            reset: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        limiter.report("example.com", 200, quota).await;

        let stats = limiter.get_stats().await;
        let host = &stats["example.com"];
        assert!(host.held_for > Duration::ZERO);
        assert!(host.held_for <= Duration::from_millis(50));
        assert_eq!(host.rate_limit_hits, 0);
    }
}
