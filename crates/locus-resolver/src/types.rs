//! Shared types and resolver configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheLimits;

/// A resolved attribute value (a declared location).
pub type Attribute = String;

/// Answer from the authoritative resolver for a single subject.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthoritativeResponse {
    /// Declared attribute; `None` means the source has none.
    pub attribute: Option<Attribute>,

    /// The source signalled that we are over its rate limit.
    pub rate_limited: bool,

    /// When the rate limit lifts (only meaningful if `rate_limited`).
    pub reset_at: Option<DateTime<Utc>>,
}

impl AuthoritativeResponse {
    /// Subject has the given attribute.
    pub fn found(attribute: impl Into<Attribute>) -> Self {
        Self {
            attribute: Some(attribute.into()),
            ..Default::default()
        }
    }

    /// Subject confirmed to have no attribute.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Rate limited until `reset_at` (if the source told us).
    pub fn rate_limited(reset_at: Option<DateTime<Utc>>) -> Self {
        Self {
            attribute: None,
            rate_limited: true,
            reset_at,
        }
    }
}

/// Synchronous snapshot for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Whether the slow lane is currently paused by a rate limit.
    pub rate_limited: bool,

    /// Last reported reset time.
    #[serde(default)]
    pub reset_at: Option<DateTime<Utc>>,

    /// Requests waiting in either lane.
    pub queue_depth: usize,
}

/// Resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Base URL of the shared location cache.
    #[serde(default = "default_cloud_url")]
    pub cloud_url: String,

    /// Authoritative profile endpoint.
    #[serde(default = "default_profile_url")]
    pub profile_url: String,

    /// Bearer token for the authoritative endpoint.
    #[serde(default)]
    pub profile_token: Option<String>,

    /// Persisted cache file.
    #[serde(default)]
    pub cache_file: Option<PathBuf>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Retries for transient shared-cache failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Queue and timing behaviour.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Local cache bounds.
    #[serde(default)]
    pub cache: CacheLimits,
}

/// Timing and batching knobs for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Subjects per shared-cache lookup.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay before the first fast-lane batch, so bursts share a batch.
    #[serde(default = "default_fast_lane_delay_ms")]
    pub fast_lane_delay_ms: u64,

    /// Pause between consecutive fast-lane batches.
    #[serde(default = "default_fast_lane_yield_ms")]
    pub fast_lane_yield_ms: u64,

    /// Pause after each authoritative lookup.
    #[serde(default = "default_slow_lane_interval_ms")]
    pub slow_lane_interval_ms: u64,

    /// Longest single sleep while rate limited.
    #[serde(default = "default_rate_limit_poll_cap_ms")]
    pub rate_limit_poll_cap_ms: u64,

    /// Deadline for one authoritative lookup.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Window in which cache writes are coalesced into one save.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,

    /// Periodic flush interval while started.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_cloud_url() -> String {
    "https://locus-cloud.invalid".to_string()
}

fn default_profile_url() -> String {
    "https://profile.invalid/AboutAccountQuery".to_string()
}

fn default_http_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    1
}

fn default_batch_size() -> usize {
    20
}

fn default_fast_lane_delay_ms() -> u64 {
    100
}

fn default_fast_lane_yield_ms() -> u64 {
    50
}

fn default_slow_lane_interval_ms() -> u64 {
    1_500
}

fn default_rate_limit_poll_cap_ms() -> u64 {
    30_000
}

fn default_lookup_timeout_ms() -> u64 {
    10_000
}

fn default_save_debounce_ms() -> u64 {
    2_000
}

fn default_flush_interval_ms() -> u64 {
    30_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            fast_lane_delay_ms: default_fast_lane_delay_ms(),
            fast_lane_yield_ms: default_fast_lane_yield_ms(),
            slow_lane_interval_ms: default_slow_lane_interval_ms(),
            rate_limit_poll_cap_ms: default_rate_limit_poll_cap_ms(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            save_debounce_ms: default_save_debounce_ms(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl QueueConfig {
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn fast_lane_delay(&self) -> Duration {
        Duration::from_millis(self.fast_lane_delay_ms)
    }

    pub fn fast_lane_yield(&self) -> Duration {
        Duration::from_millis(self.fast_lane_yield_ms)
    }

    pub fn slow_lane_interval(&self) -> Duration {
        Duration::from_millis(self.slow_lane_interval_ms)
    }

    pub fn rate_limit_poll_cap(&self) -> Duration {
        Duration::from_millis(self.rate_limit_poll_cap_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cloud_url: default_cloud_url(),
            profile_url: default_profile_url(),
            profile_token: None,
            cache_file: None,
            http_timeout_secs: default_http_timeout(),
            max_retries: default_max_retries(),
            queue: QueueConfig::default(),
            cache: CacheLimits::default(),
        }
    }
}

impl ResolverConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `LOCUS_CLOUD_URL` | Shared cache base URL |
    /// | `LOCUS_PROFILE_URL` | Authoritative endpoint |
    /// | `LOCUS_PROFILE_TOKEN` | Bearer token for the authoritative endpoint |
    /// | `LOCUS_CACHE_FILE` | Persisted cache file |
    /// | `LOCUS_HTTP_TIMEOUT` | Request timeout in seconds |
    /// | `LOCUS_MAX_RETRIES` | Shared cache retries |
    pub fn from_env() -> Self {
        Self {
            cloud_url: std::env::var("LOCUS_CLOUD_URL").unwrap_or_else(|_| default_cloud_url()),
            profile_url: std::env::var("LOCUS_PROFILE_URL")
                .unwrap_or_else(|_| default_profile_url()),
            profile_token: std::env::var("LOCUS_PROFILE_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            cache_file: std::env::var("LOCUS_CACHE_FILE").ok().map(PathBuf::from),
            http_timeout_secs: std::env::var("LOCUS_HTTP_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_http_timeout),
            max_retries: std::env::var("LOCUS_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_retries),
            queue: QueueConfig::default(),
            cache: CacheLimits::default(),
        }
    }

    /// Set the shared cache URL.
    pub fn with_cloud_url(mut self, url: impl Into<String>) -> Self {
        self.cloud_url = url.into();
        self
    }

    /// Set the authoritative endpoint.
    pub fn with_profile_url(mut self, url: impl Into<String>) -> Self {
        self.profile_url = url.into();
        self
    }

    /// Set the authoritative bearer token.
    pub fn with_profile_token(mut self, token: impl Into<String>) -> Self {
        self.profile_token = Some(token.into());
        self
    }

    /// Set the persisted cache file.
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    /// Replace queue timing.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Replace cache bounds.
    pub fn with_cache_limits(mut self, limits: CacheLimits) -> Self {
        self.cache = limits;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        std::env::remove_var("LOCUS_CLOUD_URL");
        std::env::remove_var("LOCUS_PROFILE_TOKEN");
        std::env::remove_var("LOCUS_MAX_RETRIES");

        let config = ResolverConfig::from_env();
        assert_eq!(config.cloud_url, "https://locus-cloud.invalid");
        assert!(config.profile_token.is_none());
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.queue.batch_size, 20);
    }

    #[test]
    #[serial]
    fn test_config_from_env_overrides() {
        std::env::set_var("LOCUS_CLOUD_URL", "https://cloud.example.dev");
        std::env::set_var("LOCUS_MAX_RETRIES", "4");
        std::env::set_var("LOCUS_PROFILE_TOKEN", "");

        let config = ResolverConfig::from_env();
        assert_eq!(config.cloud_url, "https://cloud.example.dev");
        assert_eq!(config.max_retries, 4);
        assert!(config.profile_token.is_none(), "empty token means none");

        std::env::remove_var("LOCUS_CLOUD_URL");
        std::env::remove_var("LOCUS_MAX_RETRIES");
        std::env::remove_var("LOCUS_PROFILE_TOKEN");
    }

    #[test]
    fn test_config_builder() {
        let config = ResolverConfig::default()
            .with_cloud_url("https://cloud.example.dev")
            .with_profile_url("https://profile.example.dev/q")
            .with_profile_token("secret")
            .with_cache_file("/tmp/locations.json");

        assert_eq!(config.cloud_url, "https://cloud.example.dev");
        assert_eq!(config.profile_url, "https://profile.example.dev/q");
        assert_eq!(config.profile_token.as_deref(), Some("secret"));
        assert_eq!(
            config.cache_file,
            Some(PathBuf::from("/tmp/locations.json"))
        );
    }

    #[test]
    fn test_queue_config_defaults_from_partial_json() {
        let queue: QueueConfig = serde_json::from_str(r#"{"batch_size": 5}"#).unwrap();
        assert_eq!(queue.batch_size, 5);
        assert_eq!(queue.slow_lane_interval(), Duration::from_millis(1_500));
        assert_eq!(queue.lookup_timeout(), Duration::from_secs(10));
        assert_eq!(queue.rate_limit_poll_cap(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let queue = QueueConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert_eq!(queue.batch_size(), 1);
    }
}
