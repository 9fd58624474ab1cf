//! Dispatcher configuration.
//!
//! Values come from three layers, last one wins:
//!
//! 1. [`DispatcherConfig::default`]
//! 2. a YAML file ([`DispatcherConfig::from_yaml_file`])
//! 3. `AI_DISPATCH_*` environment variables ([`DispatcherConfig::apply_env_overrides`])
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AI_DISPATCH_MAX_REQUESTS` | `max_requests_per_interval` |
//! | `AI_DISPATCH_MAX_TOKENS` | `max_tokens_per_interval` |
//! | `AI_DISPATCH_INTERVAL_SECS` | `interval_seconds` |
//! | `AI_DISPATCH_MAX_ATTEMPTS` | `max_attempts` |
//! | `AI_DISPATCH_WORKERS` | `workers` |
//! | `AI_DISPATCH_QUEUE_CAPACITY` | `queue_capacity` |
//! | `AI_DISPATCH_ENCODING` | `token_encoding_name` |
//! | `AI_DISPATCH_BASE_URL` | `base_url` |
//! | `AI_DISPATCH_HTTP_TIMEOUT_SECS` | `http_timeout_secs` |

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_REQUESTS_PER_INTERVAL: u64 = 1_000;
pub const DEFAULT_MAX_TOKENS_PER_INTERVAL: u64 = 100_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RATE_LIMIT_BACKOFF_SECS: u64 = 15;
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub max_requests_per_interval: u64,
    pub max_tokens_per_interval: u64,
    pub interval_seconds: u64,
    /// Attempts per item, the first one included.
    pub max_attempts: u32,
    /// Upper bound on how long a blocked worker waits before re-checking capacity.
    pub poll_interval_seconds: f64,
    pub rate_limit_backoff_seconds: f64,
    pub token_encoding_name: String,
    pub workers: usize,
    /// `None` means unbounded.
    pub queue_capacity: Option<usize>,
    pub base_url: String,
    pub http_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_requests_per_interval: DEFAULT_MAX_REQUESTS_PER_INTERVAL,
            max_tokens_per_interval: DEFAULT_MAX_TOKENS_PER_INTERVAL,
            interval_seconds: 60,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval_seconds: 1.0,
            rate_limit_backoff_seconds: DEFAULT_RATE_LIMIT_BACKOFF_SECS as f64,
            token_encoding_name: "cl100k_base".to_string(),
            workers: 8,
            queue_capacity: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            http_timeout_secs: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_requests_per_interval(mut self, n: u64) -> Self {
        self.max_requests_per_interval = n;
        self
    }

    pub fn with_max_tokens_per_interval(mut self, n: u64) -> Self {
        self.max_tokens_per_interval = n;
        self
    }

    pub fn with_interval_seconds(mut self, secs: u64) -> Self {
        self.interval_seconds = secs;
        self
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_poll_interval_seconds(mut self, secs: f64) -> Self {
        self.poll_interval_seconds = secs;
        self
    }

    pub fn with_rate_limit_backoff_seconds(mut self, secs: f64) -> Self {
        self.rate_limit_backoff_seconds = secs;
        self
    }

    pub fn with_token_encoding_name(mut self, name: impl Into<String>) -> Self {
        self.token_encoding_name = name.into();
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_http_timeout_secs(mut self, secs: u64) -> Self {
        self.http_timeout_secs = secs;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Only meaningful on a config that passed [`validate`](Self::validate).
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_seconds)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_backoff_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                "failed to parse dispatcher config",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config_loader"),
            )
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read config file {}", path.display()),
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    /// Apply `AI_DISPATCH_*` overrides from the process environment.
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key)?.trim().parse().ok()
        }

        if let Some(n) = parsed(&lookup, "AI_DISPATCH_MAX_REQUESTS") {
            self.max_requests_per_interval = n;
        }
        if let Some(n) = parsed(&lookup, "AI_DISPATCH_MAX_TOKENS") {
            self.max_tokens_per_interval = n;
        }
        if let Some(n) = parsed(&lookup, "AI_DISPATCH_INTERVAL_SECS") {
            self.interval_seconds = n;
        }
        if let Some(n) = parsed(&lookup, "AI_DISPATCH_MAX_ATTEMPTS") {
            self.max_attempts = n;
        }
        if let Some(n) = parsed(&lookup, "AI_DISPATCH_WORKERS") {
            self.workers = n;
        }
        if let Some(n) = parsed(&lookup, "AI_DISPATCH_QUEUE_CAPACITY") {
            self.queue_capacity = Some(n);
        }
        if let Some(name) = lookup("AI_DISPATCH_ENCODING").filter(|s| !s.trim().is_empty()) {
            self.token_encoding_name = name.trim().to_string();
        }
        if let Some(url) = lookup("AI_DISPATCH_BASE_URL").filter(|s| !s.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(n) = parsed(&lookup, "AI_DISPATCH_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = n;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, msg: &str| {
            Err(Error::configuration_with_context(
                msg,
                ErrorContext::new()
                    .with_field_path(field)
                    .with_source("config_validator"),
            ))
        };

        if self.interval_seconds == 0 {
            return invalid("interval_seconds", "replenish interval must be positive");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts", "at least one attempt is required");
        }
        if self.workers == 0 {
            return invalid("workers", "at least one worker is required");
        }
        if self.queue_capacity == Some(0) {
            return invalid("queue_capacity", "a bounded queue needs room for one item");
        }
        match Duration::try_from_secs_f64(self.poll_interval_seconds) {
            Ok(d) if !d.is_zero() => {}
            _ => {
                return invalid(
                    "poll_interval_seconds",
                    "poll interval must be a positive duration",
                )
            }
        }
        if Duration::try_from_secs_f64(self.rate_limit_backoff_seconds).is_err() {
            return invalid(
                "rate_limit_backoff_seconds",
                "rate-limit backoff must be a zero or positive duration",
            );
        }
        Ok(())
    }
}
