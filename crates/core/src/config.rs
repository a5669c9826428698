//! Client configuration.

use crate::namespace::Namespace;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default transfer worker pool size.
pub const DEFAULT_WORKERS: usize = 16;

/// Compressed payloads at or above this size go through the blobstore.
pub const DEFAULT_DIRECT_UPLOAD_THRESHOLD: u64 = 20 * 1024;

/// Top-level client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the store (e.g., "https://isolate.example.com/").
    #[serde(default)]
    pub server: String,
    /// Namespace to read from and write to.
    #[serde(default)]
    pub namespace: Namespace,
    /// Number of concurrent transfer workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum compressed size for the direct store endpoint.
    #[serde(default = "default_direct_upload_threshold")]
    pub direct_upload_threshold: u64,
    /// Number of existence queries in flight at once.
    #[serde(default = "default_contains_concurrency")]
    pub contains_concurrency: usize,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_direct_upload_threshold() -> u64 {
    DEFAULT_DIRECT_UPLOAD_THRESHOLD
}

fn default_contains_concurrency() -> usize {
    4
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            namespace: Namespace::default(),
            workers: default_workers(),
            direct_upload_threshold: default_direct_upload_threshold(),
            contains_concurrency: default_contains_concurrency(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for a server with every other field defaulted.
    pub fn for_server(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: &str| Err(crate::Error::InvalidConfig(msg.to_string()));
        if !(self.server.starts_with("http://") || self.server.starts_with("https://")) {
            return Err(crate::Error::InvalidConfig(format!(
                "server must be an http(s) URL, got {:?}",
                self.server
            )));
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.contains_concurrency == 0 {
            return invalid("contains_concurrency must be at least 1");
        }
        if self.batch.max_items == 0 || self.batch.max_bytes == 0 {
            return invalid("batch bounds must be non-zero");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        Ok(())
    }
}

/// Bounds on existence-query batches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of items per batch.
    #[serde(default = "default_batch_max_items")]
    pub max_items: usize,
    /// Maximum cumulative uncompressed bytes per batch.
    #[serde(default = "default_batch_max_bytes")]
    pub max_bytes: u64,
}

fn default_batch_max_items() -> usize {
    1000
}

fn default_batch_max_bytes() -> u64 {
    512 * 1024 * 1024
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items: default_batch_max_items(),
            max_bytes: default_batch_max_bytes(),
        }
    }
}

/// Backoff policy for transient request failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): initial * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self
            .initial_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Download behaviour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Read timeout for retrieve requests, in seconds.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Treat 404 as transient (server eventual consistency).
    #[serde(default = "default_retry_404")]
    pub retry_404: bool,
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_retry_404() -> bool {
    true
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout_secs(),
            retry_404: default_retry_404(),
        }
    }
}

impl DownloadConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
