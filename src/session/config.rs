//! Upload session configuration

use crate::error::{Result, UploaderError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Redundancy accepted by the bridge, inclusive
pub const MAX_REDUNDANCY: u32 = 12;
/// File concurrency above this is allowed but logged as a caution
pub const RECOMMENDED_MAX_FILE_CONCURRENCY: u32 = 6;

pub const ENV_FILE_CONCURRENCY: &str = "STORAGE_UPLOADER_FILE_CONCURRENCY";
pub const ENV_SHARD_CONCURRENCY: &str = "STORAGE_UPLOADER_SHARD_CONCURRENCY";
pub const ENV_REDUNDANCY: &str = "STORAGE_UPLOADER_REDUNDANCY";

/// Configuration for one upload session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SessionConfig {
    /// Bucket the files are uploaded to
    pub bucket: String,

    /// Paths or glob patterns selecting the files
    pub selectors: Vec<String>,

    /// Files progressing through the pipeline at once (default: 1)
    pub file_concurrency: u32,

    /// Shard transfer concurrency handed to the client (default: 6)
    pub shard_concurrency: u32,

    /// Mirrors requested per shard, 0 disables mirroring (default: 0)
    pub redundancy: u32,

    /// Hard cap on write token attempts per job (default: 1000)
    pub token_attempts: u32,

    /// Delay between token attempts in milliseconds, 0 retries immediately
    pub token_retry_backoff_ms: u64,

    /// Interval of the free memory check (default: 3000)
    pub memory_poll_interval_ms: u64,

    /// Free memory under which the session aborts (default: 8 MB)
    pub low_memory_threshold_bytes: u64,

    /// Plaintext read size for the encryption stage (default: 64 KiB)
    pub chunk_size: usize,

    /// Parent directory for job workspaces (default: system temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            selectors: Vec::new(),
            file_concurrency: 1,
            shard_concurrency: 6,
            redundancy: 0,
            token_attempts: 1000,
            token_retry_backoff_ms: 0,
            memory_poll_interval_ms: 3000,
            low_memory_threshold_bytes: 8_000_000,
            chunk_size: 64 * 1024,
            temp_root: None,
        }
    }
}

impl SessionConfig {
    /// Create a configuration for `bucket` with default settings
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Add a path or glob pattern
    pub fn add_selector<S: Into<String>>(mut self, selector: S) -> Self {
        self.selectors.push(selector.into());
        self
    }

    pub fn selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn file_concurrency(mut self, concurrency: u32) -> Self {
        self.file_concurrency = concurrency;
        self
    }

    pub fn shard_concurrency(mut self, concurrency: u32) -> Self {
        self.shard_concurrency = concurrency;
        self
    }

    pub fn redundancy(mut self, redundancy: u32) -> Self {
        self.redundancy = redundancy;
        self
    }

    pub fn token_attempts(mut self, attempts: u32) -> Self {
        self.token_attempts = attempts;
        self
    }

    pub fn token_retry_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.token_retry_backoff_ms = backoff_ms;
        self
    }

    pub fn memory_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.memory_poll_interval_ms = interval_ms;
        self
    }

    pub fn low_memory_threshold_bytes(mut self, threshold: u64) -> Self {
        self.low_memory_threshold_bytes = threshold;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn temp_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.temp_root = Some(path.into());
        self
    }

    pub fn token_backoff(&self) -> Duration {
        Duration::from_millis(self.token_retry_backoff_ms)
    }

    pub fn memory_poll_interval(&self) -> Duration {
        Duration::from_millis(self.memory_poll_interval_ms)
    }

    /// Override concurrency and redundancy from the environment
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |name: &str, value: String| -> Result<u32> {
            value.trim().parse::<u32>().map_err(|_| {
                UploaderError::config_error(name, format!("{} is not a valid number", value))
            })
        };

        if let Some(value) = lookup(ENV_FILE_CONCURRENCY) {
            self.file_concurrency = parse(ENV_FILE_CONCURRENCY, value)?;
        }
        if let Some(value) = lookup(ENV_SHARD_CONCURRENCY) {
            self.shard_concurrency = parse(ENV_SHARD_CONCURRENCY, value)?;
        }
        if let Some(value) = lookup(ENV_REDUNDANCY) {
            self.redundancy = parse(ENV_REDUNDANCY, value)?;
        }
        Ok(self)
    }

    /// Pre-flight checks; no file is touched before these pass
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(UploaderError::config_error("bucket", "Bucket id cannot be empty"));
        }

        if self.file_concurrency < 1 {
            return Err(UploaderError::config_error(
                "file-concurrency",
                "File Concurrency cannot be less than 1",
            ));
        }

        if self.shard_concurrency < 1 {
            return Err(UploaderError::config_error(
                "shard-concurrency",
                "Shard Concurrency cannot be less than 1",
            ));
        }

        if self.redundancy > MAX_REDUNDANCY {
            return Err(UploaderError::config_error(
                "redundancy",
                format!("{} is an invalid Redundancy value", self.redundancy),
            ));
        }

        if self.token_attempts < 1 {
            return Err(UploaderError::config_error(
                "token-attempts",
                "At least one token attempt is required",
            ));
        }

        if self.chunk_size == 0 {
            return Err(UploaderError::config_error(
                "chunk-size",
                "Chunk size must be greater than 0",
            ));
        }

        if self.memory_poll_interval_ms == 0 {
            return Err(UploaderError::config_error(
                "memory-poll-interval-ms",
                "Poll interval must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Non-fatal warnings about the configuration
    pub fn cautions(&self) -> Vec<String> {
        let mut cautions = Vec::new();

        if self.file_concurrency > RECOMMENDED_MAX_FILE_CONCURRENCY {
            cautions.push(format!(
                "A file concurrency of {} may result in issues!",
                self.file_concurrency
            ));
        }

        if self.redundancy == 0 {
            cautions.push(format!(
                "A redundancy of {} means files will not be mirrored!",
                self.redundancy
            ));
        }

        cautions
    }

    /// Convert the configuration to a JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(UploaderError::from)
    }

    /// Create a configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(UploaderError::from)
    }
}
