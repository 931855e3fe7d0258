use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GmailError, Result};
use crate::rate_limiter::RatePolicy;

/// Cost units the heavy policy admits per window
pub const QUOTA_LIMIT: u32 = 500;

/// Messages per grouped fetch
pub const BATCH_SIZE: usize = 50;

/// Units charged per grouped fetch, regardless of how full it is (50 gets x 5 units)
pub const COST_PER_BATCH: u32 = 250;

/// Gmail rejects batches above this size
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Gmail search query; defaults to messages received today
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Look-back period used when no query is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between grouped fetches, on top of the rate limiter
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            query: None,
            days: None,
            page_size: default_page_size(),
            max_messages: None,
            batch_size: default_batch_size(),
            cooldown_ms: default_cooldown_ms(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl FetchConfig {
    /// The query to list with: explicit query, else `after:` a date `days` back
    /// (today when unset)
    pub fn effective_query(&self, today: NaiveDate) -> String {
        if let Some(query) = self.query.as_deref().filter(|q| !q.trim().is_empty()) {
            return query.to_string();
        }
        let since = today - ChronoDuration::days(self.days.unwrap_or(0) as i64);
        format!("after:{}", since.format("%Y/%m/%d"))
    }

    pub fn effective_query_now(&self) -> String {
        self.effective_query(Local::now().date_naive())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_limit")]
    pub limit: u32,
    #[serde(default = "default_cost_per_batch")]
    pub cost_per_batch: u32,
    #[serde(default = "default_light_calls")]
    pub light_calls_per_window: u32,
    #[serde(default = "default_light_window_ms")]
    pub light_window_ms: u64,
    #[serde(default = "default_heavy_window_ms")]
    pub heavy_window_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: default_quota_limit(),
            cost_per_batch: default_cost_per_batch(),
            light_calls_per_window: default_light_calls(),
            light_window_ms: default_light_window_ms(),
            heavy_window_ms: default_heavy_window_ms(),
        }
    }
}

impl QuotaConfig {
    /// Policy for single list/get calls
    pub fn light_policy(&self) -> RatePolicy {
        RatePolicy::light(
            self.light_calls_per_window,
            Duration::from_millis(self.light_window_ms),
        )
    }

    /// Policy for grouped fetches
    pub fn heavy_policy(&self) -> RatePolicy {
        RatePolicy::heavy(self.limit, Duration::from_millis(self.heavy_window_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// Append each record's metadata to `manifest.jsonl`
    #[serde(default = "default_true")]
    pub manifest: bool,
    /// Extra Markdown tidy pass after normalization
    #[serde(default)]
    pub tidy_markdown: bool,
    /// Base for resolving relative links in rendered Markdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            manifest: true,
            tidy_markdown: false,
            base_url: None,
        }
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_batch_size() -> usize {
    BATCH_SIZE
}

fn default_cooldown_ms() -> u64 {
    500
}

fn default_max_concurrent() -> usize {
    10
}

fn default_quota_limit() -> u32 {
    QUOTA_LIMIT
}

fn default_cost_per_batch() -> u32 {
    COST_PER_BATCH
}

fn default_light_calls() -> u32 {
    2
}

fn default_light_window_ms() -> u64 {
    1_000
}

fn default_heavy_window_ms() -> u64 {
    2_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("emails")
}

fn default_true() -> bool {
    true
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config = Self::from_toml(&content)?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetch.page_size == 0 || self.fetch.page_size > 500 {
            return Err(GmailError::ConfigError(
                "fetch.page_size must be between 1 and 500".to_string(),
            ));
        }

        if self.fetch.batch_size == 0 {
            return Err(GmailError::ConfigError(
                "fetch.batch_size must be at least 1".to_string(),
            ));
        }
        if self.fetch.batch_size > MAX_BATCH_SIZE {
            return Err(GmailError::ConfigError(format!(
                "fetch.batch_size cannot exceed {} (Gmail batch request limit)",
                MAX_BATCH_SIZE
            )));
        }

        if self.fetch.max_concurrent_requests == 0 || self.fetch.max_concurrent_requests > 50 {
            return Err(GmailError::ConfigError(
                "fetch.max_concurrent_requests must be between 1 and 50".to_string(),
            ));
        }

        if self.fetch.max_messages == Some(0) {
            return Err(GmailError::ConfigError(
                "fetch.max_messages must be greater than 0 when set".to_string(),
            ));
        }

        if self.quota.limit == 0 || self.quota.cost_per_batch == 0 {
            return Err(GmailError::ConfigError(
                "quota.limit and quota.cost_per_batch must be greater than 0".to_string(),
            ));
        }
        if self.quota.cost_per_batch > self.quota.limit {
            return Err(GmailError::ConfigError(format!(
                "quota.cost_per_batch ({}) cannot exceed quota.limit ({})",
                self.quota.cost_per_batch, self.quota.limit
            )));
        }
        if self.quota.light_calls_per_window == 0 {
            return Err(GmailError::ConfigError(
                "quota.light_calls_per_window must be greater than 0".to_string(),
            ));
        }
        if self.quota.light_window_ms == 0 || self.quota.heavy_window_ms == 0 {
            return Err(GmailError::ConfigError(
                "quota window lengths must be greater than 0".to_string(),
            ));
        }

        if self.output.dir.as_os_str().is_empty() {
            return Err(GmailError::ConfigError(
                "output.dir cannot be empty".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}
