use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::types::Channel;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `CAMPAIGN_DISPATCH__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

// ─── Dispatch Config ────────────────────────────────────────────────────────

/// Throughput and retry limits for one channel dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelLimits {
    /// Sends admitted per refill interval (token-bucket capacity).
    pub max_sends: u32,
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default)]
    pub backoff_jitter: bool,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl ChannelLimits {
    pub fn with_rate(max_sends: u32) -> Self {
        Self {
            max_sends,
            refill_interval_ms: default_refill_interval_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_jitter: false,
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

fn default_refill_interval_ms() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_backoff_max_ms() -> u64 {
    10_000
}
fn default_attempt_timeout_ms() -> u64 {
    5_000
}
fn default_max_in_flight() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_call_limits")]
    pub call: ChannelLimits,
    #[serde(default = "default_social_limits")]
    pub social: ChannelLimits,
    #[serde(default = "default_text_limits")]
    pub text: ChannelLimits,
    #[serde(default = "default_email_limits")]
    pub email: ChannelLimits,
}

impl DispatchConfig {
    pub fn for_channel(&self, channel: Channel) -> &ChannelLimits {
        match channel {
            Channel::Call => &self.call,
            Channel::Social => &self.social,
            Channel::Text => &self.text,
            Channel::Email => &self.email,
        }
    }
}

fn default_call_limits() -> ChannelLimits {
    ChannelLimits {
        max_in_flight: 4,
        attempt_timeout_ms: 30_000,
        ..ChannelLimits::with_rate(5)
    }
}
fn default_social_limits() -> ChannelLimits {
    ChannelLimits::with_rate(10)
}
fn default_text_limits() -> ChannelLimits {
    ChannelLimits::with_rate(20)
}
fn default_email_limits() -> ChannelLimits {
    ChannelLimits {
        max_in_flight: 64,
        ..ChannelLimits::with_rate(50)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call: default_call_limits(),
            social: default_social_limits(),
            text: default_text_limits(),
            email: default_email_limits(),
        }
    }
}

// ─── Segmentation Config ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_rule_depth")]
    pub max_rule_depth: usize,
}

fn default_page_size() -> usize {
    500
}
fn default_max_rule_depth() -> usize {
    16
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_rule_depth: default_max_rule_depth(),
        }
    }
}

// ─── Ingest Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// How long an inbound stage transition waits for its `sent` event.
    #[serde(default = "default_reorder_wait_ms")]
    pub reorder_wait_ms: u64,
    #[serde(default = "default_max_pending_per_lead")]
    pub max_pending_per_lead: usize,
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: i64,
}

impl IngestConfig {
    pub fn reorder_wait(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.reorder_wait_ms as i64)
    }
}

fn default_reorder_wait_ms() -> u64 {
    30_000
}
fn default_max_pending_per_lead() -> usize {
    64
}
fn default_max_clock_skew_secs() -> i64 {
    300
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            reorder_wait_ms: default_reorder_wait_ms(),
            max_pending_per_lead: default_max_pending_per_lead(),
            max_clock_skew_secs: default_max_clock_skew_secs(),
        }
    }
}

// ─── Analytics Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Width of the rolling time buckets.
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: u64,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_clickhouse_db")]
    pub database: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_bucket_secs() -> u64 {
    3600
}
fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}
fn default_clickhouse_db() -> String {
    "campaign_dispatch".to_string()
}
fn default_batch_size() -> usize {
    10000
}
fn default_flush_interval_ms() -> u64 {
    1000
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            bucket_secs: default_bucket_secs(),
            clickhouse: ClickHouseConfig::default(),
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_clickhouse_url(),
            database: default_clickhouse_db(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

// ─── Feature Gate Config ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_dispatch_enabled")]
    pub dispatch_enabled: bool,
    #[serde(default)]
    pub disabled_accounts: Vec<Uuid>,
    #[serde(default)]
    pub enabled_accounts: Vec<Uuid>,
}

fn default_dispatch_enabled() -> bool {
    true
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            dispatch_enabled: default_dispatch_enabled(),
            disabled_accounts: Vec::new(),
            enabled_accounts: Vec::new(),
        }
    }
}

// ─── Scheduler Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_reorder_sweep_interval_ms")]
    pub reorder_sweep_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_reorder_sweep_interval_ms() -> u64 {
    5000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            reorder_sweep_interval_ms: default_reorder_sweep_interval_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            dispatch: DispatchConfig::default(),
            segmentation: SegmentationConfig::default(),
            ingest: IngestConfig::default(),
            analytics: AnalyticsConfig::default(),
            features: FeatureConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_DISPATCH")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_per_channel() {
        let config = AppConfig::default();
        assert_eq!(config.dispatch.for_channel(Channel::Call).max_sends, 5);
        assert_eq!(config.dispatch.for_channel(Channel::Email).max_sends, 50);
        assert_eq!(
            config.dispatch.for_channel(Channel::Text).refill_interval(),
            Duration::from_secs(1)
        );
        assert!(config.features.dispatch_enabled);
        assert!(!config.analytics.clickhouse.enabled);
    }

    #[test]
    fn test_partial_channel_limits_fill_defaults() {
        let limits: ChannelLimits = serde_json::from_str(r#"{"max_sends": 2}"#).unwrap();
        assert_eq!(limits.max_sends, 2);
        assert_eq!(limits.max_retries, 3);
        assert_eq!(limits.attempt_timeout_ms, 5_000);
        assert!(!limits.backoff_jitter);
    }
}
