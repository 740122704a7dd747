use serde::Deserialize;
use std::path::Path;

use crate::buffer::BufferPolicy;
use crate::model::partition::PartitionBucketType;

/// Top-level config loaded from `grepwise.toml` (§6 recognized keys plus
/// the structural config needed to stand the subsystems up).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GrepwiseConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub buffer: BufferSection,
    #[serde(default)]
    pub partition: PartitionSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub retention: RetentionSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub smtp: SmtpSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory under which `partitions/` and the config sqlite
    /// database live.
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: default_storage_root() }
    }
}

fn default_storage_root() -> String {
    "./data".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferSection {
    #[serde(default = "default_buffer_max_size")]
    pub max_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_buffer_policy")]
    pub policy: BufferPolicyConfig,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            max_size: default_buffer_max_size(),
            flush_interval_ms: default_flush_interval_ms(),
            policy: default_buffer_policy(),
        }
    }
}

fn default_buffer_max_size() -> usize {
    10_000
}
fn default_flush_interval_ms() -> u64 {
    1_000
}
fn default_buffer_policy() -> BufferPolicyConfig {
    BufferPolicyConfig::DropOldest
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BufferPolicyConfig {
    Backpressure,
    DropOldest,
}

impl From<BufferPolicyConfig> for BufferPolicy {
    fn from(c: BufferPolicyConfig) -> Self {
        match c {
            BufferPolicyConfig::Backpressure => BufferPolicy::Backpressure,
            BufferPolicyConfig::DropOldest => BufferPolicy::DropOldest,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSection {
    #[serde(default = "default_partition_type", rename = "type")]
    pub bucket_type: PartitionBucketType,
    #[serde(default = "default_partition_max_active")]
    pub max_active: usize,
    #[serde(default)]
    pub auto_archive: bool,
}

impl Default for PartitionSection {
    fn default() -> Self {
        Self {
            bucket_type: default_partition_type(),
            max_active: default_partition_max_active(),
            auto_archive: false,
        }
    }
}

fn default_partition_type() -> PartitionBucketType {
    PartitionBucketType::Daily
}
fn default_partition_max_active() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSection {
    #[serde(default = "default_cache_max_size")]
    pub max_size: u64,
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_ms: default_cache_ttl_ms(),
            enabled: true,
        }
    }
}

fn default_cache_max_size() -> u64 {
    1_000
}
fn default_cache_ttl_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSection {
    #[serde(default = "default_retention_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self { sweep_interval_ms: default_retention_sweep_interval_ms() }
    }
}

fn default_retention_sweep_interval_ms() -> u64 {
    3_600_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSection {
    #[serde(default = "default_scheduler_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self { tick_ms: default_scheduler_tick_ms() }
    }
}

fn default_scheduler_tick_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngestSection {
    #[serde(default)]
    pub syslog_udp_port: Option<u16>,
    #[serde(default)]
    pub syslog_tcp_port: Option<u16>,
    #[serde(default)]
    pub file_tail: Vec<FileTailSourceConfig>,
    #[serde(default)]
    pub cloud_pull: Vec<CloudPullSourceConfig>,
    /// Overridden by the `GREPWISE_HTTP_PUSH_TOKEN` environment variable.
    #[serde(default)]
    pub http_push_bearer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudPullSourceConfig {
    pub source_id: String,
    pub endpoint: String,
    #[serde(default = "default_query_refresh_interval_secs")]
    pub query_refresh_interval_secs: u64,
}

fn default_query_refresh_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTailSourceConfig {
    pub source_id: String,
    pub file_pattern: String,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_scan_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Plain,
    NginxCommon,
    NginxCombined,
    Apache,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SmtpSection {
    pub host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user: Option<String>,
    /// Overridden by the `GREPWISE_SMTP_PASS` environment variable; never
    /// stored in the TOML file in practice.
    pub pass: Option<String>,
    #[serde(default = "default_smtp_from")]
    pub from: String,
}

fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_from() -> String {
    "grepwise@localhost".to_string()
}

fn default_true() -> bool {
    true
}

impl GrepwiseConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't
    /// exist, matching the teacher's `WideConfig::load`. Secrets (SMTP
    /// password, HTTP push bearer token) are then overridden from the
    /// environment via `dotenvy`, following `main.rs`'s existing
    /// `WIDE_SMTP_*`/`CLICKHOUSE_*` convention.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            Self::default()
        } else {
            let contents = std::fs::read_to_string(path)?;
            let config: GrepwiseConfig = toml::from_str(&contents)?;
            tracing::info!("loaded config from {}", path.display());
            config
        };

        dotenvy::dotenv().ok();
        if let Ok(pass) = std::env::var("GREPWISE_SMTP_PASS") {
            config.smtp.pass = Some(pass);
        }
        if let Ok(user) = std::env::var("GREPWISE_SMTP_USER") {
            config.smtp.user = Some(user);
        }
        if let Ok(token) = std::env::var("GREPWISE_HTTP_PUSH_TOKEN") {
            config.ingest.http_push_bearer_token = Some(token);
        }
        Ok(config)
    }

    pub fn buffer_config(&self) -> crate::buffer::BufferConfig {
        crate::buffer::BufferConfig {
            max_size: self.buffer.max_size,
            flush_interval: std::time::Duration::from_millis(self.buffer.flush_interval_ms),
            policy: self.buffer.policy.into(),
            ..crate::buffer::BufferConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = GrepwiseConfig::load("/nonexistent/grepwise.toml").unwrap();
        assert_eq!(config.buffer.max_size, 10_000);
        assert_eq!(config.cache.ttl_ms, 30_000);
    }

    #[test]
    fn parses_recognized_keys() {
        let toml = r#"
            [buffer]
            maxSize = 500
            flushIntervalMs = 250
            policy = "BACKPRESSURE"

            [partition]
            type = "WEEKLY"
            maxActive = 4
            autoArchive = true

            [cache]
            maxSize = 64
            ttlMs = 5000
            enabled = false
        "#;
        let config: GrepwiseConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.buffer.max_size, 500);
        assert!(matches!(config.buffer.policy, BufferPolicyConfig::Backpressure));
        assert!(matches!(config.partition.bucket_type, PartitionBucketType::Weekly));
        assert_eq!(config.partition.max_active, 4);
        assert!(!config.cache.enabled);
    }
}
