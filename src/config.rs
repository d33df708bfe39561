//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub compactor: CompactorConfig,
}

fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("mediastore"))
        .unwrap_or_else(|| PathBuf::from("./mediastore_data"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            compactor: CompactorConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}

/// Retention windows for historical index tables.
///
/// Loaded and validated only; no compaction runs against it.
#[derive(Debug, Clone, Deserialize)]
pub struct CompactorConfig {
    #[serde(default = "default_compact_after")]
    pub after_days: u32,

    #[serde(default = "default_discard_after")]
    pub discard_after_days: u32,
}

fn default_compact_after() -> u32 {
    3
}

fn default_discard_after() -> u32 {
    7
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            after_days: default_compact_after(),
            discard_after_days: default_discard_after(),
        }
    }
}

/// Ordered list of index schema periods
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_period_configs")]
    pub configs: Vec<PeriodConfig>,
}

fn default_period_configs() -> Vec<PeriodConfig> {
    vec![PeriodConfig::default()]
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            configs: default_period_configs(),
        }
    }
}

/// Index layout in effect from `from` until the next period starts
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeriodConfig {
    #[serde(default = "default_period_from")]
    pub from: NaiveDate,

    #[serde(default = "default_schema_version")]
    pub schema: String,

    #[serde(default = "default_row_shards")]
    pub row_shards: u32,

    #[serde(default)]
    pub index_tables: PeriodicTableConfig,
}

fn default_period_from() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn default_schema_version() -> String {
    "v1".to_string()
}

fn default_row_shards() -> u32 {
    16
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            from: default_period_from(),
            schema: default_schema_version(),
            row_shards: default_row_shards(),
            index_tables: PeriodicTableConfig::default(),
        }
    }
}

impl PeriodConfig {
    /// Start of the period in milliseconds (midnight UTC)
    pub fn from_ms(&self) -> i64 {
        self.from
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(0)
    }
}

/// Table naming rule
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeriodicTableConfig {
    #[serde(default)]
    pub prefix: String,

    /// Zero means one fixed table named `prefix`
    #[serde(default = "default_table_period")]
    pub period_secs: u64,
}

fn default_table_period() -> u64 {
    24 * 60 * 60
}

impl Default for PeriodicTableConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            period_secs: default_table_period(),
        }
    }
}

impl PeriodicTableConfig {
    /// Table name covering the Unix time `unix_secs`
    pub fn table_for(&self, unix_secs: i64) -> String {
        if self.period_secs == 0 {
            return self.prefix.clone();
        }
        format!("{}{}", self.prefix, unix_secs / self.period_secs as i64)
    }
}

/// Index client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Worker pool size shared by all parallel queries
    #[serde(default = "default_query_parallelism")]
    pub query_parallelism: usize,

    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_query_parallelism() -> usize {
    100
}

fn default_reload_interval() -> u64 {
    600 // 10 minutes
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            query_parallelism: default_query_parallelism(),
            reload_interval_secs: default_reload_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Config rooted at `root` with every other setting defaulted
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::new(root),
            ..Default::default()
        }
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("mediastore").join("config.toml")),
            Some(PathBuf::from("/etc/mediastore/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("MEDIASTORE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }

        if let Ok(n) = std::env::var("MEDIASTORE_QUERY_PARALLELISM") {
            if let Ok(n) = n.parse() {
                self.index.query_parallelism = n;
            }
        }

        if let Ok(level) = std::env::var("MEDIASTORE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("MEDIASTORE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let configs = &self.schema.configs;
        if configs.is_empty() {
            return Err(ConfigError::Invalid("schema.configs is empty".into()));
        }
        for pair in configs.windows(2) {
            if pair[1].from <= pair[0].from {
                return Err(ConfigError::Invalid(format!(
                    "schema periods out of order: {} after {}",
                    pair[1].from, pair[0].from
                )));
            }
        }
        for cfg in configs {
            if cfg.schema != "v1" {
                return Err(ConfigError::Invalid(format!(
                    "unknown schema version {:?}",
                    cfg.schema
                )));
            }
            if cfg.index_tables.period_secs % default_table_period() != 0 {
                return Err(ConfigError::Invalid(
                    "the table period must be a multiple of 24h".into(),
                ));
            }
            if cfg.index_tables.period_secs == 0 && cfg.index_tables.prefix.is_empty() {
                return Err(ConfigError::Invalid(
                    "a fixed index table needs a non-empty prefix".into(),
                ));
            }
        }
        if self.index.query_parallelism == 0 {
            return Err(ConfigError::Invalid(
                "index.query_parallelism must be positive".into(),
            ));
        }
        let compactor = &self.storage.compactor;
        if compactor.discard_after_days < compactor.after_days {
            return Err(ConfigError::Invalid(
                "compactor.discard_after_days precedes after_days".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Mediastore Configuration
#
# Environment variables override these settings:
# - MEDIASTORE_ROOT
# - MEDIASTORE_QUERY_PARALLELISM
# - MEDIASTORE_LOG_LEVEL
# - MEDIASTORE_LOG_FORMAT

[storage]
# Directory holding blobs/, ingest/ and labels/
root = "~/.local/share/mediastore"

[storage.compactor]
after_days = 3
discard_after_days = 7

# Index schema periods, oldest first
[[schema.configs]]
from = "2022-01-01"
schema = "v1"
row_shards = 16

[schema.configs.index_tables]
prefix = ""
# One table per day
period_secs = 86400

[index]
# Parallel index queries across all callers
query_parallelism = 100

# How often to drop tables whose directory was removed
reload_interval_secs = 600

# Upper bound on flushing tables at shutdown
shutdown_timeout_secs = 30

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty, json
format = "pretty"

# Optional log file
# file = "/var/log/mediastore.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.schema.configs.len(), 1);
        let period = &config.schema.configs[0];
        assert_eq!(period.schema, "v1");
        assert_eq!(period.row_shards, 16);
        assert_eq!(period.index_tables.period_secs, 86400);
        assert_eq!(config.index.query_parallelism, 100);
        assert_eq!(config.storage.compactor.after_days, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.schema.configs[0].from, default_period_from());
        assert_eq!(config.index.reload_interval_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_period_from_ms() {
        let period = PeriodConfig::default();
        assert_eq!(period.from_ms(), 1_640_995_200_000);
    }

    #[test]
    fn test_table_for() {
        let daily = PeriodicTableConfig {
            prefix: "index_".into(),
            period_secs: 86400,
        };
        assert_eq!(daily.table_for(86400 * 19127 + 5), "index_19127");

        let fixed = PeriodicTableConfig {
            prefix: "all".into(),
            period_secs: 0,
        };
        assert_eq!(fixed.table_for(12345), "all");
    }

    #[test]
    fn test_validate_rejects_bad_periods() {
        let mut config = Config::default();
        config.schema.configs[0].index_tables.period_secs = 3600;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schema.configs[0].schema = "v9".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schema.configs.push(PeriodConfig::default());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schema.configs.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schema.configs[0].index_tables.period_secs = 0;
        config.schema.configs[0].index_tables.prefix = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.schema.configs[0].index_tables.prefix = "all".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\nroot = \"/srv/media\"\n[index]\nquery_parallelism = 8\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/srv/media"));
        assert_eq!(config.index.query_parallelism, 8);
        assert_eq!(config.schema.configs.len(), 1);

        let missing = Config::load(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
