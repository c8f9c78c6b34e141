use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::store::LogStoreConfig;

pub const DEFAULT_MAX_ENTRIES: usize = 5;
pub const DEFAULT_STORE_PATH: &str = "custq.log";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Capacity of the in-memory queue.
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: String,
    pub fsync_every_n: Option<usize>,
    pub fsync_interval_ms: Option<u64>,
    pub compact_after: Option<usize>,
}

impl StoreConfig {
    pub fn log_store_config(&self) -> LogStoreConfig {
        LogStoreConfig {
            fsync_every_n: self.fsync_every_n,
            fsync_interval: self.fsync_interval_ms.map(Duration::from_millis),
            compact_after: self.compact_after,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    queue: FileQueueConfig,
    #[serde(default)]
    store: FileStoreConfig,
    #[serde(default)]
    logging: FileLoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
struct FileQueueConfig {
    max_entries: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
struct FileStoreConfig {
    path: Option<String>,
    fsync_every_n: Option<usize>,
    fsync_interval_ms: Option<u64>,
    compact_after: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
struct FileLoggingConfig {
    filter: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig {
                max_entries: DEFAULT_MAX_ENTRIES,
            },
            store: StoreConfig {
                path: DEFAULT_STORE_PATH.to_string(),
                fsync_every_n: Some(1),
                fsync_interval_ms: None,
                compact_after: Some(1024),
            },
            logging: LoggingConfig {
                filter: DEFAULT_LOG_FILTER.to_string(),
            },
        }
    }
}

impl Config {
    fn load_file<P: AsRef<Path>>(path: P) -> Result<FileConfig, ConfigError> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref)?;
        let ext = path_ref
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("toml")
            .to_ascii_lowercase();

        if ext == "yaml" || ext == "yml" {
            let cfg: FileConfig = serde_yaml::from_str(&raw)?;
            Ok(cfg)
        } else {
            let cfg: FileConfig = toml::from_str(&raw)?;
            Ok(cfg)
        }
    }

    /// Parse TOML text without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file_cfg: FileConfig = toml::from_str(raw)?;
        Self::from_file_config(file_cfg).validated()
    }

    /// Load configuration from an optional file path and environment variables.
    ///
    /// Precedence: built-in defaults, then file values, then environment
    /// overrides. The file path comes from `path` or `CUSTQ_CONFIG`.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let env_path = env::var("CUSTQ_CONFIG").ok();
        let effective_path = path.map(|s| s.to_string()).or(env_path);

        let file_cfg = if let Some(p) = effective_path {
            Self::load_file(p)?
        } else {
            FileConfig::default()
        };

        let mut cfg = Self::from_file_config(file_cfg);

        if let Ok(v) = env::var("CUSTQ_MAX_ENTRIES") {
            cfg.queue.max_entries = v
                .parse()
                .map_err(|e| ConfigError::Parse(format!("CUSTQ_MAX_ENTRIES: {e}")))?;
        }

        if let Ok(v) = env::var("CUSTQ_STORE_PATH") {
            cfg.store.path = v;
        }

        if let Ok(v) = env::var("CUSTQ_FSYNC_EVERY_N") {
            cfg.store.fsync_every_n = parse_optional(&v)
                .map_err(|e| ConfigError::Parse(format!("CUSTQ_FSYNC_EVERY_N: {e}")))?;
        }

        if let Ok(v) = env::var("CUSTQ_COMPACT_AFTER") {
            cfg.store.compact_after = parse_optional(&v)
                .map_err(|e| ConfigError::Parse(format!("CUSTQ_COMPACT_AFTER: {e}")))?;
        }

        if let Ok(v) = env::var("CUSTQ_LOG") {
            cfg.logging.filter = v;
        }

        cfg.validated()
    }

    fn from_file_config(file_cfg: FileConfig) -> Self {
        let defaults = Config::default();
        Config {
            queue: QueueConfig {
                max_entries: file_cfg
                    .queue
                    .max_entries
                    .unwrap_or(defaults.queue.max_entries),
            },
            store: StoreConfig {
                path: file_cfg.store.path.unwrap_or(defaults.store.path),
                fsync_every_n: count_policy(
                    file_cfg.store.fsync_every_n,
                    defaults.store.fsync_every_n,
                ),
                fsync_interval_ms: file_cfg.store.fsync_interval_ms,
                compact_after: count_policy(
                    file_cfg.store.compact_after,
                    defaults.store.compact_after,
                ),
            },
            logging: LoggingConfig {
                filter: file_cfg.logging.filter.unwrap_or(defaults.logging.filter),
            },
        }
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.queue.max_entries < 1 {
            return Err(ConfigError::Invalid(
                "queue.max_entries must be at least 1".to_string(),
            ));
        }
        if self.store.path.trim().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".to_string()));
        }
        Ok(self)
    }
}

/// A file value of `0` disables a count-based policy, as `"0"` does in the
/// environment; an absent value keeps the default.
fn count_policy(file_value: Option<usize>, default: Option<usize>) -> Option<usize> {
    match file_value {
        Some(0) => None,
        Some(n) => Some(n),
        None => default,
    }
}

/// `"off"` / `"none"` / `"0"` disable a count-based policy.
fn parse_optional(v: &str) -> Result<Option<usize>, std::num::ParseIntError> {
    match v.trim().to_ascii_lowercase().as_str() {
        "off" | "none" | "0" => Ok(None),
        other => other.parse().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.queue.max_entries, 5);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [queue]
            max_entries = 8

            [store]
            path = "/var/lib/custq/q.log"
            fsync_every_n = 16
            fsync_interval_ms = 250

            [logging]
            filter = "custq=debug"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.queue.max_entries, 8);
        assert_eq!(cfg.store.path, "/var/lib/custq/q.log");
        assert_eq!(cfg.store.compact_after, Some(1024));
        assert_eq!(cfg.logging.filter, "custq=debug");

        let log_cfg = cfg.store.log_store_config();
        assert_eq!(log_cfg.fsync_every_n, Some(16));
        assert_eq!(log_cfg.fsync_interval, Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let err = Config::from_toml_str("[queue]\nmax_entries = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            Config::from_toml_str("[queue]\nmax_entires = 3\n"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn zero_in_file_disables_count_policies() {
        let cfg = Config::from_toml_str(
            "[store]\nfsync_every_n = 0\ncompact_after = 0\n",
        )
        .unwrap();
        assert_eq!(cfg.store.fsync_every_n, None);
        assert_eq!(cfg.store.compact_after, None);
        assert_eq!(cfg.store.log_store_config().fsync_every_n, None);
        assert_eq!(parse_optional("0").unwrap(), cfg.store.fsync_every_n);
    }

    #[test]
    fn optional_counts_can_be_disabled() {
        assert_eq!(parse_optional("off").unwrap(), None);
        assert_eq!(parse_optional("64").unwrap(), Some(64));
        assert!(parse_optional("lots").is_err());
    }
}
