//! Service configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables of the form `LINEAGE__SECTION__KEY` (for example
//! `LINEAGE__RETENTION__MAX_AGE_DAYS=30`). Every field has a default, so an
//! empty file is a valid configuration.

#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use lineage_core::errors::{ExError, ExErrorKind, ExResult};
use lineage_core::hasher::HashingOptions;
use lineage_core::logging_facility::Profile;
use lineage_core::retention::RetentionPolicy;
use lineage_store::RetryConfig;
use serde::Deserialize;

const ENV_PREFIX: &str = "LINEAGE";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    pub storage: StorageConfig,
    pub hashing: HashingOptions,
    pub dual_write: DualWriteConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/objects`
    pub objects_dir: Option<PathBuf>,
    /// Defaults to `<data_dir>/lineage.db`
    pub database: Option<PathBuf>,
    pub retry: RetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".lineage"),
            objects_dir: None,
            database: None,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DualWriteConfig {
    pub enabled: bool,
    /// Summaries waiting for the legacy writer; further ones are dropped
    pub queue_capacity: usize,
    /// Defaults to `<data_dir>/legacy.jsonl`
    pub legacy_path: Option<PathBuf>,
}

impl Default for DualWriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1024,
            legacy_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_versions_per_root: Option<usize>,
    pub max_age_days: Option<i64>,
    pub min_age_days: i64,
    /// How long soft-deleted records are kept before the hard purge
    pub audit_window_days: i64,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_versions_per_root: None,
            max_age_days: None,
            min_age_days: 1,
            audit_window_days: 30,
            sweep_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub profile: Profile,
}

fn config_error(err: config::ConfigError) -> ExError {
    ExError::new(ExErrorKind::Config)
        .with_op("load_config")
        .with_message(err.to_string())
}

/// A whole number of days as a duration
///
/// # Errors
///
/// `InvalidInput` when the count does not fit a `chrono::Duration`.
pub fn duration_days(name: &str, days: i64) -> ExResult<chrono::Duration> {
    chrono::Duration::try_days(days).ok_or_else(|| {
        ExError::new(ExErrorKind::InvalidInput)
            .with_op("duration_days")
            .with_message(format!("{} = {} is out of range", name, days))
    })
}

fn config_days(name: &str, days: i64) -> ExResult<chrono::Duration> {
    duration_days(name, days).map_err(|_| invalid(&format!("{} = {} is out of range", name, days)))
}

fn invalid(message: &str) -> ExError {
    ExError::new(ExErrorKind::Config)
        .with_op("validate_config")
        .with_message(message.to_string())
}

impl LineageConfig {
    /// Load from `path` (if given and present) plus environment overrides
    ///
    /// # Errors
    ///
    /// `Config` when the file cannot be parsed, a value has the wrong type,
    /// or validation fails.
    pub fn load(path: Option<&Path>) -> ExResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let cfg: LineageConfig = builder
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(toml: &str) -> ExResult<Self> {
        let cfg: LineageConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Configuration rooted at `data_dir` with every other value defaulted
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::default();
        cfg.storage.data_dir = data_dir.into();
        cfg
    }

    pub fn validate(&self) -> ExResult<()> {
        if self.dual_write.queue_capacity == 0 {
            return Err(invalid("dual_write.queue_capacity must be at least 1"));
        }
        self.policy()?
            .validate()
            .map_err(|e| invalid(&e.to_string()))?;
        if self.retention.audit_window_days < 0 {
            return Err(invalid("retention.audit_window_days must not be negative"));
        }
        self.audit_window()?;
        if self.retention.sweep_interval_secs == 0 {
            return Err(invalid("retention.sweep_interval_secs must be at least 1"));
        }
        Ok(())
    }

    /// Retention defaults for the CLI and the background sweep
    ///
    /// # Errors
    ///
    /// `Config` when a day count is out of range.
    pub fn policy(&self) -> ExResult<RetentionPolicy> {
        let mut policy = RetentionPolicy::new().with_min_age(config_days(
            "retention.min_age_days",
            self.retention.min_age_days,
        )?);
        if let Some(max) = self.retention.max_versions_per_root {
            policy = policy.with_max_versions_per_root(max);
        }
        if let Some(days) = self.retention.max_age_days {
            policy = policy.with_max_age(config_days("retention.max_age_days", days)?);
        }
        Ok(policy)
    }

    pub fn audit_window(&self) -> ExResult<chrono::Duration> {
        config_days("retention.audit_window_days", self.retention.audit_window_days)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retention.sweep_interval_secs)
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("lineage.db"))
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.storage
            .objects_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("objects"))
    }

    pub fn legacy_path(&self) -> PathBuf {
        self.dual_write
            .legacy_path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("legacy.jsonl"))
    }
}
