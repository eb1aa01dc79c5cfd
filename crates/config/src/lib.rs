#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for the crossgrader
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (/etc/crossgrader/config.toml)
//! - Environment variables (`CROSSGRADER_*`)
//! - CLI flags (applied by the binaries)

pub mod core;
pub mod fixed_paths;
pub mod guard;
pub mod packages;

pub use crate::core::{DownloadConfig, GeneralConfig, PathConfig, TransactionConfig};
pub use guard::VerifyConfig;
pub use packages::{PackagesConfig, RemediationConfig};

use crossgrader_errors::{ConfigError, Error};
use crossgrader_types::{ColorChoice, OutputFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub transaction: TransactionConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub paths: PathConfig,

    #[serde(default)]
    pub packages: PackagesConfig,

    #[serde(default)]
    pub remediation: RemediationConfig,

    #[serde(default)]
    pub verify: VerifyConfig,
}

impl Config {
    /// Get the default config file path
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from(fixed_paths::CONFIG_PATH)
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax or out-of-range values.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path();

        if fs::try_exists(&config_path).await.unwrap_or(false) {
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Reject values that would make the executor or pipeline meaningless
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending field.
    pub fn validate(&self) -> Result<(), Error> {
        if self.transaction.max_passes == 0 {
            return Err(invalid("transaction.max_passes", "0"));
        }
        if self.download.queue_capacity == 0 {
            return Err(invalid("download.queue_capacity", "0"));
        }
        if self.download.timeout == 0 {
            return Err(invalid("download.timeout", "0"));
        }
        if self.packages.package_manager.is_empty() {
            return Err(invalid("packages.package_manager", "[]"));
        }
        Ok(())
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        if let Ok(output) = std::env::var("CROSSGRADER_OUTPUT") {
            self.general.default_output = match output.as_str() {
                "plain" => OutputFormat::Plain,
                "tty" => OutputFormat::Tty,
                "json" => OutputFormat::Json,
                _ => return Err(invalid("CROSSGRADER_OUTPUT", &output)),
            };
        }

        if let Ok(color) = std::env::var("CROSSGRADER_COLOR") {
            self.general.color = match color.as_str() {
                "always" => ColorChoice::Always,
                "auto" => ColorChoice::Auto,
                "never" => ColorChoice::Never,
                _ => return Err(invalid("CROSSGRADER_COLOR", &color)),
            };
        }

        if let Ok(passes) = std::env::var("CROSSGRADER_MAX_PASSES") {
            self.transaction.max_passes = match passes.parse() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("CROSSGRADER_MAX_PASSES", &passes)),
            };
        }

        if let Ok(size) = std::env::var("CROSSGRADER_BATCH_SIZE") {
            self.transaction.batch_size = size
                .parse()
                .map_err(|_| invalid("CROSSGRADER_BATCH_SIZE", &size))?;
        }

        if let Ok(timeout) = std::env::var("CROSSGRADER_DOWNLOAD_TIMEOUT") {
            self.download.timeout = match timeout.parse() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("CROSSGRADER_DOWNLOAD_TIMEOUT", &timeout)),
            };
        }

        if let Ok(dir) = std::env::var("CROSSGRADER_STORAGE_DIR") {
            if dir.is_empty() {
                return Err(invalid("CROSSGRADER_STORAGE_DIR", &dir));
            }
            self.paths.storage_dir = Some(PathBuf::from(dir));
        }

        if let Ok(preflight) = std::env::var("CROSSGRADER_PREFLIGHT") {
            self.verify.preflight = match preflight.as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => return Err(invalid("CROSSGRADER_PREFLIGHT", &preflight)),
            };
        }

        if let Ok(list) = std::env::var("CROSSGRADER_REMEDIATIONS") {
            self.remediation.enabled = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(())
    }

    /// Directory for snapshots, the stage journal and cached debs
    #[must_use]
    pub fn storage_dir(&self) -> PathBuf {
        self.paths
            .storage_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(fixed_paths::STORAGE_DIR))
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.storage_dir().join(fixed_paths::SNAPSHOT_FILE)
    }

    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.storage_dir().join(fixed_paths::JOURNAL_FILE)
    }

    #[must_use]
    pub fn emulation_cache_dir(&self) -> PathBuf {
        self.storage_dir().join(fixed_paths::EMULATION_DEBS_DIR)
    }

    #[must_use]
    pub fn hook_functions_backup(&self) -> PathBuf {
        self.storage_dir().join(fixed_paths::HOOK_FUNCTIONS_BACKUP)
    }

    /// Where apt leaves downloaded debs
    #[must_use]
    pub fn archives_dir(&self) -> PathBuf {
        self.paths
            .archives_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(fixed_paths::APT_ARCHIVES_DIR))
    }

    #[must_use]
    pub fn initramfs_hooks_dir(&self) -> PathBuf {
        self.paths
            .initramfs_hooks_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(fixed_paths::INITRAMFS_HOOKS_DIR))
    }

    #[must_use]
    pub fn hook_functions(&self) -> PathBuf {
        self.paths
            .hook_functions
            .clone()
            .unwrap_or_else(|| PathBuf::from(fixed_paths::HOOK_FUNCTIONS))
    }

    #[must_use]
    pub fn dpkg_info_dir(&self) -> PathBuf {
        self.paths
            .dpkg_info_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(fixed_paths::DPKG_INFO_DIR))
    }
}

fn invalid(field: &str, value: &str) -> Error {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
