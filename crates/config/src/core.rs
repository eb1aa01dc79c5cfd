//! Core configuration sections

use crossgrader_types::{ColorChoice, OutputFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    #[serde(default = "default_color_choice")]
    pub color: ColorChoice,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: OutputFormat::Tty,
            color: ColorChoice::Auto,
        }
    }
}

/// Transaction executor limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Ceiling on install/configure passes per batch
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,
    /// Lower bound for `dpkg --abort-after`
    #[serde(default = "default_abort_after_min")]
    pub abort_after_min: usize,
    /// Packages per batch after the leading batch; 0 puts everything in one batch
    #[serde(default)]
    pub batch_size: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
            abort_after_min: default_abort_after_min(),
            batch_size: 0,
        }
    }
}

/// Download-ahead pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Bounded queue capacity between downloader and installer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_download_timeout")]
    pub timeout: u64, // seconds, per package
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            timeout: default_download_timeout(),
        }
    }
}

/// Path configuration; unset entries fall back to `fixed_paths`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    pub storage_dir: Option<PathBuf>,
    pub archives_dir: Option<PathBuf>,
    pub initramfs_hooks_dir: Option<PathBuf>,
    pub hook_functions: Option<PathBuf>,
    pub dpkg_info_dir: Option<PathBuf>,
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Tty
}

fn default_color_choice() -> ColorChoice {
    ColorChoice::Auto
}

fn default_max_passes() -> u32 {
    10
}

fn default_abort_after_min() -> usize {
    50
}

fn default_queue_capacity() -> usize {
    2
}

fn default_download_timeout() -> u64 {
    600 // 10 minutes
}
