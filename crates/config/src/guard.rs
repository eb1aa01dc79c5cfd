//! Binary verification configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pre-flight verification run before a stage is declared complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    #[serde(default = "default_preflight")]
    pub preflight: bool,
    /// Binaries that must match the target before reboot
    #[serde(default = "default_boot_binaries")]
    pub boot_binaries: Vec<PathBuf>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            preflight: default_preflight(),
            boot_binaries: default_boot_binaries(),
        }
    }
}

fn default_preflight() -> bool {
    true
}

fn default_boot_binaries() -> Vec<PathBuf> {
    [
        "/bin/sh",
        "/usr/bin/dpkg",
        "/usr/bin/apt-get",
        "/sbin/init",
        "/usr/sbin/update-initramfs",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}
