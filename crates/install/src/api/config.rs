use crossgrader_config::Config;
use std::time::Duration;

/// Executor and download pipeline settings
#[derive(Clone, Debug)]
pub struct InstallConfig {
    /// Pass ceiling for one batch
    pub max_passes: u32,
    /// Remediations to apply, in order
    pub remediations: Vec<String>,
    /// Batches downloaded ahead of the one being installed
    pub queue_capacity: usize,
    /// Per-package download timeout
    pub download_timeout: Duration,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl InstallConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_passes: config.transaction.max_passes,
            remediations: config.remediation.enabled.clone(),
            queue_capacity: config.download.queue_capacity,
            download_timeout: Duration::from_secs(config.download.timeout),
        }
    }

    #[must_use]
    pub fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes;
        self
    }

    #[must_use]
    pub fn with_remediations(mut self, remediations: Vec<String>) -> Self {
        self.remediations = remediations;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }
}
