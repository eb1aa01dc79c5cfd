//! System setup and initialization

use crate::error::CliError;
use crossgrader_config::Config;
use crossgrader_dpkg::{Dpkg, DpkgOptions, PackageManager};
use crossgrader_events::EventSender;
use crossgrader_platform::Platform;
use std::sync::Arc;
use tracing::{debug, info};

/// Creates the storage directory and the dpkg adapter
pub struct SystemSetup {
    config: Config,
    platform: Platform,
}

impl SystemSetup {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            platform: Platform::current(),
        }
    }

    /// Make sure the storage directory exists
    pub async fn initialize(&self) -> Result<(), CliError> {
        let storage = self.config.storage_dir();
        if !tokio::fs::try_exists(&storage).await.unwrap_or(false) {
            debug!("Creating directory: {}", storage.display());
            tokio::fs::create_dir_all(&storage).await.map_err(|e| {
                CliError::Setup(format!("failed to create {}: {e}", storage.display()))
            })?;
        }
        info!(storage = %storage.display(), "system setup completed");
        Ok(())
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// dpkg adapter reporting its commands on `tx`
    pub fn package_manager(&self, tx: &EventSender) -> Arc<dyn PackageManager> {
        let options = DpkgOptions {
            abort_after_min: self.config.transaction.abort_after_min,
            info_dir: self.config.dpkg_info_dir(),
        };
        Arc::new(Dpkg::new(
            self.platform.process_handle(),
            self.platform.create_context(Some(tx.clone())),
            options,
        ))
    }
}
