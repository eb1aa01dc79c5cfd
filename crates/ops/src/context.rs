//! Operations context for dependency injection

use crossgrader_config::Config;
use crossgrader_dpkg::PackageManager;
use crossgrader_errors::Error;
use crossgrader_events::{EventEmitter, EventSender};
use crossgrader_guard::{ArchVerifier, InitramfsHook};
use crossgrader_install::{Cancellation, InstallConfig, TransactionExecutor, TransactionLock};
use crossgrader_platform::Platform;
use crossgrader_resolver::Resolver;
use crossgrader_state::JournalStore;
use std::sync::Arc;

/// Everything an operation needs, passed explicitly
///
/// There is no global state: the package manager, the transaction lock and
/// the cancellation token all travel through here.
pub struct OpsCtx {
    /// Package-manager adapter
    pub pm: Arc<dyn PackageManager>,
    /// Event sender for progress reporting
    pub tx: EventSender,
    /// System configuration
    pub config: Config,
    /// Process execution and binary inspection
    pub platform: Platform,
    /// Serializes every package-database mutation
    pub lock: TransactionLock,
    /// Checked between package-manager invocations
    pub cancel: Cancellation,
}

impl EventEmitter for OpsCtx {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(&self.tx)
    }
}

impl OpsCtx {
    // No public constructor - use OpsContextBuilder instead

    /// Executor sharing this context's lock and cancellation token
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration names an unknown remediation.
    pub fn executor(&self) -> Result<TransactionExecutor, Error> {
        Ok(
            TransactionExecutor::new(Arc::clone(&self.pm), &self.install_config())?
                .with_lock(self.lock.clone())
                .with_cancellation(self.cancel.clone()),
        )
    }

    #[must_use]
    pub fn install_config(&self) -> InstallConfig {
        InstallConfig::from_config(&self.config)
    }

    /// Resolver rooted at the package manager's own packages
    #[must_use]
    pub fn resolver(&self) -> Resolver {
        Resolver::new(
            Arc::clone(&self.pm),
            self.config.packages.package_manager.clone(),
        )
        .with_events(self.tx.clone())
    }

    #[must_use]
    pub fn verifier(&self) -> ArchVerifier {
        ArchVerifier::new(self.platform.clone())
            .with_event_sender(self.tx.clone())
            .with_package_manager(Arc::clone(&self.pm))
    }

    #[must_use]
    pub fn hook(&self) -> InitramfsHook {
        InitramfsHook::from_config(&self.config).with_event_sender(self.tx.clone())
    }

    #[must_use]
    pub fn journal(&self) -> JournalStore {
        JournalStore::new(self.config.journal_path())
    }
}

/// Builder for the operations context
pub struct OpsContextBuilder {
    pm: Option<Arc<dyn PackageManager>>,
    tx: Option<EventSender>,
    config: Option<Config>,
    platform: Option<Platform>,
    lock: Option<TransactionLock>,
    cancel: Option<Cancellation>,
}

impl OpsContextBuilder {
    /// Create new context builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            pm: None,
            tx: None,
            config: None,
            platform: None,
            lock: None,
            cancel: None,
        }
    }

    /// Set package manager adapter
    #[must_use]
    pub fn with_package_manager(mut self, pm: Arc<dyn PackageManager>) -> Self {
        self.pm = Some(pm);
        self
    }

    /// Set event sender
    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set platform; defaults to the running system
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    #[must_use]
    pub fn with_lock(mut self, lock: TransactionLock) -> Self {
        self.lock = Some(lock);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Build the context
    ///
    /// # Errors
    ///
    /// Returns an error if the package manager, event sender or
    /// configuration is missing.
    pub fn build(self) -> Result<OpsCtx, Error> {
        let pm = self.pm.ok_or_else(|| missing("package_manager"))?;
        let tx = self.tx.ok_or_else(|| missing("event_sender"))?;
        let config = self.config.ok_or_else(|| missing("config"))?;

        Ok(OpsCtx {
            pm,
            tx,
            config,
            platform: self.platform.unwrap_or_else(Platform::current),
            lock: self.lock.unwrap_or_default(),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

impl Default for OpsContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(component: &str) -> Error {
    Error::internal(format!("operations context is missing {component}"))
}
