//! Download-ahead pipeline
//!
//! A producer task downloads batch `n + 1` while batch `n` installs. The
//! queue between them is bounded, so the producer waits once it is
//! `queue_capacity` batches ahead. Each download has its own timeout, so a
//! stalled mirror turns into a failed package instead of a blocked install.

use crossgrader_dpkg::PackageManager;
use crossgrader_errors::{Error, TransactionError, UserFacingError};
use crossgrader_events::{AppEvent, DownloadEvent, EventEmitter, EventSender, FailureContext};
use crossgrader_types::{Arch, PackageRef};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::config::InstallConfig;
use crate::cancel::Cancellation;

/// Archives fetched for one batch
#[derive(Debug, Clone)]
pub struct DownloadedBatch {
    /// Position in the plan
    pub index: usize,
    pub debs: Vec<(PackageRef, PathBuf)>,
    /// Packages skipped because their target instance is already configured
    pub converged: Vec<PackageRef>,
    /// Packages that could not be downloaded, with the reason
    pub failures: Vec<(PackageRef, String)>,
}

/// Download-ahead producer configuration
#[derive(Clone)]
pub struct DownloadPipeline {
    pm: Arc<dyn PackageManager>,
    dest: PathBuf,
    capacity: usize,
    timeout: Duration,
    tx: Option<EventSender>,
}

impl EventEmitter for DownloadPipeline {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

/// Consumer end of a running pipeline; dropping it stops the producer
pub struct DownloadQueue {
    rx: mpsc::Receiver<DownloadedBatch>,
    handle: JoinHandle<Result<(), Error>>,
    finished: bool,
}

impl DownloadPipeline {
    pub fn new(pm: Arc<dyn PackageManager>, dest: impl Into<PathBuf>, config: &InstallConfig) -> Self {
        Self {
            pm,
            dest: dest.into(),
            capacity: config.queue_capacity.max(1),
            timeout: config.download_timeout,
            tx: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Start downloading `batches` for `arch` in plan order
    #[must_use]
    pub fn spawn(self, batches: Vec<Vec<String>>, arch: Arch, cancel: Cancellation) -> DownloadQueue {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = tokio::spawn(async move { self.produce(batches, &arch, &cancel, tx).await });
        DownloadQueue {
            rx,
            handle,
            finished: false,
        }
    }

    async fn produce(
        &self,
        batches: Vec<Vec<String>>,
        arch: &Arch,
        cancel: &Cancellation,
        queue: mpsc::Sender<DownloadedBatch>,
    ) -> Result<(), Error> {
        for (index, names) in batches.into_iter().enumerate() {
            let batch = self.fetch(index, names, arch, cancel).await?;
            if queue.capacity() == 0 {
                self.emit(AppEvent::Download(DownloadEvent::QueueFull {
                    capacity: self.capacity,
                }));
            }
            if queue.send(batch).await.is_err() {
                // Consumer went away; nothing left to feed
                return Ok(());
            }
        }
        Ok(())
    }

    /// Download one batch, skipping instances that are already configured
    ///
    /// # Errors
    ///
    /// Returns an error if the package database cannot be read or on
    /// cancellation. Individual download failures are recorded in the batch.
    pub async fn fetch(
        &self,
        index: usize,
        names: Vec<String>,
        arch: &Arch,
        cancel: &Cancellation,
    ) -> Result<DownloadedBatch, Error> {
        let configured: BTreeSet<PackageRef> = self
            .pm
            .list_installed()
            .await?
            .into_iter()
            .filter(|p| p.status.is_configured())
            .map(|p| p.package_ref())
            .collect();

        let mut batch = DownloadedBatch {
            index,
            debs: Vec::new(),
            converged: Vec::new(),
            failures: Vec::new(),
        };
        for name in names {
            let target = PackageRef::new(name, arch.clone());
            if configured.contains(&target) {
                batch.converged.push(target);
                continue;
            }
            cancel.check()?;
            match self.download_one(&target).await {
                Ok((identity, path)) => batch.debs.push((identity, path)),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => batch.failures.push((target, e.user_message().into_owned())),
            }
        }
        Ok(batch)
    }

    async fn download_one(&self, target: &PackageRef) -> Result<(PackageRef, PathBuf), Error> {
        self.emit(AppEvent::Download(DownloadEvent::Started {
            package: target.name.clone(),
            arch: target.arch.to_string(),
        }));

        let fetched = tokio::time::timeout(
            self.timeout,
            self.pm.download(&target.name, &target.arch, &self.dest),
        )
        .await
        .unwrap_or_else(|_| {
            Err(TransactionError::DownloadTimeout {
                package: target.to_string(),
                timeout_seconds: self.timeout.as_secs(),
            }
            .into())
        });

        // arch:all packages come back as name:all; key the deb by what it installs
        let result = match fetched {
            Ok(path) => self.pm.deb_identity(&path).await.map(|id| (id, path)),
            Err(e) => Err(e),
        };

        match &result {
            Ok((_, path)) => self.emit(AppEvent::Download(DownloadEvent::Completed {
                package: target.name.clone(),
                path: path.display().to_string(),
            })),
            Err(e) => self.emit(AppEvent::Download(DownloadEvent::Failed {
                package: target.name.clone(),
                failure: FailureContext::from_error(e),
            })),
        }
        result
    }
}

impl DownloadQueue {
    /// Next downloaded batch, or `None` when the plan is exhausted
    ///
    /// # Errors
    ///
    /// Returns the producer's error once the queue drains after it failed.
    pub async fn next(&mut self) -> Result<Option<DownloadedBatch>, Error> {
        if let Some(batch) = self.rx.recv().await {
            return Ok(Some(batch));
        }
        if self.finished {
            return Ok(None);
        }
        self.finished = true;
        match (&mut self.handle).await {
            Ok(Ok(())) => Ok(None),
            Ok(Err(e)) => Err(e),
            Err(join) => Err(Error::internal(format!("download task failed: {join}"))),
        }
    }
}

impl Drop for DownloadQueue {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
