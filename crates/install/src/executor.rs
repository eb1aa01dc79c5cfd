//! Bounded fixed-point transaction executor

use crossgrader_dpkg::{DpkgRunOutcome, FailedUnit, PackageManager, UnitFailure};
use crossgrader_errors::Error;
use crossgrader_events::{AppEvent, EventEmitter, TransactionEvent};
use crossgrader_types::{Arch, PackageRef};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::config::InstallConfig;
use crate::api::context::{BatchContext, RemovalContext};
use crate::api::result::{BatchOutcome, BatchReport, PackageResult, RemovalReport};
use crate::cancel::Cancellation;
use crate::lock::TransactionLock;
use crate::remediation::RemediationSet;

/// Drives install/configure passes until a batch converges or stops progressing
///
/// Every mutation goes through the shared [`TransactionLock`]. Reads of the
/// package database run without it. Cancellation is checked before each
/// invocation, so an interrupted run leaves dpkg between two commands.
#[derive(Clone)]
pub struct TransactionExecutor {
    pm: Arc<dyn PackageManager>,
    lock: TransactionLock,
    cancel: Cancellation,
    remediations: RemediationSet,
    max_passes: u32,
}

impl TransactionExecutor {
    /// # Errors
    ///
    /// Returns an error if the configuration names an unknown remediation.
    pub fn new(pm: Arc<dyn PackageManager>, config: &InstallConfig) -> Result<Self, Error> {
        Ok(Self {
            pm,
            lock: TransactionLock::new(),
            cancel: Cancellation::never(),
            remediations: RemediationSet::from_names(&config.remediations)?,
            max_passes: config.max_passes.max(1),
        })
    }

    #[must_use]
    pub fn with_lock(mut self, lock: TransactionLock) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_remediations(mut self, remediations: RemediationSet) -> Self {
        self.remediations = remediations;
        self
    }

    #[must_use]
    pub fn lock(&self) -> &TransactionLock {
        &self.lock
    }

    #[must_use]
    pub fn package_manager(&self) -> &Arc<dyn PackageManager> {
        &self.pm
    }

    /// Instances that are fully configured right now
    async fn configured(&self) -> Result<BTreeSet<PackageRef>, Error> {
        Ok(self
            .pm
            .list_installed()
            .await?
            .into_iter()
            .filter(|p| p.status.is_configured())
            .map(|p| p.package_ref())
            .collect())
    }

    /// Run one mutating invocation: cancellation check, then the lock
    async fn mutate<T, F>(&self, op: F) -> Result<T, Error>
    where
        F: std::future::Future<Output = Result<T, Error>>,
    {
        self.cancel.check()?;
        self.lock.run(op).await
    }

    /// Install the batch's archives and drive them to a fixed point
    ///
    /// A pass installs every pending archive in one dpkg invocation, applies
    /// remediations to recognized failures and retries those packages, then
    /// runs one `configure -a`. The loop ends when nothing is pending, when a
    /// pass converges no package, or at the pass ceiling. A batch whose
    /// packages are all configured already performs no mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if an invocation cannot be run at all, or on
    /// cancellation. Package failures end up in the report instead.
    pub async fn execute(&self, ctx: &BatchContext) -> Result<BatchReport, Error> {
        let mut report = BatchReport::new(ctx.batch_id.clone());
        let configured = self.configured().await?;

        // Plan order is dependency order; dpkg sees the archives in it
        let mut pending: Vec<(PackageRef, PathBuf)> = Vec::with_capacity(ctx.debs.len());
        let mut seen = BTreeSet::new();
        for (pkg, deb) in &ctx.debs {
            if !seen.insert(pkg) {
                continue;
            }
            if configured.contains(pkg) {
                report.already_converged += 1;
                report.results.insert(pkg.clone(), PackageResult::Succeeded);
            } else {
                pending.push((pkg.clone(), deb.clone()));
            }
        }

        ctx.emit_in_batch(
            &ctx.batch_id,
            AppEvent::Transaction(TransactionEvent::BatchStarted {
                batch_id: ctx.batch_id.clone(),
                packages: ctx.debs.iter().map(|(p, _)| p.to_string()).collect(),
                already_converged: report.already_converged,
            }),
        );

        if pending.is_empty() {
            self.emit_completed(ctx, &report);
            return Ok(report);
        }

        let auto = if ctx.preserve_auto {
            self.pm.auto_installed().await?
        } else {
            BTreeSet::new()
        };
        let targets: Vec<PackageRef> = pending.iter().map(|(p, _)| p.clone()).collect();

        let mut last_failure: BTreeMap<PackageRef, UnitFailure> = BTreeMap::new();
        let mut attempted: BTreeSet<(PackageRef, &'static str)> = BTreeSet::new();

        while !pending.is_empty() {
            if report.passes >= self.max_passes {
                report.outcome = BatchOutcome::Stalled {
                    passes: report.passes,
                };
                ctx.emit_in_batch(
                    &ctx.batch_id,
                    AppEvent::Transaction(TransactionEvent::Stalled {
                        batch_id: ctx.batch_id.clone(),
                        passes: report.passes,
                        pending: pending.iter().map(|(p, _)| p.to_string()).collect(),
                    }),
                );
                break;
            }
            report.passes += 1;
            let pass = report.passes;
            let before = pending.len();
            ctx.emit_in_batch(
                &ctx.batch_id,
                AppEvent::Transaction(TransactionEvent::PassStarted {
                    batch_id: ctx.batch_id.clone(),
                    pass,
                    pending: before,
                }),
            );

            let debs: Vec<PathBuf> = pending.iter().map(|(_, deb)| deb.clone()).collect();
            let outcome = self.mutate(self.pm.install_downloaded(&debs)).await?;

            let mut retry = Vec::new();
            for (pkg, deb) in &pending {
                let Some(failure) = failure_of(&outcome, pkg, deb) else {
                    continue;
                };
                ctx.emit_in_batch(
                    &ctx.batch_id,
                    AppEvent::Transaction(TransactionEvent::PackageFailed {
                        package: pkg.to_string(),
                        signature: failure.kind.to_string(),
                        message: failure.message.clone(),
                    }),
                );
                last_failure.insert(pkg.clone(), failure.clone());

                if failure.kind.is_remediable()
                    && self
                        .remediate(ctx, pkg, &failure, &mut attempted)
                        .await?
                {
                    retry.push(deb.clone());
                }
            }

            if !retry.is_empty() {
                let outcome = self.mutate(self.pm.install_downloaded(&retry)).await?;
                for (pkg, deb) in &pending {
                    if let Some(failure) = failure_of(&outcome, pkg, deb) {
                        last_failure.insert(pkg.clone(), failure);
                    }
                }
            }

            let configure = self.mutate(self.pm.configure_pending()).await?;
            ctx.emit_in_batch(
                &ctx.batch_id,
                AppEvent::Transaction(TransactionEvent::ConfigurePending {
                    pass,
                    success: configure.success(),
                }),
            );

            let mut configured = self.configured().await?;
            if ctx.fix_broken && pending.iter().any(|(p, _)| !configured.contains(p)) {
                self.mutate(self.pm.fix_broken()).await?;
                configured = self.configured().await?;
            }

            pending.retain(|(pkg, _)| !configured.contains(pkg));
            let progressed = before - pending.len();
            ctx.emit_in_batch(
                &ctx.batch_id,
                AppEvent::Transaction(TransactionEvent::PassCompleted {
                    batch_id: ctx.batch_id.clone(),
                    pass,
                    progressed,
                    pending: pending.len(),
                }),
            );

            if progressed == 0 {
                report.outcome = BatchOutcome::NoProgress { pass };
                break;
            }
        }

        let unconverged: BTreeSet<&PackageRef> = pending.iter().map(|(p, _)| p).collect();
        for pkg in &targets {
            let result = match (unconverged.contains(pkg), last_failure.get(pkg)) {
                (false, None) => PackageResult::Succeeded,
                (false, Some(_)) => PackageResult::RetriedAndSucceeded,
                (true, failure) => PackageResult::Failed {
                    kind: failure.map_or(crossgrader_dpkg::FailureKind::Unrecognized, |f| f.kind),
                    message: failure.map(|f| f.message.clone()).unwrap_or_default(),
                },
            };
            report.results.insert(pkg.clone(), result);
        }

        if !auto.is_empty() {
            let remark: Vec<PackageRef> = targets
                .iter()
                .filter(|p| auto.contains(&p.name) && !unconverged.contains(p))
                .cloned()
                .collect();
            self.mutate(self.pm.mark_auto(&remark)).await?;
        }

        self.emit_completed(ctx, &report);
        Ok(report)
    }

    /// Apply the first untried remediation that reports a change
    async fn remediate(
        &self,
        ctx: &BatchContext,
        pkg: &PackageRef,
        failure: &UnitFailure,
        attempted: &mut BTreeSet<(PackageRef, &'static str)>,
    ) -> Result<bool, Error> {
        for remediation in self.remediations.matching(failure.kind) {
            if !attempted.insert((pkg.clone(), remediation.name())) {
                continue;
            }
            let applied = self
                .mutate(remediation.apply(self.pm.as_ref(), pkg, failure))
                .await;
            let success = match applied {
                Ok(changed) => changed,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::debug!(package = %pkg, remediation = remediation.name(), error = %e, "remediation errored");
                    false
                }
            };
            ctx.emit_in_batch(
                &ctx.batch_id,
                AppEvent::Transaction(TransactionEvent::RemediationApplied {
                    package: pkg.to_string(),
                    remediation: remediation.name().to_string(),
                    success,
                }),
            );
            if success {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn emit_completed(&self, ctx: &BatchContext, report: &BatchReport) {
        ctx.emit_in_batch(
            &ctx.batch_id,
            AppEvent::Transaction(TransactionEvent::BatchCompleted {
                batch_id: ctx.batch_id.clone(),
                succeeded: report.succeeded().count(),
                retried: report.retried().count(),
                failed: report.failed().map(|(p, _)| p.to_string()).collect(),
                passes: report.passes,
            }),
        );
    }

    /// Remove every listed package still installed in `ctx.arch`
    ///
    /// Repeats `dpkg --purge` over what is left until nothing remains, a
    /// pass removes nothing, or the pass ceiling is reached.
    ///
    /// # Errors
    ///
    /// Returns an error if dpkg cannot be run or on cancellation.
    pub async fn remove(&self, ctx: &RemovalContext) -> Result<RemovalReport, Error> {
        let wanted: BTreeSet<&str> = ctx.packages.iter().map(String::as_str).collect();
        let mut report = RemovalReport::default();
        let mut remaining = self.installed_in(&ctx.arch, &wanted).await?;

        ctx.emit(AppEvent::Transaction(TransactionEvent::RemovalStarted {
            arch: ctx.arch.to_string(),
            packages: remaining.clone(),
        }));

        let initial: BTreeSet<String> = remaining.iter().cloned().collect();
        while !remaining.is_empty() && report.passes < self.max_passes {
            report.passes += 1;
            let before = remaining.len();
            let outcome = self.mutate(self.pm.remove(&remaining, &ctx.arch)).await?;
            for failure in &outcome.failures {
                ctx.emit(AppEvent::Transaction(TransactionEvent::PackageFailed {
                    package: failure.unit.to_string(),
                    signature: failure.kind.to_string(),
                    message: failure.message.clone(),
                }));
            }
            remaining = self.installed_in(&ctx.arch, &wanted).await?;
            if remaining.len() == before {
                break;
            }
        }

        report.removed = initial
            .into_iter()
            .filter(|name| !remaining.contains(name))
            .collect();
        report.remaining = remaining;

        ctx.emit(AppEvent::Transaction(TransactionEvent::RemovalCompleted {
            arch: ctx.arch.to_string(),
            removed: report.removed.len(),
            remaining: report.remaining.clone(),
        }));
        Ok(report)
    }

    async fn installed_in(&self, arch: &Arch, wanted: &BTreeSet<&str>) -> Result<Vec<String>, Error> {
        let mut names: Vec<String> = self
            .pm
            .list_installed()
            .await?
            .into_iter()
            .filter(|p| &p.arch == arch && p.is_installed() && wanted.contains(p.name.as_str()))
            .map(|p| p.name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Failure reported for `pkg`, matched by archive path first, then by name
fn failure_of(outcome: &DpkgRunOutcome, pkg: &PackageRef, deb: &Path) -> Option<UnitFailure> {
    outcome
        .failure_for(&FailedUnit::Archive(deb.to_path_buf()))
        .or_else(|| outcome.failure_for_package(&pkg.name))
        .cloned()
}
