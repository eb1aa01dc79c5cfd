//! Three-stage crossgrade state machine
//!
//! Every stage follows the same shape: check the journal, select packages
//! from live state, order them, download ahead and install batch by batch,
//! then record the outcome. Nothing about the work itself is persisted, so a
//! rerun after a crash or a failed stage simply recomputes what is left.

use crossgrader_errors::{Error, GuardError, StageError};
use crossgrader_events::{
    AppEvent, EventEmitter, FailureContext, SelectionReason, SnapshotEvent, StageEvent,
};
use crossgrader_install::{
    BatchContext, BatchReport, DownloadPipeline, PackageResult, RemovalContext,
    TransactionExecutor,
};
use crossgrader_platform::fs::{list_dir, remove_dir_all_if_exists};
use crossgrader_platform::system::{arch_support, ArchSupport};
use crossgrader_state::{StageOutcome, StageRecord};
use crossgrader_types::{PackageRef, Stage};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::context::OpsCtx;
use crate::selection::{emit_selected, Selection, TargetSelector};
use crate::session::CrossgradeSession;
use crate::types::{BatchSummary, StagePlan, StageReport};

/// Drives one session through its stage
pub struct StageController<'a> {
    ctx: &'a OpsCtx,
    session: CrossgradeSession,
}

impl<'a> StageController<'a> {
    #[must_use]
    pub fn new(ctx: &'a OpsCtx, session: CrossgradeSession) -> Self {
        Self { ctx, session }
    }

    #[must_use]
    pub fn session(&self) -> &CrossgradeSession {
        &self.session
    }

    /// Plan and execute the session's stage
    ///
    /// A stage that ends with stuck packages still returns `Ok`; the report's
    /// outcome is `Failed` and [`StageReport::error`] describes why.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal forbids the stage, selection is
    /// blocked (unavailable packages, remnant hooks), or the package manager
    /// cannot be driven at all.
    pub async fn run(&self) -> Result<StageReport, Error> {
        let plan = self.prepare().await?;
        self.execute(plan).await
    }

    /// Announce the stage, check the journal and plan
    ///
    /// Lets a caller show the plan and ask for confirmation before
    /// [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run), minus execution failures.
    pub async fn prepare(&self) -> Result<StagePlan, Error> {
        self.ctx.emit(AppEvent::Stage(StageEvent::Started {
            stage: self.session.stage(),
            target: self.session.target().to_string(),
            source: self.session.source().to_string(),
            dry_run: self.session.is_dry_run(),
        }));
        self.check_journal().await?;
        self.plan().await
    }

    async fn check_journal(&self) -> Result<(), Error> {
        self.ctx.journal().load().await?.check_can_start(
            self.session.target(),
            self.session.stage(),
            self.session.options().force_stage,
        )
    }

    /// Work out what the stage will do without installing anything
    ///
    /// Registers the target architecture with dpkg and refreshes the package
    /// index when needed, so availability reflects the target repository.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Unavailable` when selected packages have no
    /// target build and `force_unavailable` is not set.
    pub async fn plan(&self) -> Result<StagePlan, Error> {
        if self.session.stage() == Stage::Third {
            let removals = TargetSelector::new(self.ctx, &self.session)
                .removals()
                .await?;
            return Ok(StagePlan {
                removals,
                ..StagePlan::default()
            });
        }

        self.prepare_architecture().await?;

        let selector = TargetSelector::new(self.ctx, &self.session);
        let requested = &self.session.options().packages;
        let mut selection = if !requested.is_empty() {
            selector.requested(requested).await?
        } else if self.session.stage() == Stage::First {
            selector.stage_one().await?
        } else {
            selector.stage_two().await?
        };

        let mut plan = StagePlan::default();
        if requested.is_empty() {
            if self.session.stage() != Stage::First {
                plan.emulation_cache = self.cached_emulation(&mut selection).await?;
            }
            // Stage two without a stage-one cache still crossgrades the
            // emulation layer first
            if plan.emulation_cache.is_empty() {
                plan.emulation = self.emulation_layer(&mut selection).await?;
            }
        }

        let unavailable = selector.unavailable(&selection).await?;
        if !unavailable.is_empty() {
            let skipped = self.session.options().force_unavailable;
            self.ctx.emit(AppEvent::Stage(StageEvent::Unavailable {
                stage: self.session.stage(),
                packages: unavailable.clone(),
                skipped,
            }));
            if !skipped {
                return Err(StageError::Unavailable {
                    packages: unavailable,
                }
                .into());
            }
            for name in &unavailable {
                selection.remove(name);
            }
            plan.emulation.retain(|name| !unavailable.contains(name));
            plan.unavailable = unavailable;
        }
        emit_selected(self.ctx, &self.session, &selection);

        let ordinary: Vec<String> = selection
            .iter()
            .filter(|(_, reason)| *reason != SelectionReason::Emulation)
            .map(|(name, _)| name.to_string())
            .collect();
        let (ordered, execution) = self
            .ctx
            .resolver()
            .plan(&ordinary, self.ctx.config.transaction.batch_size)
            .await?;
        plan.leading = ordered.leading.len();
        plan.cycles_broken = ordered.cycles_broken.len();
        plan.batches = execution.into_batches();
        plan.selection = selection;
        Ok(plan)
    }

    /// Make sure dpkg and apt know about the target architecture
    async fn prepare_architecture(&self) -> Result<(), Error> {
        let target = self.session.target();
        let native = self.ctx.pm.native_architecture().await?;
        let foreign = self.ctx.pm.foreign_architectures().await?;
        if &native != target && !foreign.contains(target) {
            tracing::info!(%target, "adding foreign architecture");
            self.ctx.cancel.check()?;
            self.ctx
                .lock
                .run(self.ctx.pm.add_architecture(target))
                .await?;
        }
        if let Err(e) = self.ctx.pm.update_index().await {
            self.ctx
                .emit_warning_with_context("package index update failed", e.to_string());
        }
        self.check_execution_support().await;
        Ok(())
    }

    /// Warn when target binaries will not run once dpkg switches over
    async fn check_execution_support(&self) {
        let target = self.session.target();
        let pctx = self.ctx.platform.create_context(Some(self.ctx.tx.clone()));
        let support = match arch_support(self.ctx.platform.process(), &pctx, target.as_str()).await {
            Ok(support) => support,
            Err(e) => {
                tracing::debug!(error = %e, "arch-test unavailable");
                ArchSupport::Unknown
            }
        };
        match support {
            ArchSupport::Native | ArchSupport::Unknown => {}
            ArchSupport::Emulated => {
                tracing::info!(%target, "target binaries run through emulation");
            }
            ArchSupport::Unsupported => self.ctx.emit_warning_with_context(
                format!("{target} binaries cannot be executed on this machine"),
                "install qemu-user-static and binfmt-support, or expect maintainer scripts to fail",
            ),
        }
    }

    /// Stage one: emulation packages still installed outside the target
    ///
    /// They are moved out of the ordinary selection and crossgraded first,
    /// one at a time in configuration order.
    async fn emulation_layer(&self, selection: &mut Selection) -> Result<Vec<String>, Error> {
        let target = self.session.target();
        let installed = self.ctx.pm.list_installed().await?;
        let configured: BTreeSet<&str> = installed
            .iter()
            .filter(|p| &p.arch == target && p.status.is_configured())
            .map(|p| p.name.as_str())
            .collect();
        let foreign: BTreeSet<&str> = installed
            .iter()
            .filter(|p| &p.arch != target && !p.arch.is_all() && p.is_installed())
            .map(|p| p.name.as_str())
            .collect();

        let mut layer = Vec::new();
        for name in &self.ctx.config.packages.emulation {
            if foreign.contains(name.as_str()) && !configured.contains(name.as_str()) {
                selection.remove(name);
                selection.add(name.clone(), SelectionReason::Emulation);
                layer.push(name.clone());
            }
        }
        Ok(layer)
    }

    /// Stage two: emulation debs cached by stage one
    ///
    /// Packages they install are taken out of the ordinary selection.
    async fn cached_emulation(&self, selection: &mut Selection) -> Result<Vec<PathBuf>, Error> {
        let debs = cached_debs(&self.ctx.config.emulation_cache_dir()).await?;
        for deb in &debs {
            let identity = self.ctx.pm.deb_identity(deb).await?;
            selection.remove(&identity.name);
        }
        Ok(debs)
    }

    /// Carry out a plan
    ///
    /// # Errors
    ///
    /// Returns an error if the package manager cannot be driven, on
    /// cancellation, or if the journal cannot be written.
    pub async fn execute(&self, plan: StagePlan) -> Result<StageReport, Error> {
        let started = Instant::now();
        let mut report = self.execute_plan(plan).await?;
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(report)
    }

    async fn execute_plan(&self, plan: StagePlan) -> Result<StageReport, Error> {
        let options = self.session.options();
        let mut report = StageReport::new(
            self.session.stage(),
            self.session.target().clone(),
            self.session.source().clone(),
        );
        report.dry_run = options.dry_run;
        report.download_only = options.download_only;

        if options.dry_run {
            let mut batches: Vec<Vec<String>> =
                plan.emulation.iter().map(|name| vec![name.clone()]).collect();
            batches.extend(plan.batches.iter().cloned());
            if !plan.removals.is_empty() {
                batches.push(plan.removals.clone());
            }
            self.ctx.emit(AppEvent::Stage(StageEvent::DryRun {
                stage: self.session.stage(),
                batches,
            }));
            report.plan = plan;
            return Ok(report);
        }

        if self.session.stage() == Stage::Third {
            self.remove_source(&plan, &mut report).await?;
            report.plan = plan;
            return self.finish(report).await;
        }

        if !options.download_only {
            self.install_hook().await;
        }
        self.crossgrade_emulation(&plan, &mut report).await?;
        self.run_batches(&plan, &mut report).await?;
        report.plan = plan;

        if options.download_only {
            return Ok(report);
        }
        if self.session.stage() == Stage::First {
            self.update_initramfs().await;
        }
        self.preflight(&mut report).await?;
        self.finish(report).await
    }

    async fn install_hook(&self) {
        match self.ctx.hook().install(self.session.target()).await {
            Ok(()) => {}
            Err(Error::Guard(GuardError::HookAlreadyInstalled { .. })) => {
                tracing::debug!("arch-check hook already installed");
            }
            Err(e) => self
                .ctx
                .emit_warning_with_context("could not install the arch-check hook", e.to_string()),
        }
    }

    fn batch_id(&self, suffix: impl std::fmt::Display) -> String {
        format!(
            "{}-{suffix}",
            self.session.stage().to_string().replace(' ', "-")
        )
    }

    fn batch_context(&self, batch_id: String, debs: Vec<(PackageRef, PathBuf)>) -> BatchContext {
        BatchContext::new()
            .with_batch_id(batch_id)
            .with_debs(debs)
            .with_fix_broken(self.session.stage() != Stage::First)
            .with_preserve_auto(true)
            .with_event_sender(self.ctx.tx.clone())
    }

    /// Emulation layer ahead of everything else
    async fn crossgrade_emulation(
        &self,
        plan: &StagePlan,
        report: &mut StageReport,
    ) -> Result<(), Error> {
        if !plan.emulation.is_empty() {
            let cache = self.ctx.config.emulation_cache_dir();
            let pipeline = DownloadPipeline::new(
                std::sync::Arc::clone(&self.ctx.pm),
                &cache,
                &self.ctx.install_config(),
            )
            .with_events(self.ctx.tx.clone());

            let executor = self.ctx.executor()?;
            let mut crossgraded = Vec::new();
            for (index, name) in plan.emulation.iter().enumerate() {
                let batch = pipeline
                    .fetch(index, vec![name.clone()], self.session.target(), &self.ctx.cancel)
                    .await?;
                report.converged += batch.converged.len();
                if report.download_only {
                    report.downloaded += batch.debs.len();
                    report.stuck.extend(batch.failures.iter().map(|(p, _)| p.name.clone()));
                    continue;
                }
                let ctx = self.batch_context(self.batch_id(format!("emulation-{index}")), batch.debs);
                let mut result = executor.execute(&ctx).await?;
                result.record_download_failures(&batch.failures);
                crossgraded.extend(converged_names(&result));
                record_batch(report, &result);
            }
            let complete = crossgraded.len() == plan.emulation.len();
            if !crossgraded.is_empty() {
                self.ctx.emit(AppEvent::Stage(StageEvent::EmulationCrossgraded {
                    stage: self.session.stage(),
                    packages: crossgraded,
                }));
            }
            // Only stage one hands the archives on to stage two
            if complete && self.session.stage() != Stage::First {
                remove_dir_all_if_exists(&cache).await?;
            }
        }

        if !plan.emulation_cache.is_empty() && !report.download_only {
            let mut debs = Vec::with_capacity(plan.emulation_cache.len());
            for deb in &plan.emulation_cache {
                debs.push((self.ctx.pm.deb_identity(deb).await?, deb.clone()));
            }
            let ctx = self.batch_context(self.batch_id("emulation-cache"), debs);
            let result = self.ctx.executor()?.execute(&ctx).await?;
            record_batch(report, &result);
            if result.is_converged() {
                self.ctx.emit(AppEvent::Stage(StageEvent::EmulationCrossgraded {
                    stage: self.session.stage(),
                    packages: converged_names(&result),
                }));
                remove_dir_all_if_exists(&self.ctx.config.emulation_cache_dir()).await?;
            }
        }
        Ok(())
    }

    /// Download ahead and install the ordered batches
    async fn run_batches(&self, plan: &StagePlan, report: &mut StageReport) -> Result<(), Error> {
        if plan.batches.is_empty() {
            return Ok(());
        }
        let executor = self.ctx.executor()?;
        let mut queue = DownloadPipeline::new(
            std::sync::Arc::clone(&self.ctx.pm),
            self.ctx.config.archives_dir(),
            &self.ctx.install_config(),
        )
        .with_events(self.ctx.tx.clone())
        .spawn(
            plan.batches.clone(),
            self.session.target().clone(),
            self.ctx.cancel.clone(),
        );

        let mut leftovers = Vec::new();
        while let Some(batch) = queue.next().await? {
            report.converged += batch.converged.len();
            if report.download_only {
                report.downloaded += batch.debs.len();
                report.stuck.extend(batch.failures.iter().map(|(p, _)| p.name.clone()));
                continue;
            }
            self.ctx.cancel.check()?;
            let ctx = self.batch_context(self.batch_id(batch.index), batch.debs);
            let mut result = executor.execute(&ctx).await?;
            leftovers.extend(unconverged_debs(&ctx, &result));
            result.record_download_failures(&batch.failures);
            record_batch(report, &result);
        }
        self.sweep(&executor, leftovers, report).await
    }

    /// Retry what the batches left unconfigured until a sweep converges nothing
    ///
    /// A package stuck in one batch may only be missing a dependency that a
    /// later batch installs. Each sweep hands the leftovers, in plan order,
    /// back to the executor, which skips whatever is configured by now.
    /// `stuck` ends up reflecting the last sweep.
    async fn sweep(
        &self,
        executor: &TransactionExecutor,
        mut leftovers: Vec<(PackageRef, PathBuf)>,
        report: &mut StageReport,
    ) -> Result<(), Error> {
        let mut round = 0;
        while !leftovers.is_empty() {
            round += 1;
            self.ctx.cancel.check()?;
            let ctx = self.batch_context(self.batch_id(format!("sweep-{round}")), leftovers);
            let result = executor.execute(&ctx).await?;
            let recovered: BTreeSet<String> = converged_names(&result).into_iter().collect();
            tracing::debug!(round, recovered = recovered.len(), "sweep finished");
            report.stuck.retain(|name| !recovered.contains(name));
            record_batch(report, &result);
            if recovered.is_empty() {
                break;
            }
            leftovers = unconverged_debs(&ctx, &result);
        }
        Ok(())
    }

    /// Stage three: purge the source architecture, then restore hook-functions
    async fn remove_source(&self, plan: &StagePlan, report: &mut StageReport) -> Result<(), Error> {
        if !plan.removals.is_empty() {
            let ctx = RemovalContext::new(self.session.source().clone())
                .with_packages(plan.removals.clone())
                .with_event_sender(self.ctx.tx.clone());
            let removal = self.ctx.executor()?.remove(&ctx).await?;
            report.removed = removal.removed;
            report.stuck = removal.remaining;
        }

        match self.ctx.hook().remove().await {
            Ok(()) => {}
            Err(Error::Guard(GuardError::BackupMissing { .. })) => {
                tracing::debug!("arch-check hook not installed");
            }
            Err(e) => self
                .ctx
                .emit_warning_with_context("could not remove the arch-check hook", e.to_string()),
        }
        Ok(())
    }

    /// Rebuild every initramfs with the new binaries; failure only warns
    async fn update_initramfs(&self) {
        let pctx = self.ctx.platform.create_context(Some(self.ctx.tx.clone()));
        let mut cmd = self.ctx.platform.command("update-initramfs");
        cmd.args(["-u", "-k", "all"]);

        let failure = match self.ctx.platform.execute_command(&pctx, cmd).await {
            Ok(output) if output.success() => None,
            Ok(output) => Some(output.stderr_lossy().trim().to_string()),
            Err(e) => Some(e.to_string()),
        };
        match failure {
            None => self.ctx.emit(AppEvent::Stage(StageEvent::InitramfsUpdated)),
            Some(message) => {
                tracing::warn!(%message, "update-initramfs failed");
                self.ctx
                    .emit(AppEvent::Stage(StageEvent::InitramfsUpdateFailed { message }));
            }
        }
    }

    async fn preflight(&self, report: &mut StageReport) -> Result<(), Error> {
        let verify = &self.ctx.config.verify;
        if !verify.preflight {
            return Ok(());
        }
        match self
            .ctx
            .verifier()
            .preflight(&verify.boot_binaries, self.session.target())
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Stage(StageError::PreflightMismatch { paths, .. })) => {
                report.preflight_mismatches = paths;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Decide the outcome, journal it, and report it
    async fn finish(&self, mut report: StageReport) -> Result<StageReport, Error> {
        report.stuck.sort();
        report.stuck.dedup();
        report.crossgraded.sort();
        report.crossgraded.dedup();
        let blocked = !report.stuck.is_empty() || !report.preflight_mismatches.is_empty();
        let outcome = if blocked {
            if self.session.options().force_stage {
                StageOutcome::Forced
            } else {
                StageOutcome::Failed
            }
        } else if report.plan.unavailable.is_empty() {
            StageOutcome::Done
        } else {
            StageOutcome::Forced
        };
        report.outcome = Some(outcome);

        let record = StageRecord::new(outcome, self.session.source().clone())
            .with_failed(report.stuck.clone())
            .with_unavailable(report.plan.unavailable.clone());
        let journal = self.ctx.journal();
        journal
            .update(self.session.target(), self.session.stage(), record)
            .await?;
        self.ctx.emit(AppEvent::Snapshot(SnapshotEvent::JournalUpdated {
            path: journal.path().display().to_string(),
            stage: self.session.stage(),
            outcome: outcome.to_string(),
        }));

        match report.error() {
            None => self.ctx.emit(AppEvent::Stage(StageEvent::Completed {
                stage: self.session.stage(),
                forced: outcome == StageOutcome::Forced,
                converged: report.converged + report.crossgraded.len() + report.removed.len(),
            })),
            Some(e) => self.ctx.emit(AppEvent::Stage(StageEvent::Failed {
                stage: self.session.stage(),
                failure: FailureContext::from_error(&e),
                stuck: report.stuck.clone(),
            })),
        }
        Ok(report)
    }
}

fn converged_names(result: &BatchReport) -> Vec<String> {
    result
        .succeeded()
        .chain(result.retried())
        .map(|p| p.name.clone())
        .collect()
}

fn record_batch(report: &mut StageReport, result: &BatchReport) {
    report.converged += result.already_converged;
    report.crossgraded.extend(
        result
            .results
            .iter()
            .filter(|(_, r)| !r.is_failed())
            .map(|(p, _)| p.name.clone()),
    );
    report.stuck.extend(result.stuck());
    if let Some(e) = result.error() {
        report.last_error = Some(e);
    }
    report.batches.push(BatchSummary::from(result));
}

/// Archives of the packages a batch failed to configure, in batch order
fn unconverged_debs(ctx: &BatchContext, result: &BatchReport) -> Vec<(PackageRef, PathBuf)> {
    ctx.debs
        .iter()
        .filter(|(pkg, _)| result.results.get(pkg).is_some_and(PackageResult::is_failed))
        .cloned()
        .collect()
}

/// `*.deb` files directly inside `dir`, sorted
pub(crate) async fn cached_debs(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    Ok(list_dir(dir)
        .await?
        .into_iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "deb"))
        .collect())
}

