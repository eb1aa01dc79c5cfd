//! Operations outside the stage sequence

use crossgrader_errors::{Error, GuardError};
use crossgrader_events::EventEmitter;
use crossgrader_install::BatchContext;
use crossgrader_platform::fs::remove_dir_all_if_exists;
use std::path::{Path, PathBuf};

use crate::context::OpsCtx;
use crate::controller::cached_debs;
use crate::types::{BatchSummary, CleanupReport, InstallFromReport};

/// Remove the arch-check hook, then everything under the storage directory
///
/// The hook goes first: its backup lives in the storage directory.
///
/// # Errors
///
/// Returns an error if the storage directory cannot be removed.
pub async fn cleanup(ctx: &OpsCtx) -> Result<CleanupReport, Error> {
    ctx.emit_operation_started("cleanup");

    let hook_removed = match ctx.hook().remove().await {
        Ok(()) => true,
        Err(Error::Guard(GuardError::BackupMissing { .. })) => false,
        Err(e) => {
            ctx.emit_warning_with_context("could not remove the arch-check hook", e.to_string());
            false
        }
    };
    let storage_removed = remove_dir_all_if_exists(&ctx.config.storage_dir()).await?;

    ctx.emit_operation_completed("cleanup", true);
    Ok(CleanupReport {
        hook_removed,
        storage_removed,
    })
}

/// The `.deb` files `install_from` would install, sorted
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub async fn archived_debs(
    ctx: &OpsCtx,
    dir: Option<&Path>,
) -> Result<(PathBuf, Vec<PathBuf>), Error> {
    let dir: PathBuf = dir.map_or_else(|| ctx.config.archives_dir(), Path::to_path_buf);
    let debs = cached_debs(&dir).await?;
    Ok((dir, debs))
}

/// Install every `.deb` in `dir` as one batch
///
/// Used to finish a crossgrade from archives fetched earlier with
/// `--download-only`. Defaults to the configured archives directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be read, a deb cannot be
/// identified, or the executor cannot drive the package manager.
pub async fn install_from(ctx: &OpsCtx, dir: Option<&Path>) -> Result<InstallFromReport, Error> {
    let (dir, debs) = archived_debs(ctx, dir).await?;
    let mut report = InstallFromReport {
        dir: dir.clone(),
        debs: debs.len(),
        batch: None,
        stuck: Vec::new(),
    };
    if debs.is_empty() {
        ctx.emit_warning(format!("no .deb files found in {}", dir.display()));
        return Ok(report);
    }

    let mut identified = Vec::with_capacity(debs.len());
    for deb in debs {
        identified.push((ctx.pm.deb_identity(&deb).await?, deb));
    }
    let batch = BatchContext::new()
        .with_batch_id("install-from".to_string())
        .with_debs(identified)
        .with_fix_broken(true)
        .with_preserve_auto(true)
        .with_event_sender(ctx.tx.clone());
    let result = ctx.executor()?.execute(&batch).await?;

    report.stuck = result.stuck();
    report.batch = Some(BatchSummary::from(&result));
    Ok(report)
}
