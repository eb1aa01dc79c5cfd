#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Crossgrade orchestration
//!
//! This crate sits between the CLI and the specialized crates. It owns the
//! session and the stage state machine, decides which packages each stage
//! touches, and hands the ordered work to the transaction executor.

mod context;
mod controller;
mod maintenance;
mod selection;
mod session;
mod types;

pub use context::{OpsContextBuilder, OpsCtx};
pub use controller::StageController;
pub use maintenance::{archived_debs, cleanup, install_from};
pub use selection::{Selection, TargetSelector};
pub use session::{CrossgradeSession, SessionOptions};
pub use types::{
    BatchSummary, CleanupReport, InstallFromReport, OperationResult, StagePlan, StageReport,
};

use crossgrader_errors::Error;
use crossgrader_types::{Arch, Stage};

/// Open a session and run one stage
///
/// `from` is only meaningful for stage three, where it names the
/// architecture being removed.
///
/// # Errors
///
/// Returns an error if the session cannot be opened or the stage cannot
/// start or run. A stage that ends with stuck packages is not an error; see
/// [`StageReport::error`].
pub async fn run_stage(
    ctx: &OpsCtx,
    target: Arch,
    stage: Stage,
    from: Option<Arch>,
    options: SessionOptions,
) -> Result<StageReport, Error> {
    let session = CrossgradeSession::open(ctx, target, stage, from, options).await?;
    StageController::new(ctx, session).run().await
}
