#![warn(clippy::pedantic)]
#![deny(clippy::all)]

//! Transaction executor for the crossgrader
//!
//! This crate drives dpkg through install/configure passes until a batch
//! of packages converges on the target architecture, applies known
//! remediations to recognized failures, removes the old architecture in
//! the last stage, and downloads the next batch while the current one
//! installs.

#[macro_use]
mod macros;
mod api;
mod cancel;
mod executor;
mod lock;
mod pipeline;
mod remediation;

pub use cancel::{cancellation, CancelHandle, Cancellation};
pub use executor::TransactionExecutor;
pub use lock::TransactionLock;
pub use pipeline::{DownloadPipeline, DownloadQueue, DownloadedBatch};
pub use remediation::{Remediation, RemediationSet, RemoveCoinstalled, StripPrerm};

// Re-export the public API surface from api module
pub use api::config::InstallConfig;
pub use api::context::{BatchContext, RemovalContext};
pub use api::result::{BatchOutcome, BatchReport, PackageResult, RemovalReport};

// Re-export EventSender for use by macros and contexts
pub use crossgrader_events::EventSender;
