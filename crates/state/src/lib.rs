#![warn(mismatched_lifetime_syntaxes)]
#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Persistent state for the crossgrader
//!
//! Two files live in the storage directory: a snapshot of the installed
//! packages used for auditing a crossgrade, and the stage journal that
//! gates moving from one stage to the next. Neither is used to compute
//! remaining work; that always comes from the live package database.

pub mod journal;
pub mod snapshot;

pub use journal::{JournalStore, StageJournal, StageOutcome, StageRecord, TargetJournal};
pub use snapshot::{CrossgradeAudit, PackageSnapshot, SnapshotDiff};

use crossgrader_errors::{Error, StateError};
use std::path::Path;

/// Serialize `value` as pretty JSON and replace `path` atomically
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub(crate) async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StateError::WriteFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    crossgrader_platform::fs::write_atomic(path, &json).await
}

/// Read and deserialize a JSON state file, `None` when it does not exist
///
/// # Errors
///
/// Returns `StateError::Corrupt` if the file cannot be parsed.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, Error> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io_with_path(&e, path)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| {
            StateError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
}
