//! Snapshot and journal error types

use thiserror::Error;

use crate::UserFacingError;
use std::borrow::Cow;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StateError {
    #[error("snapshot not found: {path}")]
    SnapshotNotFound { path: String },

    #[error("snapshot already exists: {path}")]
    SnapshotExists { path: String },

    #[error("corrupt state file {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("failed to write {path}: {message}")]
    WriteFailed { path: String, message: String },

    #[error("journal belongs to target {recorded}, not {requested}")]
    JournalMismatch { recorded: String, requested: String },
}

impl UserFacingError for StateError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::SnapshotNotFound { .. } => "state.snapshot_not_found",
            Self::SnapshotExists { .. } => "state.snapshot_exists",
            Self::Corrupt { .. } => "state.corrupt",
            Self::WriteFailed { .. } => "state.write_failed",
            Self::JournalMismatch { .. } => "state.journal_mismatch",
        };
        Some(code)
    }
}
