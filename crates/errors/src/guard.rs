//! Guard-specific error types for binary verification and the initramfs hook

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

/// Errors emitted by the guard subsystem.
///
/// Architecture mismatches are not errors; they travel as warnings.
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum GuardError {
    #[error("cannot read binary header of {path}: {message}")]
    HeaderUnreadable { path: String, message: String },

    #[error("initramfs hook-functions file does not exist: {path}")]
    HookFunctionsMissing { path: String },

    #[error("copy_exec() definition not found in {path}")]
    CopyExecNotFound { path: String },

    #[error("arch check hook already installed in {path}")]
    HookAlreadyInstalled { path: String },

    #[error("arch check hook not installed in {path}")]
    HookNotInstalled { path: String },

    #[error("hook-functions backup does not exist: {path}")]
    BackupMissing { path: String },
}

impl UserFacingError for GuardError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::HookFunctionsMissing { .. } | Self::CopyExecNotFound { .. } => {
                Some("Is initramfs-tools installed? The binary check is skipped without it.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::HeaderUnreadable { .. } => "guard.header_unreadable",
            Self::HookFunctionsMissing { .. } => "guard.hook_functions_missing",
            Self::CopyExecNotFound { .. } => "guard.copy_exec_not_found",
            Self::HookAlreadyInstalled { .. } => "guard.hook_already_installed",
            Self::HookNotInstalled { .. } => "guard.hook_not_installed",
            Self::BackupMissing { .. } => "guard.backup_missing",
        };
        Some(code)
    }
}
