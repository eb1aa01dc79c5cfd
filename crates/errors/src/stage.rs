//! Stage controller error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum StageError {
    #[error("target architecture {arch} is already the source architecture")]
    SameArchitecture { arch: String },

    #[error("cannot move from {from} back to {to}")]
    Regression { from: String, to: String },

    #[error("{stage} cannot start: {reason}")]
    PreconditionFailed { stage: String, reason: String },

    #[error("{stage} failed with {} stuck packages", stuck.len())]
    Failed { stage: String, stuck: Vec<String> },

    #[error("{} packages are unavailable in the target architecture", packages.len())]
    Unavailable { packages: Vec<String> },

    #[error("{} packages could not be downloaded: {}", packages.len(), packages.join(", "))]
    DownloadIncomplete { packages: Vec<String> },

    #[error("initramfs hooks could not be linked to packages: {}", hooks.join(", "))]
    RemnantInitramfsHooks { hooks: Vec<String> },

    #[error("boot-critical binaries do not match {expected}: {}", paths.join(", "))]
    PreflightMismatch {
        expected: String,
        paths: Vec<String>,
    },
}

impl UserFacingError for StageError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::PreconditionFailed { .. } => {
                Some("Complete the previous stage first, or pass --force-all to override.")
            }
            Self::Failed { .. } => {
                Some("Fix the stuck packages and rerun the same stage; it resumes from live state.")
            }
            Self::Unavailable { .. } => {
                Some("Rerun with --force-unavailable to skip packages without a target build.")
            }
            Self::DownloadIncomplete { .. } => {
                Some("Rerun with --download-only to fetch the rest before installing.")
            }
            Self::RemnantInitramfsHooks { .. } => {
                Some("Rerun with --force-initramfs if the listed hooks are not needed at boot.")
            }
            Self::PreflightMismatch { .. } => {
                Some("Do not reboot yet; crossgrade the packages owning these binaries first.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::DownloadIncomplete { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::SameArchitecture { .. } => "stage.same_architecture",
            Self::Regression { .. } => "stage.regression",
            Self::PreconditionFailed { .. } => "stage.precondition_failed",
            Self::Failed { .. } => "stage.failed",
            Self::Unavailable { .. } => "stage.unavailable",
            Self::DownloadIncomplete { .. } => "stage.download_incomplete",
            Self::RemnantInitramfsHooks { .. } => "stage.remnant_initramfs_hooks",
            Self::PreflightMismatch { .. } => "stage.preflight_mismatch",
        };
        Some(code)
    }
}
