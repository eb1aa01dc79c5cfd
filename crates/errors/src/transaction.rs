//! Transaction executor error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum TransactionError {
    /// A package-manager failure that does not match any known remediation.
    #[error("package manager failed for {package}: {message}")]
    Failed { package: String, message: String },

    #[error("{command} exited with status {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("no progress after pass {pass}: {pending} packages still pending")]
    NoProgress { pass: u32, pending: usize },

    #[error("transaction stalled after {passes} passes with {pending} packages pending")]
    Stalled { passes: u32, pending: usize },

    #[error("download failed for {package}: {message}")]
    DownloadFailed { package: String, message: String },

    #[error("download of {package} timed out after {timeout_seconds}s")]
    DownloadTimeout {
        package: String,
        timeout_seconds: u64,
    },

    #[error("remediation {remediation} failed for {package}: {message}")]
    RemediationFailed {
        remediation: String,
        package: String,
        message: String,
    },

    #[error("download pipeline closed unexpectedly")]
    PipelineClosed,

    #[error("transaction cancelled")]
    Cancelled,
}

impl UserFacingError for TransactionError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Failed { .. } | Self::NoProgress { .. } | Self::Stalled { .. } => Some(
                "Inspect the dpkg output above, fix the reported packages manually, then rerun the same stage.",
            ),
            Self::DownloadFailed { .. } | Self::DownloadTimeout { .. } => {
                Some("Check network access and apt sources, then rerun the stage.")
            }
            Self::Cancelled => Some("Rerun the same stage; completed work is picked up from the package database."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DownloadFailed { .. } | Self::DownloadTimeout { .. } | Self::Cancelled
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Failed { .. } => "transaction.failed",
            Self::CommandFailed { .. } => "transaction.command_failed",
            Self::NoProgress { .. } => "transaction.no_progress",
            Self::Stalled { .. } => "transaction.stalled",
            Self::DownloadFailed { .. } => "transaction.download_failed",
            Self::DownloadTimeout { .. } => "transaction.download_timeout",
            Self::RemediationFailed { .. } => "transaction.remediation_failed",
            Self::PipelineClosed => "transaction.pipeline_closed",
            Self::Cancelled => "transaction.cancelled",
        };
        Some(code)
    }
}
