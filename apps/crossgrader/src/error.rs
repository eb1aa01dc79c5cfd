//! CLI error handling and exit codes

use std::fmt;

use crossgrader_errors::{Error, StageError, UserFacingError};

/// Unresolved package-manager failures
pub const EXIT_TRANSACTION: i32 = 3;
/// Packages without a target-architecture build
pub const EXIT_UNAVAILABLE: i32 = 4;

/// CLI-specific error type
#[derive(Debug)]
pub enum CliError {
    /// Configuration error
    Config(Error),
    /// Operations error
    Ops(Error),
    /// System setup error
    Setup(String),
    /// Could not read the operator's answer
    Prompt(String),
    /// I/O error
    Io(std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Ops(Error::Stage(StageError::Unavailable { .. })) => EXIT_UNAVAILABLE,
            CliError::Ops(
                Error::Transaction(_)
                | Error::Stage(StageError::Failed { .. } | StageError::PreflightMismatch { .. }),
            ) => EXIT_TRANSACTION,
            _ => 1,
        }
    }

    /// Stable code for JSON output
    pub fn code(&self) -> Option<&'static str> {
        match self {
            CliError::Config(e) | CliError::Ops(e) => e.user_code(),
            _ => None,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {}", e.user_message()),
            CliError::Ops(e) => {
                let message = e.user_message();
                write!(f, "{message}")?;
                if let Some(code) = e.user_code() {
                    write!(f, "\n  Code: {code}")?;
                }
                if let Some(hint) = e.user_hint() {
                    write!(f, "\n  Hint: {hint}")?;
                }
                if e.is_retryable() {
                    write!(f, "\n  Retry: safe to retry this operation.")?;
                }
                Ok(())
            }
            CliError::Setup(msg) => write!(f, "System setup error: {msg}"),
            CliError::Prompt(msg) => write!(f, "Could not read confirmation: {msg}"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) | CliError::Ops(e) => Some(e),
            CliError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for CliError {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(_) => CliError::Config(e),
            other => CliError::Ops(other),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}
