//! Package-related error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum PackageError {
    /// No build of the package exists for the requested architecture.
    #[error("package not found in target architecture: {package}")]
    NotFound { package: String },

    /// Several installed instances share the name, so dpkg cannot tell which one to act on.
    #[error("ambiguous package name {package}: {instances} installed instances")]
    AmbiguousName { package: String, instances: usize },

    #[error("package not installed: {package}")]
    NotInstalled { package: String },

    #[error("architecture {arch} is not recognized by dpkg")]
    InvalidArchitecture { arch: String },

    #[error("invalid package reference: {value}")]
    InvalidReference { value: String },

    #[error("failed to parse {what}: {message}")]
    ParseError { what: String, message: String },
}

impl UserFacingError for PackageError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NotFound { .. } => Some(
                "Enable a repository that ships the target architecture, or rerun with --force-unavailable to skip it.",
            ),
            Self::AmbiguousName { .. } => {
                Some("Remove the co-installed instance with dpkg --remove and retry.")
            }
            Self::InvalidArchitecture { .. } => {
                Some("Run `dpkg-architecture --list-known` to see valid architecture names.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NotFound { .. } => "package.not_found",
            Self::AmbiguousName { .. } => "package.ambiguous_name",
            Self::NotInstalled { .. } => "package.not_installed",
            Self::InvalidArchitecture { .. } => "package.invalid_architecture",
            Self::InvalidReference { .. } => "package.invalid_reference",
            Self::ParseError { .. } => "package.parse_error",
        };
        Some(code)
    }
}
