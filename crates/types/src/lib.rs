#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the crossgrader
//!
//! This crate provides the vocabulary shared by every other crate:
//! architectures, installed package records, stages and
//! binary verification verdicts.

pub mod package;
pub mod reports;
pub mod stage;
pub mod state;

// Re-export commonly used types
pub use package::{InstalledPackage, MultiArch, PackageRef, PackageStatus, Priority};
pub use reports::{ArchRecord, ArchVerdict};
pub use stage::Stage;
pub use state::{ChangeType, PackageChange, SnapshotEntry};

use crossgrader_errors::PackageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A Debian architecture name such as `amd64` or `arm64`.
///
/// The special value `all` marks architecture-independent packages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arch(String);

impl Arch {
    /// Create an architecture without validation
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Architecture-independent marker
    #[must_use]
    pub fn all() -> Self {
        Self("all".to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `all`, which never needs crossgrading
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.0 == "all"
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Arch {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let valid = !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(PackageError::InvalidArchitecture {
                arch: s.to_string(),
            })
        }
    }
}

impl AsRef<str> for Arch {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Plain,
    #[default]
    Tty,
    Json,
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    Always,
    #[default]
    Auto,
    Never,
}

impl clap::ValueEnum for ColorChoice {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Always, Self::Auto, Self::Never]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Always => clap::builder::PossibleValue::new("always"),
            Self::Auto => clap::builder::PossibleValue::new("auto"),
            Self::Never => clap::builder::PossibleValue::new("never"),
        })
    }
}
