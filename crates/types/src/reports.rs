//! Binary verification records

use crate::Arch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Outcome of comparing a file's machine type with an expected architecture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "actual", rename_all = "snake_case")]
pub enum ArchVerdict {
    Match,
    /// The binary was built for another architecture, named here
    Mismatch(String),
    /// Scripts, data files and anything else without an ELF header
    NotABinary,
}

impl ArchVerdict {
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch(_))
    }
}

impl fmt::Display for ArchVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "match"),
            Self::Mismatch(actual) => write!(f, "mismatch ({actual})"),
            Self::NotABinary => write!(f, "not a binary"),
        }
    }
}

/// Full record of one verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchRecord {
    pub path: PathBuf,
    /// `None` when the file is not a binary
    pub detected: Option<String>,
    pub expected: Arch,
    pub verdict: ArchVerdict,
}
