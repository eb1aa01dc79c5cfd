//! Package-related type definitions

use crate::Arch;
use crossgrader_errors::PackageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Debian package priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Required,
    Important,
    Standard,
    Optional,
    Extra,
    #[default]
    Unknown,
}

impl Priority {
    /// Required and important packages are needed to boot into the new architecture
    #[must_use]
    pub fn is_boot_critical(self) -> bool {
        matches!(self, Self::Required | Self::Important)
    }

    /// Parse the `${Priority}` field; anything unrecognized maps to `Unknown`
    #[must_use]
    pub fn from_field(s: &str) -> Self {
        match s.trim() {
            "required" => Self::Required,
            "important" => Self::Important,
            "standard" => Self::Standard,
            "optional" => Self::Optional,
            "extra" => Self::Extra,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Required => "required",
            Self::Important => "important",
            Self::Standard => "standard",
            Self::Optional => "optional",
            Self::Extra => "extra",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Current dpkg state of an installed instance, the third word of `${Status}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageStatus {
    Installed,
    HalfConfigured,
    Unpacked,
    HalfInstalled,
    TriggersAwaited,
    TriggersPending,
    ConfigFiles,
    NotInstalled,
}

impl PackageStatus {
    /// Parse either a full `${Status}` triple or just the state word
    #[must_use]
    pub fn from_field(s: &str) -> Self {
        let word = s.split_whitespace().last().unwrap_or_default();
        match word {
            "installed" => Self::Installed,
            "half-configured" => Self::HalfConfigured,
            "unpacked" => Self::Unpacked,
            "half-installed" => Self::HalfInstalled,
            "triggers-awaited" => Self::TriggersAwaited,
            "triggers-pending" => Self::TriggersPending,
            "config-files" => Self::ConfigFiles,
            _ => Self::NotInstalled,
        }
    }

    /// Files of the instance are present on disk
    #[must_use]
    pub fn is_present(self) -> bool {
        !matches!(self, Self::ConfigFiles | Self::NotInstalled)
    }

    /// Fully configured; nothing left for `dpkg --configure -a`
    #[must_use]
    pub fn is_configured(self) -> bool {
        matches!(self, Self::Installed)
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Installed => "installed",
            Self::HalfConfigured => "half-configured",
            Self::Unpacked => "unpacked",
            Self::HalfInstalled => "half-installed",
            Self::TriggersAwaited => "triggers-awaited",
            Self::TriggersPending => "triggers-pending",
            Self::ConfigFiles => "config-files",
            Self::NotInstalled => "not-installed",
        };
        f.write_str(s)
    }
}

/// `Multi-Arch` field of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MultiArch {
    #[default]
    No,
    Same,
    Foreign,
    Allowed,
}

impl MultiArch {
    #[must_use]
    pub fn from_field(s: &str) -> Self {
        match s.trim() {
            "same" => Self::Same,
            "foreign" => Self::Foreign,
            "allowed" => Self::Allowed,
            _ => Self::No,
        }
    }
}

/// A package instance, `name:arch`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub arch: Arch,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, arch: Arch) -> Self {
        Self {
            name: name.into(),
            arch,
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.arch)
    }
}

impl FromStr for PackageRef {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PackageError::InvalidReference {
            value: s.to_string(),
        };
        let (name, arch) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if name.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(name, arch.parse()?))
    }
}

/// Installed package as recorded in the dpkg database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub arch: Arch,
    pub version: String,
    pub priority: Priority,
    /// Depends and Pre-Depends package names, alternatives flattened
    pub depends: Vec<String>,
    pub status: PackageStatus,
}

impl InstalledPackage {
    #[must_use]
    pub fn package_ref(&self) -> PackageRef {
        PackageRef::new(self.name.clone(), self.arch.clone())
    }

    /// Files are on disk, whether or not configuration finished
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.status.is_present()
    }
}
