//! Package state snapshot type definitions

use crate::{Arch, PackageStatus};
use serde::{Deserialize, Serialize};

/// One installed instance captured in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub name: String,
    pub arch: Arch,
    pub version: String,
    pub status: PackageStatus,
}

/// A difference between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageChange {
    pub change_type: ChangeType,
    pub name: String,
    pub from_arch: Option<Arch>,
    pub to_arch: Option<Arch>,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
}

/// Type of snapshot change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Name appeared
    Install,
    /// Name disappeared
    Remove,
    /// Same name, different architecture set
    Crossgrade,
    /// Same name and architecture, different version
    Update,
}
