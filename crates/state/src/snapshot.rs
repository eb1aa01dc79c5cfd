//! Installed-package snapshots and their comparison

use chrono::{DateTime, Utc};
use crossgrader_dpkg::PackageManager;
use crossgrader_errors::{Error, StateError};
use crossgrader_types::{
    Arch, ChangeType, InstalledPackage, PackageChange, PackageRef, PackageStatus, SnapshotEntry,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use uuid::Uuid;

/// Every installed instance at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSnapshot {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    /// dpkg's native architecture at capture time
    pub native: Arch,
    /// Sorted by name, then architecture
    pub packages: Vec<SnapshotEntry>,
}

/// Differences between two snapshots, by package name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub changes: Vec<PackageChange>,
}

impl SnapshotDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn of_type(&self, change_type: ChangeType) -> impl Iterator<Item = &PackageChange> {
        self.changes
            .iter()
            .filter(move |c| c.change_type == change_type)
    }
}

/// Result of checking a baseline against the live system after a crossgrade
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossgradeAudit {
    /// Target instances missing while the name is still installed elsewhere
    pub not_crossgraded: Vec<PackageRef>,
    /// Names that were installed before and have no instance at all now
    pub missing: Vec<PackageRef>,
}

impl CrossgradeAudit {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.not_crossgraded.is_empty() && self.missing.is_empty()
    }
}

impl PackageSnapshot {
    #[must_use]
    pub fn from_installed(native: Arch, installed: Vec<InstalledPackage>) -> Self {
        let mut packages: Vec<SnapshotEntry> = installed
            .into_iter()
            .map(|p| SnapshotEntry {
                name: p.name,
                arch: p.arch,
                version: p.version,
                status: p.status,
            })
            .collect();
        packages.sort_by(|a, b| (&a.name, &a.arch).cmp(&(&b.name, &b.arch)));
        Self {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            native,
            packages,
        }
    }

    /// Read the live package database
    ///
    /// # Errors
    ///
    /// Returns an error if the package manager cannot be queried.
    pub async fn capture(pm: &dyn PackageManager) -> Result<Self, Error> {
        let native = pm.native_architecture().await?;
        let installed = pm.list_installed().await?;
        Ok(Self::from_installed(native, installed))
    }

    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub async fn save(&self, path: &Path) -> Result<(), Error> {
        crate::write_json(path, self).await?;
        tracing::debug!(path = %path.display(), packages = self.packages.len(), "snapshot saved");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `StateError::SnapshotNotFound` if nothing was saved at `path`,
    /// or `StateError::Corrupt` if it cannot be parsed.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        crate::read_json(path).await?.ok_or_else(|| {
            StateError::SnapshotNotFound {
                path: path.display().to_string(),
            }
            .into()
        })
    }

    fn by_name(&self) -> BTreeMap<&str, Vec<&SnapshotEntry>> {
        let mut map: BTreeMap<&str, Vec<&SnapshotEntry>> = BTreeMap::new();
        for entry in self.packages.iter().filter(|e| e.status.is_present()) {
            map.entry(entry.name.as_str()).or_default().push(entry);
        }
        map
    }

    fn lookup(&self, name: &str, arch: &Arch) -> Option<&SnapshotEntry> {
        self.packages
            .iter()
            .find(|e| e.name == name && &e.arch == arch)
    }

    /// Compare `later` against this snapshot
    ///
    /// A name whose set of architectures changed is a crossgrade; the same
    /// architectures with another version is an update.
    #[must_use]
    pub fn diff(&self, later: &Self) -> SnapshotDiff {
        let before = self.by_name();
        let after = later.by_name();
        let names: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

        let mut changes = Vec::new();
        for name in names {
            let old = before.get(name);
            let new = after.get(name);
            let first = |entries: Option<&Vec<&SnapshotEntry>>| {
                entries.and_then(|e| e.first()).map(|e| (e.arch.clone(), e.version.clone()))
            };
            let (from_arch, from_version) = first(old).unzip();
            let (to_arch, to_version) = first(new).unzip();

            let change_type = match (old, new) {
                (Some(_), None) => ChangeType::Remove,
                (None, Some(_)) => ChangeType::Install,
                (Some(old), Some(new)) => {
                    let archs = |v: &Vec<&SnapshotEntry>| -> BTreeSet<Arch> {
                        v.iter().map(|e| e.arch.clone()).collect()
                    };
                    let versions = |v: &Vec<&SnapshotEntry>| -> BTreeSet<String> {
                        v.iter().map(|e| e.version.clone()).collect()
                    };
                    if archs(old) != archs(new) {
                        ChangeType::Crossgrade
                    } else if versions(old) != versions(new) {
                        ChangeType::Update
                    } else {
                        continue;
                    }
                }
                (None, None) => continue,
            };
            changes.push(PackageChange {
                change_type,
                name: name.to_string(),
                from_arch,
                to_arch,
                from_version,
                to_version,
            });
        }
        SnapshotDiff { changes }
    }

    /// Which fully installed baseline packages lack a configured `target` instance in `current`
    ///
    /// Architecture-independent packages are expected to stay `all`.
    #[must_use]
    pub fn audit(&self, current: &Self, target: &Arch) -> CrossgradeAudit {
        let mut audit = CrossgradeAudit::default();
        let mut seen = BTreeSet::new();
        for entry in &self.packages {
            if entry.status != PackageStatus::Installed || !seen.insert(&entry.name) {
                continue;
            }
            let wanted = if entry.arch.is_all() {
                Arch::all()
            } else {
                target.clone()
            };
            let ok = current
                .lookup(&entry.name, &wanted)
                .is_some_and(|e| e.status.is_configured());
            if ok {
                continue;
            }
            let wanted = PackageRef::new(entry.name.clone(), wanted);
            let still_there = current
                .packages
                .iter()
                .any(|e| e.name == entry.name && e.status.is_present());
            if still_there {
                audit.not_crossgraded.push(wanted);
            } else {
                audit.missing.push(wanted);
            }
        }
        audit
    }

    /// Present instances outside `target` and `all`
    pub fn foreign_to<'a>(&'a self, target: &'a Arch) -> impl Iterator<Item = &'a SnapshotEntry> {
        self.packages
            .iter()
            .filter(move |e| e.status.is_present() && &e.arch != target && !e.arch.is_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrader_types::Priority;

    fn pkg(name: &str, arch: &str, version: &str) -> InstalledPackage {
        InstalledPackage {
            name: name.to_string(),
            arch: Arch::new(arch),
            version: version.to_string(),
            priority: Priority::Optional,
            depends: Vec::new(),
            status: PackageStatus::Installed,
        }
    }

    fn snap(pkgs: Vec<InstalledPackage>) -> PackageSnapshot {
        PackageSnapshot::from_installed(Arch::new("amd64"), pkgs)
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let a = snap(vec![pkg("bash", "arm64", "5.2"), pkg("tzdata", "all", "2024a")]);
        let b = snap(vec![pkg("tzdata", "all", "2024a"), pkg("bash", "arm64", "5.2")]);
        assert!(a.diff(&b).is_empty());
    }

    #[test]
    fn test_diff_classifies_changes() {
        let before = snap(vec![
            pkg("bash", "arm64", "5.2"),
            pkg("sed", "arm64", "4.9"),
            pkg("gone", "arm64", "1"),
        ]);
        let after = snap(vec![
            pkg("bash", "amd64", "5.2"),
            pkg("sed", "arm64", "4.10"),
            pkg("new", "amd64", "1"),
        ]);
        let diff = before.diff(&after);
        let kinds: Vec<(&str, ChangeType)> = diff
            .changes
            .iter()
            .map(|c| (c.name.as_str(), c.change_type))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("bash", ChangeType::Crossgrade),
                ("gone", ChangeType::Remove),
                ("new", ChangeType::Install),
                ("sed", ChangeType::Update),
            ]
        );
        let bash = diff.of_type(ChangeType::Crossgrade).next().unwrap();
        assert_eq!(bash.from_arch, Some(Arch::new("arm64")));
        assert_eq!(bash.to_arch, Some(Arch::new("amd64")));
    }

    #[test]
    fn test_audit_reports_leftovers() {
        let mut half = pkg("perl", "arm64", "5.36");
        half.status = PackageStatus::Unpacked;
        let baseline = snap(vec![
            pkg("bash", "arm64", "5.2"),
            pkg("perl", "arm64", "5.36"),
            pkg("tzdata", "all", "2024a"),
            pkg("vanished", "arm64", "1"),
        ]);
        let current = snap(vec![
            pkg("bash", "amd64", "5.2"),
            half,
            pkg("tzdata", "all", "2024a"),
        ]);

        let audit = baseline.audit(&current, &Arch::new("amd64"));
        assert_eq!(
            audit.not_crossgraded,
            vec![PackageRef::new("perl", Arch::new("amd64"))]
        );
        assert_eq!(
            audit.missing,
            vec![PackageRef::new("vanished", Arch::new("amd64"))]
        );
        assert_eq!(current.foreign_to(&Arch::new("amd64")).count(), 1);
    }
}
