//! Known fixes for recognized dpkg failure signatures
//!
//! Each remediation is tried at most once per package per batch. A
//! remediation that reports success makes the executor retry the package
//! within the same pass.

use async_trait::async_trait;
use crossgrader_dpkg::{other_instances, FailureKind, PackageManager, UnitFailure};
use crossgrader_errors::{ConfigError, Error};
use crossgrader_types::{MultiArch, PackageRef};
use std::sync::Arc;

/// A fix for one or more failure signatures
#[async_trait]
pub trait Remediation: Send + Sync {
    /// Name used in configuration and events
    fn name(&self) -> &'static str;

    fn handles(&self, kind: FailureKind) -> bool;

    /// Apply the fix for `package`, the target instance that failed to install
    ///
    /// Returns whether anything was changed that makes a retry worthwhile.
    async fn apply(
        &self,
        pm: &dyn PackageManager,
        package: &PackageRef,
        failure: &UnitFailure,
    ) -> Result<bool, Error>;
}

/// Force-remove co-installed `Multi-Arch: same` instances in other architectures
///
/// dpkg refuses to unpack a new instance of a `Multi-Arch: same` package
/// whose version differs from the instances already installed. Removing the
/// old ones with `--force-depends` leaves their reverse dependencies to be
/// satisfied by the new instance.
#[derive(Debug, Default)]
pub struct RemoveCoinstalled;

#[async_trait]
impl Remediation for RemoveCoinstalled {
    fn name(&self) -> &'static str {
        "remove-coinstalled"
    }

    fn handles(&self, kind: FailureKind) -> bool {
        kind == FailureKind::AmbiguousName
    }

    async fn apply(
        &self,
        pm: &dyn PackageManager,
        package: &PackageRef,
        _failure: &UnitFailure,
    ) -> Result<bool, Error> {
        let mut removed_any = false;
        for old in other_instances(pm, &package.name, &package.arch).await? {
            if pm.multi_arch(&old).await? != MultiArch::Same {
                continue;
            }
            if !pm.force_remove(&old).await? {
                return Ok(false);
            }
            removed_any = true;
        }
        Ok(removed_any)
    }
}

/// Delete the failing `prerm` of the old instances, then let dpkg replace them
///
/// For ambiguous names the old instances are force-removed once their
/// script is gone, since that is what failed for [`RemoveCoinstalled`].
#[derive(Debug, Default)]
pub struct StripPrerm;

#[async_trait]
impl Remediation for StripPrerm {
    fn name(&self) -> &'static str {
        "strip-prerm"
    }

    fn handles(&self, kind: FailureKind) -> bool {
        matches!(kind, FailureKind::PrermFailed | FailureKind::AmbiguousName)
    }

    async fn apply(
        &self,
        pm: &dyn PackageManager,
        package: &PackageRef,
        failure: &UnitFailure,
    ) -> Result<bool, Error> {
        let others = other_instances(pm, &package.name, &package.arch).await?;
        if others.is_empty() {
            return Ok(false);
        }
        let mut changed = false;
        for old in &others {
            changed |= pm.remove_maintainer_script(old, "prerm").await?;
            if failure.kind == FailureKind::AmbiguousName {
                changed |= pm.force_remove(old).await?;
            }
        }
        Ok(changed)
    }
}

/// Ordered set of enabled remediations
#[derive(Clone, Default)]
pub struct RemediationSet {
    enabled: Vec<Arc<dyn Remediation>>,
}

impl std::fmt::Debug for RemediationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.enabled.iter().map(|r| r.name()))
            .finish()
    }
}

impl RemediationSet {
    /// Every built-in remediation
    #[must_use]
    pub fn builtin() -> Vec<Arc<dyn Remediation>> {
        vec![Arc::new(RemoveCoinstalled), Arc::new(StripPrerm)]
    }

    /// Select built-in remediations by name, keeping the given order
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownRemediation` for a name that is not built in.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, Error> {
        let builtin = Self::builtin();
        let mut enabled = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let remediation = builtin
                .iter()
                .find(|r| r.name() == name)
                .ok_or_else(|| ConfigError::UnknownRemediation {
                    name: name.to_string(),
                })?;
            enabled.push(Arc::clone(remediation));
        }
        Ok(Self { enabled })
    }

    /// Add a custom remediation after the configured ones
    #[must_use]
    pub fn with(mut self, remediation: Arc<dyn Remediation>) -> Self {
        self.enabled.push(remediation);
        self
    }

    /// Remediations applicable to `kind`, in configured order
    pub fn matching(&self, kind: FailureKind) -> impl Iterator<Item = &Arc<dyn Remediation>> {
        self.enabled.iter().filter(move |r| r.handles(kind))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrader_dpkg::FailedUnit;

    #[test]
    fn test_from_names_keeps_order_and_rejects_unknown() {
        let set = RemediationSet::from_names(&["strip-prerm", "remove-coinstalled"]).unwrap();
        let names: Vec<&str> = set
            .matching(FailureKind::AmbiguousName)
            .map(|r| r.name())
            .collect();
        assert_eq!(names, vec!["strip-prerm", "remove-coinstalled"]);
        assert_eq!(set.matching(FailureKind::Dependency).count(), 0);

        let err = RemediationSet::from_names(&["reboot"]).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::UnknownRemediation { ref name }) if name == "reboot"
        ));
        assert!(RemediationSet::from_names::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_handles() {
        assert!(RemoveCoinstalled.handles(FailureKind::AmbiguousName));
        assert!(!RemoveCoinstalled.handles(FailureKind::PrermFailed));
        assert!(StripPrerm.handles(FailureKind::PrermFailed));
        let failure = UnitFailure {
            unit: FailedUnit::Package("bash".to_string()),
            kind: FailureKind::Unrecognized,
            message: String::new(),
        };
        assert!(!StripPrerm.handles(failure.kind));
    }
}
