//! Which packages a stage crossgrades

use crossgrader_errors::{Error, StageError};
use crossgrader_events::{AppEvent, EventEmitter, SelectionReason, SelectionSummary, StageEvent};
use crossgrader_platform::fs::list_dir;
use crossgrader_platform::system::login_shells;
use crossgrader_config::fixed_paths;
use crossgrader_types::{Arch, InstalledPackage};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::context::OpsCtx;
use crate::session::CrossgradeSession;

/// Selected package names with the first reason each was picked for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Selection {
    reasons: BTreeMap<String, SelectionReason>,
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name`; an existing entry keeps its reason
    pub fn add(&mut self, name: impl Into<String>, reason: SelectionReason) -> bool {
        let name = name.into();
        if self.reasons.contains_key(&name) {
            return false;
        }
        self.reasons.insert(name, reason);
        true
    }

    pub fn extend<I, S>(&mut self, names: I, reason: SelectionReason)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.add(name, reason);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<SelectionReason> {
        self.reasons.remove(name)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.reasons.retain(|name, _| keep(name));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.reasons.contains_key(name)
    }

    #[must_use]
    pub fn reason(&self, name: &str) -> Option<SelectionReason> {
        self.reasons.get(name).copied()
    }

    /// Sorted names
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.reasons.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SelectionReason)> {
        self.reasons.iter().map(|(n, r)| (n.as_str(), *r))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> SelectionSummary {
        let mut counts: BTreeMap<SelectionReason, usize> = BTreeMap::new();
        for reason in self.reasons.values() {
            *counts.entry(*reason).or_default() += 1;
        }
        SelectionSummary {
            total: self.reasons.len(),
            by_reason: counts.into_iter().collect(),
        }
    }
}

/// Installed state as seen from the target architecture
struct InstalledView {
    /// Names with an instance outside the target that is not `Architecture: all`
    foreign: BTreeMap<String, Vec<InstalledPackage>>,
    /// Names whose target instance is fully configured
    converged: BTreeSet<String>,
}

impl InstalledView {
    fn new(installed: Vec<InstalledPackage>, target: &Arch) -> Self {
        let mut foreign: BTreeMap<String, Vec<InstalledPackage>> = BTreeMap::new();
        let mut converged = BTreeSet::new();
        for pkg in installed {
            if &pkg.arch == target {
                if pkg.status.is_configured() {
                    converged.insert(pkg.name);
                }
            } else if !pkg.arch.is_all() && pkg.is_installed() {
                foreign.entry(pkg.name.clone()).or_default().push(pkg);
            }
        }
        Self { foreign, converged }
    }

    fn needs_crossgrade(&self, name: &str) -> bool {
        self.foreign.contains_key(name) && !self.converged.contains(name)
    }
}

/// Computes the package set of a stage from live package-manager state
pub struct TargetSelector<'a> {
    ctx: &'a OpsCtx,
    session: &'a CrossgradeSession,
}

impl<'a> TargetSelector<'a> {
    #[must_use]
    pub fn new(ctx: &'a OpsCtx, session: &'a CrossgradeSession) -> Self {
        Self { ctx, session }
    }

    async fn view(&self) -> Result<InstalledView, Error> {
        Ok(InstalledView::new(
            self.ctx.pm.list_installed().await?,
            self.session.target(),
        ))
    }

    /// Packages needed to boot and log in on the target architecture
    ///
    /// Required/important packages, owners of initramfs hooks, the
    /// crossgrader's own dependencies, owners of login shells and the
    /// always-included set. Only names still installed outside the target
    /// are kept.
    ///
    /// # Errors
    ///
    /// Returns `StageError::RemnantInitramfsHooks` for hooks without an
    /// owning package unless `force_initramfs` is set.
    pub async fn stage_one(&self) -> Result<Selection, Error> {
        let view = self.view().await?;
        let mut selection = Selection::new();

        selection.extend(
            view.foreign
                .iter()
                .filter(|(_, instances)| instances.iter().any(|p| p.priority.is_boot_critical()))
                .map(|(name, _)| name.clone()),
            SelectionReason::Priority,
        );
        selection.extend(self.initramfs_hook_owners().await?, SelectionReason::InitramfsHook);
        selection.extend(self.tool_dependencies().await?, SelectionReason::ToolDependency);
        selection.extend(self.login_shell_owners().await, SelectionReason::LoginShell);
        selection.extend(
            self.ctx.config.packages.always_include.iter().cloned(),
            SelectionReason::AlwaysIncluded,
        );

        selection.retain(|name| view.needs_crossgrade(name));
        Ok(selection)
    }

    /// Every package not yet in the target architecture
    ///
    /// # Errors
    ///
    /// Returns an error if the package database cannot be read.
    pub async fn stage_two(&self) -> Result<Selection, Error> {
        let view = self.view().await?;
        let mut selection = Selection::new();
        selection.extend(
            view.foreign
                .keys()
                .filter(|name| view.needs_crossgrade(name))
                .cloned(),
            SelectionReason::Remaining,
        );
        Ok(selection)
    }

    /// Exactly the names given with `--packages`, minus converged ones
    ///
    /// # Errors
    ///
    /// Returns an error if the package database cannot be read.
    pub async fn requested(&self, names: &[String]) -> Result<Selection, Error> {
        let view = self.view().await?;
        let mut selection = Selection::new();
        selection.extend(
            names.iter().filter(|n| !view.converged.contains(n.as_str())).cloned(),
            SelectionReason::Requested,
        );
        Ok(selection)
    }

    /// Names stage three purges from the source architecture
    ///
    /// # Errors
    ///
    /// Returns an error if the package database cannot be read.
    pub async fn removals(&self) -> Result<Vec<String>, Error> {
        let keep: BTreeSet<&str> = self
            .session
            .options()
            .packages
            .iter()
            .map(String::as_str)
            .collect();
        let names: BTreeSet<String> = self
            .ctx
            .pm
            .list_installed()
            .await?
            .into_iter()
            .filter(|p| p.arch == *self.session.source() && p.is_installed())
            .filter(|p| !keep.contains(p.name.as_str()))
            .map(|p| p.name)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Selected names without a target-architecture candidate
    ///
    /// # Errors
    ///
    /// Returns an error if apt cannot be queried.
    pub async fn unavailable(&self, selection: &Selection) -> Result<Vec<String>, Error> {
        let mut missing = Vec::new();
        for name in selection.names() {
            if self
                .ctx
                .pm
                .candidate(&name, self.session.target())
                .await?
                .is_none()
            {
                missing.push(name);
            }
        }
        Ok(missing)
    }

    /// Owners of the files in the initramfs hooks directory
    async fn initramfs_hook_owners(&self) -> Result<BTreeSet<String>, Error> {
        let dir = self.ctx.config.initramfs_hooks_dir();
        let on_disk: BTreeSet<PathBuf> = list_dir(&dir).await?.into_iter().collect();
        if on_disk.is_empty() {
            return Ok(BTreeSet::new());
        }

        let pattern = format!("{}/*", dir.display());
        let mut remnants = on_disk.clone();
        let mut owners = BTreeSet::new();
        for (owner, path) in self.ctx.pm.find_owners(&[pattern]).await? {
            if !on_disk.contains(&path) {
                tracing::debug!(%owner, path = %path.display(), "owned hook missing on disk");
                continue;
            }
            remnants.remove(&path);
            owners.insert(package_name(&owner).to_string());
        }

        if !remnants.is_empty() {
            let hooks: Vec<String> = remnants.iter().map(|p| p.display().to_string()).collect();
            if !self.session.options().force_initramfs {
                return Err(StageError::RemnantInitramfsHooks { hooks }.into());
            }
            self.ctx.emit_warning_with_context(
                "ignoring initramfs hooks without an owning package",
                hooks.join(", "),
            );
        }
        Ok(owners)
    }

    /// `Depends` of the installed tool package, or the fallback list
    async fn tool_dependencies(&self) -> Result<Vec<String>, Error> {
        let packages = &self.ctx.config.packages;
        match self.ctx.pm.dependencies(&packages.tool_package).await {
            Ok(deps) => Ok(deps),
            Err(Error::Package(_)) => Ok(packages.fallback_tool_dependencies.clone()),
            Err(e) => Err(e),
        }
    }

    /// Owners of the login shells in use; lookup failures only warn
    async fn login_shell_owners(&self) -> BTreeSet<String> {
        let current = std::env::var("SHELL").ok();
        let shells = match login_shells(
            std::path::Path::new(fixed_paths::PASSWD_FILE),
            std::path::Path::new(fixed_paths::SHELLS_FILE),
            current.as_deref(),
        )
        .await
        {
            Ok(shells) => shells,
            Err(e) => {
                self.ctx
                    .emit_warning_with_context("could not list login shells", e.to_string());
                return BTreeSet::new();
            }
        };
        if shells.is_empty() {
            return BTreeSet::new();
        }

        let patterns: Vec<String> = shells.iter().map(|s| s.display().to_string()).collect();
        match self.ctx.pm.find_owners(&patterns).await {
            Ok(owners) => owners
                .into_iter()
                .map(|(owner, _)| package_name(&owner).to_string())
                .collect(),
            Err(e) => {
                self.ctx
                    .emit_warning_with_context("could not find login shell owners", e.to_string());
                BTreeSet::new()
            }
        }
    }
}

/// `libc6:amd64` → `libc6`
fn package_name(owner: &str) -> &str {
    owner.split_once(':').map_or(owner, |(name, _)| name)
}

/// Report the selection of a stage
pub(crate) fn emit_selected(ctx: &OpsCtx, session: &CrossgradeSession, selection: &Selection) {
    ctx.emit(AppEvent::Stage(StageEvent::TargetsSelected {
        stage: session.stage(),
        summary: selection.summary(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let mut selection = Selection::new();
        assert!(selection.add("bash", SelectionReason::Priority));
        assert!(!selection.add("bash", SelectionReason::LoginShell));
        selection.add("zsh", SelectionReason::LoginShell);
        selection.add("sudo", SelectionReason::AlwaysIncluded);

        assert_eq!(selection.reason("bash"), Some(SelectionReason::Priority));
        let summary = selection.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(
            summary.by_reason,
            vec![
                (SelectionReason::Priority, 1),
                (SelectionReason::LoginShell, 1),
                (SelectionReason::AlwaysIncluded, 1),
            ]
        );
    }

    #[test]
    fn test_owner_arch_qualifier_dropped() {
        assert_eq!(package_name("libc6:amd64"), "libc6");
        assert_eq!(package_name("bash"), "bash");
    }
}
