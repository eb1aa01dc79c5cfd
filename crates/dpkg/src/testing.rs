//! In-memory package manager for tests
//!
//! Simulates the dpkg database, one apt repository and the failures seen
//! while crossgrading. dpkg error output is rendered in dpkg's own format
//! and parsed with the real parser. Every mutation is counted.

use async_trait::async_trait;
use crossgrader_errors::{Error, PackageError, TransactionError};
use crossgrader_types::{
    Arch, InstalledPackage, MultiArch, PackageRef, PackageStatus, Priority,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::parse::{parse_dpkg_errors, DpkgRunOutcome};
use crate::PackageManager;

const KNOWN_ARCHITECTURES: &[&str] = &[
    "amd64", "arm64", "armel", "armhf", "i386", "mips64el", "ppc64el", "riscv64", "s390x",
];

/// A package instance, installed or available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakePackage {
    pub name: String,
    pub arch: Arch,
    pub version: String,
    pub priority: Priority,
    pub depends: Vec<String>,
    pub multi_arch: MultiArch,
    pub status: PackageStatus,
    /// The instance's prerm exits non-zero
    pub prerm_fails: bool,
}

impl FakePackage {
    pub fn new(name: &str, arch: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            arch: Arch::new(arch),
            version: version.to_string(),
            priority: Priority::Optional,
            depends: Vec::new(),
            multi_arch: MultiArch::No,
            status: PackageStatus::Installed,
            prerm_fails: false,
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn depends<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = deps.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn multi_arch(mut self, multi_arch: MultiArch) -> Self {
        self.multi_arch = multi_arch;
        self
    }

    #[must_use]
    pub fn status(mut self, status: PackageStatus) -> Self {
        self.status = status;
        self
    }

    fn key(&self) -> (String, Arch) {
        (self.name.clone(), self.arch.clone())
    }

    fn to_installed(&self) -> InstalledPackage {
        InstalledPackage {
            name: self.name.clone(),
            arch: self.arch.clone(),
            version: self.version.clone(),
            priority: self.priority,
            depends: self.depends.clone(),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone)]
enum InstallFailure {
    Times(u32),
    Always,
    /// Fails until the named package is installed in the same architecture
    Until(String),
}

#[derive(Debug, Default)]
struct FakeState {
    native: Option<Arch>,
    foreign: Vec<Arch>,
    known: Vec<Arch>,
    installed: BTreeMap<(String, Arch), FakePackage>,
    repository: BTreeMap<(String, Arch), FakePackage>,
    files: Vec<(String, PathBuf)>,
    auto: BTreeSet<(String, Arch)>,
    debs: BTreeMap<PathBuf, PackageRef>,
    install_failures: BTreeMap<String, InstallFailure>,
    removal_failures: BTreeSet<String>,
    download_failures: BTreeSet<String>,
    download_delays: BTreeMap<String, Duration>,
    deferred_configure: BTreeSet<String>,
    fix_broken_configures: bool,
    install_log: Vec<Vec<PackageRef>>,
}

/// In-memory [`PackageManager`]
#[derive(Debug, Default)]
pub struct FakePackageManager {
    state: Mutex<FakeState>,
    mutations: AtomicUsize,
    downloads: AtomicUsize,
}

impl FakePackageManager {
    pub fn new(native: &str) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.lock();
            state.native = Some(Arch::new(native));
            state.known = KNOWN_ARCHITECTURES.iter().copied().map(Arch::new).collect();
        }
        fake
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    /// Put an instance into the database
    pub fn install(&self, pkg: FakePackage) -> &Self {
        self.lock().installed.insert(pkg.key(), pkg);
        self
    }

    /// Make a build available from the repository
    pub fn publish(&self, pkg: FakePackage) -> &Self {
        self.lock().repository.insert(pkg.key(), pkg);
        self
    }

    /// Record that `owner` ships `path`
    pub fn own_file(&self, owner: &str, path: impl Into<PathBuf>) -> &Self {
        self.lock().files.push((owner.to_string(), path.into()));
        self
    }

    pub fn set_auto(&self, name: &str, arch: &str) -> &Self {
        self.lock().auto.insert((name.to_string(), Arch::new(arch)));
        self
    }

    /// The next `times` installs of `name` fail with an unrecognized error
    pub fn fail_install(&self, name: &str, times: u32) -> &Self {
        self.lock()
            .install_failures
            .insert(name.to_string(), InstallFailure::Times(times));
        self
    }

    pub fn fail_install_always(&self, name: &str) -> &Self {
        self.lock()
            .install_failures
            .insert(name.to_string(), InstallFailure::Always);
        self
    }

    /// Installing `name` hits a pre-dependency problem until `dep` is present
    pub fn require_first(&self, name: &str, dep: &str) -> &Self {
        self.lock()
            .install_failures
            .insert(name.to_string(), InstallFailure::Until(dep.to_string()));
        self
    }

    /// The installed `name:arch` gets a failing prerm
    pub fn fail_prerm(&self, name: &str, arch: &str) -> &Self {
        if let Some(pkg) = self
            .lock()
            .installed
            .get_mut(&(name.to_string(), Arch::new(arch)))
        {
            pkg.prerm_fails = true;
        }
        self
    }

    pub fn fail_removal(&self, name: &str) -> &Self {
        self.lock().removal_failures.insert(name.to_string());
        self
    }

    pub fn fail_download(&self, name: &str) -> &Self {
        self.lock().download_failures.insert(name.to_string());
        self
    }

    pub fn delay_download(&self, name: &str, delay: Duration) -> &Self {
        self.lock()
            .download_delays
            .insert(name.to_string(), delay);
        self
    }

    /// Installs of `name` stop at unpacked until `configure_pending`
    pub fn defer_configure(&self, name: &str) -> &Self {
        self.lock().deferred_configure.insert(name.to_string());
        self
    }

    /// `fix_broken` configures everything left unpacked
    pub fn fix_broken_configures(&self) -> &Self {
        self.lock().fix_broken_configures = true;
        self
    }

    /// Number of database mutations performed so far
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Package refs of each `install_downloaded` call, in order
    pub fn install_log(&self) -> Vec<Vec<PackageRef>> {
        self.lock().install_log.clone()
    }

    /// Names installed in `arch`, sorted
    pub fn installed_in(&self, arch: &str) -> Vec<String> {
        self.lock()
            .installed
            .values()
            .filter(|p| p.arch.as_str() == arch && p.status.is_present())
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn instance(&self, name: &str, arch: &str) -> Option<FakePackage> {
        self.lock()
            .installed
            .get(&(name.to_string(), Arch::new(arch)))
            .cloned()
    }

    pub fn is_auto(&self, name: &str, arch: &str) -> bool {
        self.lock()
            .auto
            .contains(&(name.to_string(), Arch::new(arch)))
    }
}

fn not_installed(name: &str) -> Error {
    PackageError::NotInstalled {
        package: name.to_string(),
    }
    .into()
}

fn glob_matches(pattern: &str, path: &Path) -> bool {
    let path = path.to_string_lossy();
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix) && path.len() > prefix.len(),
        None => path == pattern,
    }
}

impl FakeState {
    fn instances(&self, name: &str) -> Vec<&FakePackage> {
        self.installed
            .values()
            .filter(|p| p.name == name && p.status.is_present())
            .collect()
    }

    /// Error message dpkg would print for installing `pkg`, if it fails
    fn install_error(&mut self, pkg: &FakePackage) -> Option<String> {
        match self.install_failures.get_mut(&pkg.name) {
            Some(InstallFailure::Always) => {
                return Some(format!(
                    "unable to install {}:{}: simulated failure",
                    pkg.name, pkg.arch
                ));
            }
            Some(InstallFailure::Times(n)) if *n > 0 => {
                *n -= 1;
                return Some(format!(
                    "unable to install {}:{}: simulated failure",
                    pkg.name, pkg.arch
                ));
            }
            Some(InstallFailure::Until(dep)) => {
                let dep = dep.clone();
                let satisfied = self
                    .installed
                    .get(&(dep.clone(), pkg.arch.clone()))
                    .is_some_and(|d| d.status.is_present());
                if !satisfied {
                    return Some(format!(
                        "pre-dependency problem - not installing {}:{}\n {} is not installed",
                        pkg.name, pkg.arch, dep
                    ));
                }
            }
            _ => {}
        }

        let others: Vec<&FakePackage> = self
            .instances(&pkg.name)
            .into_iter()
            .filter(|o| o.arch != pkg.arch && !o.arch.is_all())
            .collect();

        if pkg.multi_arch == MultiArch::Same {
            if others.iter().any(|o| o.version != pkg.version) {
                return Some(format!(
                    "package {}:{} ({}) with field 'Multi-Arch: same' is not co-installable with {} which has multiple installed instances",
                    pkg.name, pkg.arch, pkg.version, pkg.name
                ));
            }
        } else if let Some(old) = others.iter().find(|o| o.prerm_fails) {
            return Some(format!(
                "old {}:{} package pre-removal script subprocess returned error exit status 1",
                old.name, old.arch
            ));
        }
        None
    }

    fn apply_install(&mut self, mut pkg: FakePackage) {
        if pkg.multi_arch != MultiArch::Same {
            let name = pkg.name.clone();
            let arch = pkg.arch.clone();
            self.installed
                .retain(|(n, a), _| !(n == &name && a != &arch));
        }
        pkg.status = if self.deferred_configure.contains(&pkg.name) {
            PackageStatus::Unpacked
        } else {
            PackageStatus::Installed
        };
        pkg.prerm_fails = false;
        self.installed.insert(pkg.key(), pkg);
    }

    fn configure_all(&mut self) {
        for pkg in self.installed.values_mut() {
            if matches!(
                pkg.status,
                PackageStatus::Unpacked | PackageStatus::HalfConfigured
            ) {
                pkg.status = PackageStatus::Installed;
            }
        }
    }
}

/// Render failures the way dpkg prints them
fn render_dpkg_stderr(operation: &str, failures: &[(String, String)]) -> String {
    let mut out = String::new();
    for (unit, message) in failures {
        let kind = if unit.ends_with(".deb") {
            "archive"
        } else {
            "package"
        };
        let _ = writeln!(out, "dpkg: error processing {kind} {unit} ({operation}):");
        for line in message.lines() {
            let _ = writeln!(out, " {}", line.trim());
        }
    }
    if !failures.is_empty() {
        out.push_str("Errors were encountered while processing:\n");
        for (unit, _) in failures {
            let _ = writeln!(out, " {unit}");
        }
    }
    out
}

fn outcome(operation: &str, failures: &[(String, String)]) -> DpkgRunOutcome {
    let code = if failures.is_empty() { 0 } else { 1 };
    parse_dpkg_errors(&render_dpkg_stderr(operation, failures), Some(code))
}

#[async_trait]
impl PackageManager for FakePackageManager {
    async fn native_architecture(&self) -> Result<Arch, Error> {
        self.lock()
            .native
            .clone()
            .ok_or_else(|| Error::internal("native architecture not set"))
    }

    async fn foreign_architectures(&self) -> Result<Vec<Arch>, Error> {
        Ok(self.lock().foreign.clone())
    }

    async fn known_architectures(&self) -> Result<Vec<Arch>, Error> {
        Ok(self.lock().known.clone())
    }

    async fn list_installed(&self) -> Result<Vec<InstalledPackage>, Error> {
        Ok(self
            .lock()
            .installed
            .values()
            .map(FakePackage::to_installed)
            .collect())
    }

    async fn priority(&self, name: &str) -> Result<Priority, Error> {
        let priority = self.lock().instances(name).first().map(|p| p.priority);
        priority.ok_or_else(|| not_installed(name))
    }

    async fn architecture(&self, name: &str) -> Result<Arch, Error> {
        let archs: Vec<Arch> = self
            .lock()
            .instances(name)
            .iter()
            .map(|p| p.arch.clone())
            .collect();
        match archs.as_slice() {
            [] => Err(not_installed(name)),
            [one] => Ok(one.clone()),
            many => Err(PackageError::AmbiguousName {
                package: name.to_string(),
                instances: many.len(),
            }
            .into()),
        }
    }

    async fn dependencies(&self, name: &str) -> Result<Vec<String>, Error> {
        let depends = self
            .lock()
            .instances(name)
            .first()
            .map(|p| p.depends.clone());
        depends.ok_or_else(|| not_installed(name))
    }

    async fn multi_arch(&self, pkg: &PackageRef) -> Result<MultiArch, Error> {
        self.lock()
            .installed
            .get(&(pkg.name.clone(), pkg.arch.clone()))
            .map(|p| p.multi_arch)
            .ok_or_else(|| not_installed(&pkg.to_string()))
    }

    async fn candidate(&self, name: &str, arch: &Arch) -> Result<Option<String>, Error> {
        Ok(self
            .lock()
            .repository
            .get(&(name.to_string(), arch.clone()))
            .map(|p| p.version.clone()))
    }

    async fn find_owners(&self, patterns: &[String]) -> Result<Vec<(String, PathBuf)>, Error> {
        Ok(self
            .lock()
            .files
            .iter()
            .filter(|(_, path)| patterns.iter().any(|p| glob_matches(p, path)))
            .cloned()
            .collect())
    }

    async fn auto_installed(&self) -> Result<BTreeSet<String>, Error> {
        Ok(self.lock().auto.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn deb_identity(&self, deb: &Path) -> Result<PackageRef, Error> {
        if let Some(pkg) = self.lock().debs.get(deb) {
            return Ok(pkg.clone());
        }
        let stem = deb
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut parts = stem.split('_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(_), Some(arch)) if !name.is_empty() => {
                Ok(PackageRef::new(name, arch.parse()?))
            }
            _ => Err(PackageError::ParseError {
                what: "deb file name".to_string(),
                message: deb.display().to_string(),
            }
            .into()),
        }
    }

    async fn is_configured(&self, pkg: &PackageRef) -> Result<bool, Error> {
        Ok(self
            .lock()
            .installed
            .get(&(pkg.name.clone(), pkg.arch.clone()))
            .is_some_and(|p| p.status.is_configured()))
    }

    async fn update_index(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn download(&self, name: &str, arch: &Arch, dest: &Path) -> Result<PathBuf, Error> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let (delay, fails, available) = {
            let state = self.lock();
            (
                state.download_delays.get(name).copied(),
                state.download_failures.contains(name),
                state
                    .repository
                    .get(&(name.to_string(), arch.clone()))
                    .cloned(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let target = format!("{name}:{arch}");
        if fails {
            return Err(TransactionError::DownloadFailed {
                package: target,
                message: "simulated network failure".to_string(),
            }
            .into());
        }
        let pkg = available.ok_or_else(|| {
            Error::from(TransactionError::DownloadFailed {
                package: target.clone(),
                message: format!("Can't select candidate version for {target}"),
            })
        })?;

        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;
        let path = dest.join(format!("{}_{}_{}.deb", pkg.name, pkg.version, pkg.arch));
        tokio::fs::write(&path, b"!<arch>\n")
            .await
            .map_err(|e| Error::io_with_path(&e, &path))?;
        self.lock().debs.insert(path.clone(), pkg.to_installed().package_ref());
        Ok(path)
    }

    async fn add_architecture(&self, arch: &Arch) -> Result<(), Error> {
        self.mutated();
        let mut state = self.lock();
        if !state.known.contains(arch) {
            return Err(PackageError::InvalidArchitecture {
                arch: arch.to_string(),
            }
            .into());
        }
        if state.native.as_ref() != Some(arch) && !state.foreign.contains(arch) {
            state.foreign.push(arch.clone());
        }
        Ok(())
    }

    async fn install_downloaded(&self, debs: &[PathBuf]) -> Result<DpkgRunOutcome, Error> {
        self.mutated();
        let mut refs = Vec::new();
        for deb in debs {
            refs.push(self.deb_identity(deb).await?);
        }

        let mut state = self.lock();
        state.install_log.push(refs.clone());
        let mut failures = Vec::new();
        for (deb, pkg_ref) in debs.iter().zip(refs) {
            let Some(pkg) = state
                .repository
                .get(&(pkg_ref.name.clone(), pkg_ref.arch.clone()))
                .cloned()
            else {
                failures.push((
                    deb.display().to_string(),
                    "cannot access archive: No such file or directory".to_string(),
                ));
                continue;
            };
            match state.install_error(&pkg) {
                Some(message) => failures.push((deb.display().to_string(), message)),
                None => state.apply_install(pkg),
            }
        }
        Ok(outcome("--install", &failures))
    }

    async fn configure_pending(&self) -> Result<DpkgRunOutcome, Error> {
        self.mutated();
        self.lock().configure_all();
        Ok(outcome("--configure", &[]))
    }

    async fn remove(&self, names: &[String], arch: &Arch) -> Result<DpkgRunOutcome, Error> {
        self.mutated();
        let mut state = self.lock();
        let mut failures = Vec::new();
        for name in names {
            let key = (name.clone(), arch.clone());
            if !state.installed.contains_key(&key) {
                continue;
            }
            if state.removal_failures.contains(name) {
                failures.push((
                    format!("{name}:{arch}"),
                    format!(
                        "installed {name}:{arch} package pre-removal script subprocess returned error exit status 1"
                    ),
                ));
                continue;
            }
            state.installed.remove(&key);
            state.auto.remove(&key);
        }
        Ok(outcome("--purge", &failures))
    }

    async fn force_remove(&self, pkg: &PackageRef) -> Result<bool, Error> {
        self.mutated();
        let mut state = self.lock();
        let key = (pkg.name.clone(), pkg.arch.clone());
        let removable = state.installed.get(&key).is_some_and(|p| !p.prerm_fails)
            && !state.removal_failures.contains(&pkg.name);
        if removable {
            state.installed.remove(&key);
        }
        Ok(removable)
    }

    async fn remove_maintainer_script(
        &self,
        pkg: &PackageRef,
        script: &str,
    ) -> Result<bool, Error> {
        self.mutated();
        let mut state = self.lock();
        let key = (pkg.name.clone(), pkg.arch.clone());
        let removed = match state.installed.get_mut(&key) {
            Some(p) if script == "prerm" && p.prerm_fails => {
                p.prerm_fails = false;
                true
            }
            _ => false,
        };
        if removed {
            state.removal_failures.remove(&pkg.name);
        }
        Ok(removed)
    }

    async fn mark_auto(&self, pkgs: &[PackageRef]) -> Result<(), Error> {
        if pkgs.is_empty() {
            return Ok(());
        }
        self.mutated();
        let mut state = self.lock();
        for pkg in pkgs {
            state.auto.insert((pkg.name.clone(), pkg.arch.clone()));
        }
        Ok(())
    }

    async fn fix_broken(&self) -> Result<bool, Error> {
        self.mutated();
        let mut state = self.lock();
        if state.fix_broken_configures {
            state.configure_all();
            return Ok(true);
        }
        Ok(!state
            .installed
            .values()
            .any(|p| matches!(p.status, PackageStatus::Unpacked | PackageStatus::HalfConfigured)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake() -> FakePackageManager {
        let pm = FakePackageManager::new("amd64");
        pm.install(FakePackage::new("bash", "amd64", "5.2").priority(Priority::Required))
            .publish(FakePackage::new("bash", "arm64", "5.2").priority(Priority::Required));
        pm
    }

    #[tokio::test]
    async fn test_install_replaces_other_arch() {
        let dir = tempfile::tempdir().unwrap();
        let pm = fake();
        let arm64 = Arch::new("arm64");

        let deb = pm.download("bash", &arm64, dir.path()).await.unwrap();
        assert_eq!(pm.deb_identity(&deb).await.unwrap().to_string(), "bash:arm64");

        let outcome = pm.install_downloaded(&[deb]).await.unwrap();
        assert!(outcome.success());
        assert_eq!(pm.installed_in("arm64"), vec!["bash"]);
        assert!(pm.installed_in("amd64").is_empty());
        assert_eq!(pm.mutations(), 1);
    }

    #[tokio::test]
    async fn test_prerm_failure_is_reported_in_dpkg_format() {
        let dir = tempfile::tempdir().unwrap();
        let pm = fake();
        pm.fail_prerm("bash", "amd64");
        let arm64 = Arch::new("arm64");

        let deb = pm.download("bash", &arm64, dir.path()).await.unwrap();
        let outcome = pm.install_downloaded(&[deb.clone()]).await.unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].kind, crate::FailureKind::PrermFailed);

        let old = PackageRef::new("bash", Arch::new("amd64"));
        assert!(pm.remove_maintainer_script(&old, "prerm").await.unwrap());
        assert!(pm.install_downloaded(&[deb]).await.unwrap().success());
    }

    #[tokio::test]
    async fn test_multi_arch_same_version_skew_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        let pm = FakePackageManager::new("amd64");
        pm.install(FakePackage::new("libfoo1", "amd64", "1.0").multi_arch(MultiArch::Same))
            .publish(FakePackage::new("libfoo1", "arm64", "1.1").multi_arch(MultiArch::Same));

        let deb = pm
            .download("libfoo1", &Arch::new("arm64"), dir.path())
            .await
            .unwrap();
        let outcome = pm.install_downloaded(&[deb]).await.unwrap();
        assert_eq!(outcome.failures[0].kind, crate::FailureKind::AmbiguousName);
    }

    #[tokio::test]
    async fn test_unavailable_download() {
        let dir = tempfile::tempdir().unwrap();
        let pm = fake();
        let err = pm
            .download("zsh", &Arch::new("arm64"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::DownloadFailed { .. })
        ));
    }
}
