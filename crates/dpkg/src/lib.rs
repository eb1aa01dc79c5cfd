#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Package-manager adapter for the crossgrader
//!
//! All reads of the installed-package database and every dpkg/apt mutation
//! go through the [`PackageManager`] trait. [`Dpkg`] drives the real tools;
//! the `testing` feature adds an in-memory implementation.

mod dpkg;
pub mod parse;
#[cfg(feature = "testing")]
pub mod testing;

pub use dpkg::{Dpkg, DpkgOptions};
pub use parse::{DpkgRunOutcome, FailedUnit, FailureKind, UnitFailure};

use async_trait::async_trait;
use crossgrader_errors::Error;
use crossgrader_types::{Arch, InstalledPackage, MultiArch, PackageRef, Priority};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Read/write interface to dpkg and apt
///
/// Methods documented as mutations change the package database and must be
/// serialized by the caller. Everything else is read-only.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// dpkg's native architecture
    async fn native_architecture(&self) -> Result<Arch, Error>;

    /// Architectures added with `dpkg --add-architecture`
    async fn foreign_architectures(&self) -> Result<Vec<Arch>, Error>;

    /// Every architecture name dpkg recognizes
    async fn known_architectures(&self) -> Result<Vec<Arch>, Error>;

    /// Every package instance in the database, including half-installed ones
    async fn list_installed(&self) -> Result<Vec<InstalledPackage>, Error>;

    /// Priority of the installed package `name`
    async fn priority(&self, name: &str) -> Result<Priority, Error>;

    /// Architecture of the installed package `name`
    ///
    /// Fails with `PackageError::AmbiguousName` when several architectures
    /// are co-installed.
    async fn architecture(&self, name: &str) -> Result<Arch, Error>;

    /// Depends and Pre-Depends of the installed package `name`
    async fn dependencies(&self, name: &str) -> Result<Vec<String>, Error>;

    async fn multi_arch(&self, pkg: &PackageRef) -> Result<MultiArch, Error>;

    /// Version apt would install for `name:arch`, `None` when unavailable
    async fn candidate(&self, name: &str, arch: &Arch) -> Result<Option<String>, Error>;

    /// Installed packages owning files matching `patterns`, as `(owner, path)`
    async fn find_owners(&self, patterns: &[String]) -> Result<Vec<(String, PathBuf)>, Error>;

    /// Names marked automatically installed in any architecture
    async fn auto_installed(&self) -> Result<BTreeSet<String>, Error>;

    /// Package and architecture recorded in a `.deb`
    async fn deb_identity(&self, deb: &Path) -> Result<PackageRef, Error>;

    /// Whether `pkg` is installed and fully configured
    async fn is_configured(&self, pkg: &PackageRef) -> Result<bool, Error>;

    /// Refresh apt's package lists
    async fn update_index(&self) -> Result<(), Error>;

    /// Fetch the `.deb` for `name:arch` into `dest`
    async fn download(&self, name: &str, arch: &Arch, dest: &Path) -> Result<PathBuf, Error>;

    /// Mutation: `dpkg --add-architecture`
    async fn add_architecture(&self, arch: &Arch) -> Result<(), Error>;

    /// Mutation: unpack and configure the given `.deb` files in one dpkg run
    async fn install_downloaded(&self, debs: &[PathBuf]) -> Result<DpkgRunOutcome, Error>;

    /// Mutation: `dpkg --configure -a`
    async fn configure_pending(&self) -> Result<DpkgRunOutcome, Error>;

    /// Mutation: purge `names` in `arch`
    async fn remove(&self, names: &[String], arch: &Arch) -> Result<DpkgRunOutcome, Error>;

    /// Mutation: remove one instance ignoring reverse dependencies
    async fn force_remove(&self, pkg: &PackageRef) -> Result<bool, Error>;

    /// Mutation: delete a maintainer script of an installed instance
    async fn remove_maintainer_script(&self, pkg: &PackageRef, script: &str)
        -> Result<bool, Error>;

    /// Mutation: mark instances automatically installed
    async fn mark_auto(&self, pkgs: &[PackageRef]) -> Result<(), Error>;

    /// Mutation: `apt-get install -f`
    async fn fix_broken(&self) -> Result<bool, Error>;
}

/// Installed instances of `name` outside `arch`, skipping `Architecture: all`
///
/// # Errors
///
/// Propagates adapter failures.
pub async fn other_instances(
    pm: &dyn PackageManager,
    name: &str,
    arch: &Arch,
) -> Result<Vec<PackageRef>, Error> {
    Ok(pm
        .list_installed()
        .await?
        .into_iter()
        .filter(|p| p.name == name && &p.arch != arch && !p.arch.is_all() && p.is_installed())
        .map(|p| p.package_ref())
        .collect())
}
