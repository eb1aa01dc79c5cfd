//! System facts: login shells and foreign-architecture execution support

use crossgrader_errors::{Error, PlatformError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::core::PlatformContext;
use crate::process::ProcessOperations;

/// Shells assumed by `getusershell(3)` when `/etc/shells` is missing
const DEFAULT_SHELLS: &[&str] = &["/bin/sh", "/bin/csh"];

/// Valid shells listed in an `/etc/shells` style file
#[must_use]
pub fn parse_shells(contents: &str) -> BTreeSet<PathBuf> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('/'))
        .map(PathBuf::from)
        .collect()
}

/// Shell field of every account in an `/etc/passwd` style file
#[must_use]
pub fn parse_passwd_shells(contents: &str) -> BTreeSet<PathBuf> {
    contents
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .filter_map(|l| l.split(':').nth(6))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Login shells in use on this machine
///
/// Accounts whose shell is not a valid login shell (`nologin`, `false`)
/// are ignored. `current` is the invoking user's `$SHELL`, kept when valid.
///
/// # Errors
///
/// Returns an error if the passwd file cannot be read.
pub async fn login_shells(
    passwd: &Path,
    shells: &Path,
    current: Option<&str>,
) -> Result<BTreeSet<PathBuf>, Error> {
    let passwd_contents = tokio::fs::read_to_string(passwd)
        .await
        .map_err(|e| Error::io_with_path(&e, passwd))?;

    let valid = match tokio::fs::read_to_string(shells).await {
        Ok(contents) => parse_shells(&contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            DEFAULT_SHELLS.iter().map(PathBuf::from).collect()
        }
        Err(e) => return Err(Error::io_with_path(&e, shells)),
    };

    let mut in_use: BTreeSet<PathBuf> = parse_passwd_shells(&passwd_contents)
        .intersection(&valid)
        .cloned()
        .collect();

    if let Some(shell) = current.map(PathBuf::from) {
        if valid.contains(&shell) {
            in_use.insert(shell);
        }
    }
    Ok(in_use)
}

/// How binaries of an architecture can run on this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchSupport {
    Native,
    /// Runs through binfmt emulation
    Emulated,
    /// `arch-test` has no helper for the architecture
    Unknown,
    Unsupported,
}

/// Ask `arch-test` whether `arch` binaries can execute here
///
/// # Errors
///
/// Returns `PlatformError::CommandNotFound` if `arch-test` is not installed.
pub async fn arch_support(
    process: &dyn ProcessOperations,
    ctx: &PlatformContext,
    arch: &str,
) -> Result<ArchSupport, Error> {
    let mut native = process.create_command("arch-test");
    native.args(["-n", arch]);
    let output = process.execute_command(ctx, native).await?;
    match output.code() {
        Some(0) => return Ok(ArchSupport::Native),
        Some(2) => return Ok(ArchSupport::Unknown),
        Some(1) => {}
        _ => {
            return Err(PlatformError::ProcessExecutionFailed {
                command: format!("arch-test -n {arch}"),
                message: output.stderr_lossy(),
            }
            .into())
        }
    }

    let mut emulated = process.create_command("arch-test");
    emulated.arg(arch);
    let output = process.execute_command(ctx, emulated).await?;
    Ok(if output.success() {
        ArchSupport::Emulated
    } else {
        ArchSupport::Unsupported
    })
}
