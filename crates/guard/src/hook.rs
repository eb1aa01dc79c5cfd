//! Arch-check snippet inside initramfs-tools' `copy_exec()`
//!
//! Every binary copied into the initramfs passes through `copy_exec`, so a
//! call to the arch-check helper at the top of that function sees all of
//! them. The original file is backed up before editing and restored on
//! removal.

use crossgrader_config::{fixed_paths, Config};
use crossgrader_errors::{Error, GuardError};
use crossgrader_events::{AppEvent, EventEmitter, EventSender, GuardEvent};
use crossgrader_platform::fs::{remove_file_if_exists, write_atomic};
use crossgrader_types::Arch;
use std::path::{Path, PathBuf};

pub const HOOK_BEGIN: &str = "# begin arch-check-hook";
pub const HOOK_END: &str = "# end arch-check-hook";

const COPY_EXEC: &str = "copy_exec() {";

/// Shell lines inserted at the top of `copy_exec`; `$1` is the source binary
#[must_use]
pub fn render_snippet(checker: &Path, target: &Arch) -> String {
    let checker = checker.display();
    format!(
        "\t{HOOK_BEGIN}\n\
         \tif [ -x {checker} ]; then\n\
         \t\t{checker} \"$1\" {target} || true\n\
         \tfi\n\
         \t{HOOK_END}\n"
    )
}

/// `contents` with `snippet` placed right after the `copy_exec() {` line
#[must_use]
pub fn insert_snippet(contents: &str, snippet: &str) -> Option<String> {
    let mut out = String::with_capacity(contents.len() + snippet.len());
    let mut inserted = false;
    for line in contents.split_inclusive('\n') {
        out.push_str(line);
        if !inserted && line.trim() == COPY_EXEC {
            if !line.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(snippet);
            inserted = true;
        }
    }
    inserted.then_some(out)
}

/// Installs and removes the arch-check snippet
pub struct InitramfsHook {
    hook_functions: PathBuf,
    backup: PathBuf,
    checker: PathBuf,
    tx: Option<EventSender>,
}

impl EventEmitter for InitramfsHook {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl InitramfsHook {
    pub fn new(hook_functions: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
        Self {
            hook_functions: hook_functions.into(),
            backup: backup.into(),
            checker: PathBuf::from(fixed_paths::ARCH_CHECK_BIN),
            tx: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.hook_functions(), config.hook_functions_backup())
    }

    #[must_use]
    pub fn with_checker(mut self, checker: impl Into<PathBuf>) -> Self {
        self.checker = checker.into();
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    async fn read_functions(&self) -> Result<String, Error> {
        match tokio::fs::read_to_string(&self.hook_functions).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GuardError::HookFunctionsMissing {
                    path: self.hook_functions.display().to_string(),
                }
                .into())
            }
            Err(e) => Err(Error::io_with_path(&e, &self.hook_functions)),
        }
    }

    /// # Errors
    ///
    /// Returns an error if `hook-functions` is missing or unreadable.
    pub async fn is_installed(&self) -> Result<bool, Error> {
        Ok(self
            .read_functions()
            .await?
            .lines()
            .any(|l| l.trim() == HOOK_BEGIN))
    }

    /// Back up `hook-functions` and insert the snippet for `target`
    ///
    /// # Errors
    ///
    /// Returns `HookAlreadyInstalled` if the marker is present, and
    /// `CopyExecNotFound` if the function definition cannot be located.
    pub async fn install(&self, target: &Arch) -> Result<(), Error> {
        let contents = self.read_functions().await?;
        if contents.lines().any(|l| l.trim() == HOOK_BEGIN) {
            return Err(GuardError::HookAlreadyInstalled {
                path: self.hook_functions.display().to_string(),
            }
            .into());
        }
        let patched = insert_snippet(&contents, &render_snippet(&self.checker, target))
            .ok_or_else(|| GuardError::CopyExecNotFound {
                path: self.hook_functions.display().to_string(),
            })?;

        write_atomic(&self.backup, contents.as_bytes()).await?;
        write_atomic(&self.hook_functions, patched.as_bytes()).await?;

        tracing::info!(path = %self.hook_functions.display(), %target, "arch check hook installed");
        self.emit(AppEvent::Guard(GuardEvent::HookInstalled {
            path: self.hook_functions.display().to_string(),
            backup: self.backup.display().to_string(),
        }));
        Ok(())
    }

    /// Restore `hook-functions` from the backup and delete the backup
    ///
    /// # Errors
    ///
    /// Returns `BackupMissing` or `HookNotInstalled` when there is nothing to restore.
    pub async fn remove(&self) -> Result<(), Error> {
        let contents = self.read_functions().await?;
        let original = match tokio::fs::read(&self.backup).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GuardError::BackupMissing {
                    path: self.backup.display().to_string(),
                }
                .into());
            }
            Err(e) => return Err(Error::io_with_path(&e, &self.backup)),
        };
        if !contents.lines().any(|l| l.trim() == HOOK_BEGIN) {
            return Err(GuardError::HookNotInstalled {
                path: self.hook_functions.display().to_string(),
            }
            .into());
        }

        write_atomic(&self.hook_functions, &original).await?;
        remove_file_if_exists(&self.backup).await?;

        tracing::info!(path = %self.hook_functions.display(), "arch check hook removed");
        self.emit(AppEvent::Guard(GuardEvent::HookRemoved {
            path: self.hook_functions.display().to_string(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUNCTIONS: &str = "\
# -*- shell-script -*-

copy_exec() {
\tlocal src=\"${1}\" target=\"${2:-$1}\"
}
";

    #[test]
    fn test_insert_after_definition() {
        let snippet = render_snippet(Path::new("/usr/bin/check"), &Arch::new("amd64"));
        let patched = insert_snippet(FUNCTIONS, &snippet).unwrap();
        let lines: Vec<&str> = patched.lines().collect();
        let at = lines.iter().position(|l| *l == "copy_exec() {").unwrap();
        assert_eq!(lines[at + 1].trim(), HOOK_BEGIN);
        assert!(lines[at + 3].contains("/usr/bin/check \"$1\" amd64 || true"));
        assert!(patched.contains("local src="));
        assert!(patched.starts_with(FUNCTIONS.lines().next().unwrap()));
    }

    #[test]
    fn test_missing_definition() {
        assert!(insert_snippet("copy_file() {\n}\n", "x\n").is_none());
    }
}
