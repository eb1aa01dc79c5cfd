//! `PackageManager` over the real dpkg and apt tools

use async_trait::async_trait;
use crossgrader_errors::{Error, PackageError, TransactionError};
use crossgrader_platform::fs::{list_dir, remove_file_if_exists};
use crossgrader_platform::{CommandOutput, PlatformCommand, PlatformContext, ProcessOperations};
use crossgrader_types::{Arch, InstalledPackage, MultiArch, PackageRef, PackageStatus, Priority};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::parse::{self, DpkgRunOutcome};
use crate::PackageManager;

/// Tunables for dpkg invocations
#[derive(Debug, Clone)]
pub struct DpkgOptions {
    /// Lower bound for `--abort-after`
    pub abort_after_min: usize,
    /// `/var/lib/dpkg/info`
    pub info_dir: PathBuf,
}

impl Default for DpkgOptions {
    fn default() -> Self {
        Self {
            abort_after_min: 50,
            info_dir: PathBuf::from("/var/lib/dpkg/info"),
        }
    }
}

/// dpkg/apt adapter
pub struct Dpkg {
    process: Arc<dyn ProcessOperations>,
    ctx: PlatformContext,
    options: DpkgOptions,
    /// Size of the last install run, reused for the following configure
    last_batch: AtomicUsize,
}

impl Dpkg {
    pub fn new(
        process: Arc<dyn ProcessOperations>,
        ctx: PlatformContext,
        options: DpkgOptions,
    ) -> Self {
        Self {
            process,
            ctx,
            options,
            last_batch: AtomicUsize::new(0),
        }
    }

    /// dpkg stops after this many errors; a package can report two
    fn abort_after(&self, units: usize) -> String {
        format!(
            "--abort-after={}",
            self.options.abort_after_min.max(units.saturating_mul(2))
        )
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, Error> {
        let mut cmd = PlatformCommand::new(program);
        cmd.args(args);
        self.process.execute_command(&self.ctx, cmd).await
    }

    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<String, Error> {
        let output = self.run(program, args).await?;
        if output.success() {
            Ok(output.stdout_lossy())
        } else {
            Err(command_failed(program, args, &output))
        }
    }

    /// `dpkg-query -W -f FORMAT target`, `None` if nothing matches
    async fn query(&self, format: &str, target: &str) -> Result<Option<String>, Error> {
        let output = self.run("dpkg-query", &["-W", "-f", format, target]).await?;
        match output.code() {
            Some(0) => Ok(Some(output.stdout_lossy())),
            // dpkg-query exits 1 for "no packages found matching"
            Some(1) => Ok(None),
            _ => Err(command_failed("dpkg-query", &["-W", target], &output)),
        }
    }

    async fn query_installed(&self, format: &str, name: &str) -> Result<String, Error> {
        self.query(format, name)
            .await?
            .ok_or_else(|| {
                PackageError::NotInstalled {
                    package: name.to_string(),
                }
                .into()
            })
    }

    async fn run_dpkg(&self, args: Vec<String>) -> Result<DpkgRunOutcome, Error> {
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run("dpkg", &refs).await?;
        let outcome = parse::parse_dpkg_errors(&output.stderr_lossy(), output.code());
        if !outcome.success() {
            tracing::debug!(
                exit_code = ?outcome.exit_code,
                failures = outcome.failures.len(),
                "dpkg {} reported failures",
                args.first().map_or("", String::as_str)
            );
        }
        Ok(outcome)
    }
}

fn command_failed(program: &str, args: &[&str], output: &CommandOutput) -> Error {
    TransactionError::CommandFailed {
        command: std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" "),
        code: output.code(),
        stderr: output.stderr_lossy().trim().to_string(),
    }
    .into()
}

#[async_trait]
impl PackageManager for Dpkg {
    async fn native_architecture(&self) -> Result<Arch, Error> {
        let out = self.run_checked("dpkg", &["--print-architecture"]).await?;
        Ok(out.trim().parse::<Arch>()?)
    }

    async fn foreign_architectures(&self) -> Result<Vec<Arch>, Error> {
        let out = self
            .run_checked("dpkg", &["--print-foreign-architectures"])
            .await?;
        Ok(parse::parse_arch_list(&out))
    }

    async fn known_architectures(&self) -> Result<Vec<Arch>, Error> {
        let out = self
            .run_checked("dpkg-architecture", &["--list-known"])
            .await?;
        Ok(parse::parse_arch_list(&out))
    }

    async fn list_installed(&self) -> Result<Vec<InstalledPackage>, Error> {
        let out = self
            .run_checked("dpkg-query", &["-W", "-f", parse::INSTALLED_FORMAT])
            .await?;
        Ok(parse::parse_installed(&out)?)
    }

    async fn priority(&self, name: &str) -> Result<Priority, Error> {
        let out = self.query_installed("${Priority}\n", name).await?;
        Ok(out
            .lines()
            .next()
            .map(Priority::from_field)
            .unwrap_or_default())
    }

    async fn architecture(&self, name: &str) -> Result<Arch, Error> {
        let out = self
            .query_installed("${Architecture}\t${Status}\n", name)
            .await?;
        let archs: Vec<Arch> = out
            .lines()
            .filter_map(|l| l.split_once('\t'))
            .filter(|(_, status)| PackageStatus::from_field(status).is_present())
            .map(|(arch, _)| Arch::new(arch))
            .collect();
        match archs.as_slice() {
            [] => Err(PackageError::NotInstalled {
                package: name.to_string(),
            }
            .into()),
            [arch] => Ok(arch.clone()),
            many => Err(PackageError::AmbiguousName {
                package: name.to_string(),
                instances: many.len(),
            }
            .into()),
        }
    }

    async fn dependencies(&self, name: &str) -> Result<Vec<String>, Error> {
        let out = self
            .query_installed("${Pre-Depends}\t${Depends}\n", name)
            .await?;
        let line = out.lines().next().unwrap_or_default();
        let (pre, deps) = line.split_once('\t').unwrap_or((line, ""));
        let mut all = parse::parse_depends(pre);
        for dep in parse::parse_depends(deps) {
            if !all.contains(&dep) {
                all.push(dep);
            }
        }
        Ok(all)
    }

    async fn multi_arch(&self, pkg: &PackageRef) -> Result<MultiArch, Error> {
        let out = self
            .query_installed("${Multi-Arch}", &pkg.to_string())
            .await?;
        Ok(MultiArch::from_field(&out))
    }

    async fn candidate(&self, name: &str, arch: &Arch) -> Result<Option<String>, Error> {
        let target = format!("{name}:{arch}");
        let out = self.run_checked("apt-cache", &["policy", target.as_str()]).await?;
        Ok(parse::parse_policy_candidate(&out))
    }

    async fn find_owners(&self, patterns: &[String]) -> Result<Vec<(String, PathBuf)>, Error> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["-S"];
        args.extend(patterns.iter().map(String::as_str));
        // exits 1 when some pattern matches nothing; the rest is still printed
        let output = self.run("dpkg-query", &args).await?;
        Ok(parse::parse_owners(&output.stdout_lossy()))
    }

    async fn auto_installed(&self) -> Result<BTreeSet<String>, Error> {
        let out = self.run_checked("apt-mark", &["showauto"]).await?;
        Ok(parse::parse_auto_marks(&out))
    }

    async fn deb_identity(&self, deb: &Path) -> Result<PackageRef, Error> {
        let path = deb.to_string_lossy();
        let out = self
            .run_checked(
                "dpkg-deb",
                &["--showformat=${Package}:${Architecture}", "-W", &*path],
            )
            .await?;
        Ok(out.trim().parse::<PackageRef>()?)
    }

    async fn is_configured(&self, pkg: &PackageRef) -> Result<bool, Error> {
        Ok(self
            .query("${Status}", &pkg.to_string())
            .await?
            .is_some_and(|s| PackageStatus::from_field(&s).is_configured()))
    }

    async fn update_index(&self) -> Result<(), Error> {
        self.run_checked("apt-get", &["update"]).await?;
        Ok(())
    }

    async fn download(&self, name: &str, arch: &Arch, dest: &Path) -> Result<PathBuf, Error> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;

        let target = format!("{name}:{arch}");
        let mut cmd = PlatformCommand::new("apt-get");
        cmd.args(["download", target.as_str()]).current_dir(dest);
        let output = self.process.execute_command(&self.ctx, cmd).await?;
        if !output.success() {
            return Err(TransactionError::DownloadFailed {
                package: target,
                message: output.stderr_lossy().trim().to_string(),
            }
            .into());
        }

        let prefix = format!("{name}_");
        let suffix = format!("_{arch}.deb");
        list_dir(dest)
            .await?
            .into_iter()
            .rev()
            .find(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(&suffix))
            })
            .ok_or_else(|| {
                TransactionError::DownloadFailed {
                    package: target,
                    message: format!("no matching .deb in {}", dest.display()),
                }
                .into()
            })
    }

    async fn add_architecture(&self, arch: &Arch) -> Result<(), Error> {
        self.run_checked("dpkg", &["--add-architecture", arch.as_str()])
            .await?;
        Ok(())
    }

    async fn install_downloaded(&self, debs: &[PathBuf]) -> Result<DpkgRunOutcome, Error> {
        if debs.is_empty() {
            return Ok(DpkgRunOutcome {
                exit_code: Some(0),
                ..DpkgRunOutcome::default()
            });
        }
        self.last_batch.store(debs.len(), Ordering::Relaxed);
        let mut args = vec!["-i".to_string(), self.abort_after(debs.len())];
        args.extend(debs.iter().map(|d| d.to_string_lossy().into_owned()));
        self.run_dpkg(args).await
    }

    async fn configure_pending(&self) -> Result<DpkgRunOutcome, Error> {
        let units = self.last_batch.load(Ordering::Relaxed);
        self.run_dpkg(vec![
            "--configure".to_string(),
            "-a".to_string(),
            self.abort_after(units),
        ])
        .await
    }

    async fn remove(&self, names: &[String], arch: &Arch) -> Result<DpkgRunOutcome, Error> {
        if names.is_empty() {
            return Ok(DpkgRunOutcome {
                exit_code: Some(0),
                ..DpkgRunOutcome::default()
            });
        }
        let mut args = vec!["--purge".to_string(), self.abort_after(names.len())];
        args.extend(names.iter().map(|n| format!("{n}:{arch}")));
        self.run_dpkg(args).await
    }

    async fn force_remove(&self, pkg: &PackageRef) -> Result<bool, Error> {
        let target = pkg.to_string();
        let output = self
            .run("dpkg", &["--remove", "--force-depends", target.as_str()])
            .await?;
        Ok(output.success())
    }

    async fn remove_maintainer_script(
        &self,
        pkg: &PackageRef,
        script: &str,
    ) -> Result<bool, Error> {
        // Multi-Arch: same instances keep arch-qualified scripts
        let qualified = self.options.info_dir.join(format!("{pkg}.{script}"));
        let plain = self.options.info_dir.join(format!("{}.{script}", pkg.name));
        if remove_file_if_exists(&qualified).await? {
            return Ok(true);
        }
        remove_file_if_exists(&plain).await
    }

    async fn mark_auto(&self, pkgs: &[PackageRef]) -> Result<(), Error> {
        if pkgs.is_empty() {
            return Ok(());
        }
        let targets: Vec<String> = pkgs.iter().map(ToString::to_string).collect();
        let mut args = vec!["auto"];
        args.extend(targets.iter().map(String::as_str));
        self.run_checked("apt-mark", &args).await?;
        Ok(())
    }

    async fn fix_broken(&self) -> Result<bool, Error> {
        let output = self.run("apt-get", &["install", "-f", "-y"]).await?;
        Ok(output.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrader_platform::Platform;

    fn dpkg(info_dir: PathBuf) -> Dpkg {
        Dpkg::new(
            Platform::current().process_handle(),
            PlatformContext::default(),
            DpkgOptions {
                abort_after_min: 50,
                info_dir,
            },
        )
    }

    #[test]
    fn test_abort_after_scales_with_batch() {
        let d = dpkg(PathBuf::from("/nonexistent"));
        assert_eq!(d.abort_after(3), "--abort-after=50");
        assert_eq!(d.abort_after(40), "--abort-after=80");
    }

    #[tokio::test]
    async fn test_remove_maintainer_script_prefers_qualified_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libfoo1:amd64.prerm"), "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::write(dir.path().join("bash.prerm"), "#!/bin/sh\nexit 1\n").unwrap();

        let d = dpkg(dir.path().to_path_buf());
        let libfoo = PackageRef::new("libfoo1", Arch::new("amd64"));
        assert!(d.remove_maintainer_script(&libfoo, "prerm").await.unwrap());
        assert!(!dir.path().join("libfoo1:amd64.prerm").exists());

        let bash = PackageRef::new("bash", Arch::new("amd64"));
        assert!(d.remove_maintainer_script(&bash, "prerm").await.unwrap());
        assert!(!d.remove_maintainer_script(&bash, "prerm").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_mutations_skip_dpkg() {
        let d = dpkg(PathBuf::from("/nonexistent"));
        assert!(d.install_downloaded(&[]).await.unwrap().success());
        assert!(d.remove(&[], &Arch::new("arm64")).await.unwrap().success());
        d.mark_auto(&[]).await.unwrap();
    }
}
