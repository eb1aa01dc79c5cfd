//! package-check - record installed packages and verify a crossgrade
//!
//! The first run saves every installed package as a baseline. Later runs
//! compare the live system against it and list packages that have no
//! configured instance for the current native architecture.

use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use console::style;
use crossgrader_config::Config;
use crossgrader_dpkg::{Dpkg, DpkgOptions, PackageManager};
use crossgrader_errors::Error;
use crossgrader_platform::Platform;
use crossgrader_state::PackageSnapshot;
use crossgrader_types::{Arch, ChangeType, PackageChange, PackageRef};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "package-check")]
#[command(version)]
#[command(about = "Compare installed packages against the pre-crossgrade baseline")]
struct Cli {
    /// Delete the saved baseline
    #[arg(long)]
    cleanup: bool,

    /// Output in JSON format
    #[arg(long)]
    json: bool,

    /// Use alternate config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum CheckReport {
    /// No baseline existed, one was written
    Saved { path: PathBuf, packages: usize },
    /// Baseline compared with the live system
    Compared {
        baseline: Arch,
        target: Arch,
        changes: Vec<PackageChange>,
        not_crossgraded: Vec<PackageRef>,
        missing: Vec<PackageRef>,
    },
    Cleaned { path: PathBuf, removed: bool },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let report = match run(&cli).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    } else {
        render(&report);
    }
}

async fn run(cli: &Cli) -> Result<CheckReport, Error> {
    let mut config = Config::load_or_default(cli.config.as_deref()).await?;
    config.merge_env()?;
    let path = config.snapshot_path();

    if cli.cleanup {
        let removed = crossgrader_platform::fs::remove_file_if_exists(&path).await?;
        return Ok(CheckReport::Cleaned { path, removed });
    }

    let platform = Platform::current();
    let dpkg = Dpkg::new(
        platform.process_handle(),
        platform.create_context(None),
        DpkgOptions {
            abort_after_min: config.transaction.abort_after_min,
            info_dir: config.dpkg_info_dir(),
        },
    );
    check(&dpkg, &path).await
}

/// Save a baseline at `path`, or compare the live system against it
async fn check(pm: &dyn PackageManager, path: &Path) -> Result<CheckReport, Error> {
    let current = PackageSnapshot::capture(pm).await?;

    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        current.save(path).await?;
        tracing::info!(path = %path.display(), "baseline saved");
        return Ok(CheckReport::Saved {
            path: path.to_path_buf(),
            packages: current.packages.len(),
        });
    }

    let baseline = PackageSnapshot::load(path).await?;
    let audit = baseline.audit(&current, &current.native);
    let diff = baseline.diff(&current);
    tracing::info!(
        not_crossgraded = audit.not_crossgraded.len(),
        missing = audit.missing.len(),
        changes = diff.changes.len(),
        "baseline compared"
    );
    Ok(CheckReport::Compared {
        baseline: baseline.native,
        target: current.native,
        changes: diff.changes,
        not_crossgraded: audit.not_crossgraded,
        missing: audit.missing,
    })
}

fn render(report: &CheckReport) {
    match report {
        CheckReport::Saved { path, packages } => {
            println!("Saved {packages} packages to {}.", path.display());
            println!("Run package-check again after the crossgrade to compare.");
        }
        CheckReport::Cleaned { path, removed } => {
            if *removed {
                println!("Removed {}.", path.display());
            } else {
                println!("No baseline at {}.", path.display());
            }
        }
        CheckReport::Compared {
            baseline,
            target,
            changes,
            not_crossgraded,
            missing,
        } => {
            println!("Baseline {baseline}, system now {target}.");
            let crossgraded = changes
                .iter()
                .filter(|c| c.change_type == ChangeType::Crossgrade)
                .count();
            println!("{crossgraded} packages changed architecture.");

            if not_crossgraded.is_empty() && missing.is_empty() {
                println!("{}", style("All packages crossgraded.").green());
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(
                    ["Package", "Expected", "Problem"]
                        .iter()
                        .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
                );
            for pkg in not_crossgraded {
                table.add_row(vec![
                    Cell::new(&pkg.name),
                    Cell::new(&pkg.arch),
                    Cell::new("not crossgraded"),
                ]);
            }
            for pkg in missing {
                table.add_row(vec![
                    Cell::new(&pkg.name),
                    Cell::new(&pkg.arch),
                    Cell::new("missing"),
                ]);
            }
            println!("{table}");
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrader_dpkg::testing::{FakePackage, FakePackageManager};
    use crossgrader_types::PackageStatus;

    fn amd64_system() -> FakePackageManager {
        let pm = FakePackageManager::new("amd64");
        pm.install(FakePackage::new("bash", "amd64", "5.2-1"));
        pm.install(FakePackage::new("coreutils", "amd64", "9.1-1"));
        pm.install(FakePackage::new("tzdata", "all", "2024a-1"));
        pm
    }

    #[tokio::test]
    async fn test_first_run_saves_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");

        let report = check(&amd64_system(), &path).await.unwrap();
        match report {
            CheckReport::Saved { packages, .. } => assert_eq!(packages, 3),
            other => panic!("expected Saved, got {other:?}"),
        }
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_complete_crossgrade_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        check(&amd64_system(), &path).await.unwrap();

        let after = FakePackageManager::new("arm64");
        after.install(FakePackage::new("bash", "arm64", "5.2-1"));
        after.install(FakePackage::new("coreutils", "arm64", "9.1-1"));
        after.install(FakePackage::new("tzdata", "all", "2024a-1"));

        match check(&after, &path).await.unwrap() {
            CheckReport::Compared {
                baseline,
                target,
                changes,
                not_crossgraded,
                missing,
            } => {
                assert_eq!(baseline, Arch::new("amd64"));
                assert_eq!(target, Arch::new("arm64"));
                assert!(not_crossgraded.is_empty());
                assert!(missing.is_empty());
                assert_eq!(
                    changes
                        .iter()
                        .filter(|c| c.change_type == ChangeType::Crossgrade)
                        .count(),
                    2
                );
            }
            other => panic!("expected Compared, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_leftover_and_missing_packages_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        check(&amd64_system(), &path).await.unwrap();

        let after = FakePackageManager::new("arm64");
        after.install(FakePackage::new("bash", "amd64", "5.2-1"));
        after.install(
            FakePackage::new("bash", "arm64", "5.2-1").status(PackageStatus::Unpacked),
        );
        after.install(FakePackage::new("tzdata", "all", "2024a-1"));

        match check(&after, &path).await.unwrap() {
            CheckReport::Compared {
                not_crossgraded,
                missing,
                ..
            } => {
                assert_eq!(
                    not_crossgraded,
                    vec![PackageRef::new("bash", Arch::new("arm64"))]
                );
                assert_eq!(
                    missing,
                    vec![PackageRef::new("coreutils", Arch::new("arm64"))]
                );
            }
            other => panic!("expected Compared, got {other:?}"),
        }
    }
}
