//! Command line interface definition

use clap::Parser;
use crossgrader_ops::SessionOptions;
use crossgrader_types::{Arch, ColorChoice, Stage};
use std::path::PathBuf;

/// crossgrader - move a Debian installation to another architecture
///
/// Run without a stage flag for stage one (boot-critical packages), reboot,
/// then `--second-stage` for everything else and `--third-stage FROM` to
/// remove the old architecture.
#[derive(Parser, Debug)]
#[command(name = "crossgrader")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Crossgrade a Debian system to another architecture")]
pub struct Cli {
    /// Architecture to crossgrade to (e.g. amd64)
    #[arg(
        value_name = "TARGET_ARCH",
        required_unless_present_any = ["cleanup", "install_from"]
    )]
    pub target: Option<Arch>,

    /// Crossgrade every remaining package
    #[arg(long, conflicts_with = "third_stage")]
    pub second_stage: bool,

    /// Remove all packages still installed in FROM_ARCH
    #[arg(long, value_name = "FROM_ARCH")]
    pub third_stage: Option<Arch>,

    /// Show what would be done without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Continue even if some packages have no build in the target architecture
    #[arg(long)]
    pub force_unavailable: bool,

    /// Continue even if some initramfs hooks belong to no package
    #[arg(long)]
    pub force_initramfs: bool,

    /// --force-unavailable and --force-initramfs, and run a stage after a failed one
    #[arg(short = 'f', long)]
    pub force_all: bool,

    /// Crossgrade only these packages; with --third-stage, keep them
    #[arg(short = 'p', long, value_name = "NAME", num_args = 1..)]
    pub packages: Vec<String>,

    /// Download the target packages but do not install them
    #[arg(long, conflicts_with_all = ["third_stage", "dry_run"])]
    pub download_only: bool,

    /// Install every .deb in DIR (default: apt's archive cache) and nothing else
    #[arg(
        long,
        value_name = "DIR",
        num_args = 0..=1,
        conflicts_with_all = ["second_stage", "third_stage", "download_only", "packages"]
    )]
    pub install_from: Option<Option<PathBuf>>,

    /// Remove crossgrader data and the initramfs arch-check hook
    #[arg(
        long,
        conflicts_with_all = ["second_stage", "third_stage", "download_only", "install_from", "dry_run"]
    )]
    pub cleanup: bool,

    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Skip the boot-binary check after a stage
    #[arg(long)]
    pub no_preflight: bool,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Output and configuration switches
#[derive(Parser, Debug)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Write a JSON debug log to the storage directory
    #[arg(long)]
    pub debug: bool,

    /// Color output control
    #[arg(long, value_enum)]
    pub color: Option<ColorChoice>,

    /// Use alternate config file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// What this invocation does, derived from the flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Cleanup,
    InstallFrom(Option<PathBuf>),
    Stage {
        target: Arch,
        stage: Stage,
        from: Option<Arch>,
    },
}

impl Cli {
    /// Resolve the action; clap has already rejected conflicting flags
    pub fn action(&self) -> Option<Action> {
        if self.cleanup {
            return Some(Action::Cleanup);
        }
        if let Some(dir) = &self.install_from {
            return Some(Action::InstallFrom(dir.clone()));
        }
        let target = self.target.clone()?;
        let (stage, from) = match (&self.third_stage, self.second_stage) {
            (Some(from), _) => (Stage::Third, Some(from.clone())),
            (None, true) => (Stage::Second, None),
            (None, false) => (Stage::First, None),
        };
        Some(Action::Stage {
            target,
            stage,
            from,
        })
    }

    pub fn session_options(&self) -> SessionOptions {
        let options = SessionOptions {
            dry_run: self.dry_run,
            download_only: self.download_only,
            force_unavailable: self.force_unavailable,
            force_initramfs: self.force_initramfs,
            force_stage: false,
            packages: self.packages.clone(),
        };
        if self.force_all {
            options.force_all()
        } else {
            options
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("crossgrader").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_stage_selection() {
        let cli = parse(&["amd64"]).unwrap();
        assert_eq!(
            cli.action(),
            Some(Action::Stage {
                target: Arch::new("amd64"),
                stage: Stage::First,
                from: None
            })
        );

        let cli = parse(&["amd64", "--second-stage"]).unwrap();
        assert!(matches!(
            cli.action(),
            Some(Action::Stage {
                stage: Stage::Second,
                ..
            })
        ));

        let cli = parse(&["amd64", "--third-stage", "arm64"]).unwrap();
        assert_eq!(
            cli.action(),
            Some(Action::Stage {
                target: Arch::new("amd64"),
                stage: Stage::Third,
                from: Some(Arch::new("arm64"))
            })
        );
    }

    #[test]
    fn test_conflicting_stages_rejected() {
        assert!(parse(&["amd64", "--second-stage", "--third-stage", "arm64"]).is_err());
        assert!(parse(&["amd64", "--third-stage", "arm64", "--download-only"]).is_err());
        assert!(parse(&["--cleanup", "--second-stage"]).is_err());
    }

    #[test]
    fn test_target_required_for_stages_only() {
        assert!(parse(&[]).is_err());
        assert_eq!(parse(&["--cleanup"]).unwrap().action(), Some(Action::Cleanup));
        assert_eq!(
            parse(&["--install-from"]).unwrap().action(),
            Some(Action::InstallFrom(None))
        );
        assert_eq!(
            parse(&["--install-from", "/tmp/debs"]).unwrap().action(),
            Some(Action::InstallFrom(Some(PathBuf::from("/tmp/debs"))))
        );
    }

    #[test]
    fn test_invalid_architecture_rejected() {
        assert!(parse(&["AMD64"]).is_err());
    }

    #[test]
    fn test_force_all_sets_every_override() {
        let options = parse(&["amd64", "-f", "-p", "bash", "coreutils"])
            .unwrap()
            .session_options();
        assert!(options.force_unavailable);
        assert!(options.force_initramfs);
        assert!(options.force_stage);
        assert_eq!(options.packages, vec!["bash", "coreutils"]);

        let options = parse(&["amd64", "--force-unavailable"])
            .unwrap()
            .session_options();
        assert!(options.force_unavailable);
        assert!(!options.force_initramfs);
        assert!(!options.force_stage);
    }
}
