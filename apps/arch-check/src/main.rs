//! crossgrader-arch-check - called from the initramfs hook for every binary
//!
//! Prints a warning when `PATH` was built for another architecture than
//! `EXPECTED_ARCH`. It never fails the initramfs build, so every outcome
//! exits 0.

use clap::Parser;
use crossgrader_errors::{Error, UserFacingError};
use crossgrader_guard::ArchVerifier;
use crossgrader_types::{Arch, ArchVerdict};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "crossgrader-arch-check")]
#[command(version)]
#[command(about = "Check that a binary matches the expected architecture")]
struct Cli {
    /// File to check
    path: PathBuf,

    /// Architecture the file should be built for
    expected_arch: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
        )
        .init();

    if let Some(warning) = check(&cli.path, &cli.expected_arch).await {
        eprintln!("{warning}");
    }
}

async fn check(path: &Path, expected: &str) -> Option<String> {
    let expected: Arch = match expected.parse() {
        Ok(arch) => arch,
        Err(e) => return Some(format!("arch-check: {}", Error::from(e).user_message())),
    };
    let verdict = ArchVerifier::current().verify(path, &expected).await;
    tracing::debug!(path = %path.display(), ?verdict, "checked");
    warning_for(path, &expected, verdict)
}

fn warning_for(
    path: &Path,
    expected: &Arch,
    verdict: Result<ArchVerdict, Error>,
) -> Option<String> {
    match verdict {
        Ok(ArchVerdict::Mismatch(actual)) => Some(format!(
            "arch-check: WARNING: {} is {actual}, expected {expected}; the initramfs may not boot",
            path.display()
        )),
        Ok(ArchVerdict::Match | ArchVerdict::NotABinary) => None,
        Err(e) => Some(format!(
            "arch-check: could not check {}: {}",
            path.display(),
            e.user_message()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_names_both_architectures() {
        let warning = warning_for(
            Path::new("/usr/bin/busybox"),
            &Arch::new("arm64"),
            Ok(ArchVerdict::Mismatch("amd64".to_string())),
        )
        .unwrap();
        assert!(warning.contains("/usr/bin/busybox is amd64, expected arm64"));
    }

    #[test]
    fn test_match_and_scripts_are_silent() {
        let path = Path::new("/usr/share/initramfs-tools/init");
        let arch = Arch::new("arm64");
        assert!(warning_for(path, &arch, Ok(ArchVerdict::Match)).is_none());
        assert!(warning_for(path, &arch, Ok(ArchVerdict::NotABinary)).is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_invalid_arch_warns_instead_of_failing() {
        let warning = check(Path::new("/bin/sh"), "").await.unwrap();
        assert!(warning.starts_with("arch-check:"));
    }
}
