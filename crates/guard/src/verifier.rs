//! Machine-type comparison for a single file

use crossgrader_dpkg::PackageManager;
use crossgrader_errors::{Error, GuardError};
use crossgrader_events::{EventEmitter, EventSender};
use crossgrader_platform::binary::signature_for;
use crossgrader_platform::{BinaryFormat, Platform, PlatformContext};
use crossgrader_types::{Arch, ArchRecord, ArchVerdict};
use std::path::Path;
use std::sync::Arc;

/// Reads executable headers and compares them with an expected architecture
///
/// Files are only read, never executed. Anything without an ELF header is
/// [`ArchVerdict::NotABinary`], which is never a failure.
#[derive(Clone)]
pub struct ArchVerifier {
    platform: Platform,
    ctx: PlatformContext,
    pm: Option<Arc<dyn PackageManager>>,
}

impl ArchVerifier {
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        let ctx = platform.create_context(None);
        Self {
            platform,
            ctx,
            pm: None,
        }
    }

    /// Verifier over the running system's files
    #[must_use]
    pub fn current() -> Self {
        Self::new(Platform::current())
    }

    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.ctx = self.platform.create_context(Some(tx));
        self
    }

    /// Attribute mismatching files to the packages that ship them
    #[must_use]
    pub fn with_package_manager(mut self, pm: Arc<dyn PackageManager>) -> Self {
        self.pm = Some(pm);
        self
    }

    /// # Errors
    ///
    /// Returns `GuardError::HeaderUnreadable` if the file cannot be opened or read.
    pub async fn verify(&self, path: &Path, expected: &Arch) -> Result<ArchVerdict, Error> {
        Ok(self.inspect(path, expected).await?.verdict)
    }

    /// Full record of one verification
    ///
    /// # Errors
    ///
    /// Returns `GuardError::HeaderUnreadable` if the file cannot be opened or read.
    pub async fn inspect(&self, path: &Path, expected: &Arch) -> Result<ArchRecord, Error> {
        let format = self
            .platform
            .binary()
            .read_format(&self.ctx, path)
            .await
            .map_err(|e| GuardError::HeaderUnreadable {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let (detected, verdict) = classify(format, expected);
        Ok(ArchRecord {
            path: path.to_path_buf(),
            detected,
            expected: expected.clone(),
            verdict,
        })
    }

    /// Package owning `path`, if a package manager was attached and knows it
    pub(crate) async fn owner_of(&self, path: &Path) -> Option<String> {
        let pm = self.pm.as_ref()?;
        let pattern = path.display().to_string();
        match pm.find_owners(&[pattern]).await {
            Ok(owners) => owners.into_iter().next().map(|(name, _)| name),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "owner lookup failed");
                None
            }
        }
    }
}

impl EventEmitter for ArchVerifier {
    fn event_sender(&self) -> Option<&EventSender> {
        self.ctx.event_sender()
    }
}

/// Detected machine name and verdict for a parsed header
///
/// Known Debian architectures are compared by header signature, so class and
/// byte order count where they distinguish architectures. Unknown names fall
/// back to comparing the detected name.
#[must_use]
pub fn classify(format: BinaryFormat, expected: &Arch) -> (Option<String>, ArchVerdict) {
    let header = match format {
        BinaryFormat::Elf(header) => header,
        BinaryFormat::NotElf => return (None, ArchVerdict::NotABinary),
    };
    let detected = header.machine_name();
    let matches = match signature_for(expected.as_str()) {
        Some(sig) => header.matches(&sig),
        None => header.debian_arch() == Some(expected.as_str()),
    };
    let verdict = if matches {
        ArchVerdict::Match
    } else {
        ArchVerdict::Mismatch(detected.clone())
    };
    (Some(detected), verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrader_platform::binary::parse_header;

    fn elf64(machine: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 64];
        buf[..4].copy_from_slice(b"\x7fELF");
        buf[4] = 2;
        buf[5] = 1;
        buf[18..20].copy_from_slice(&machine.to_le_bytes());
        buf
    }

    #[test]
    fn test_classify() {
        let amd64 = parse_header(&elf64(62));
        assert_eq!(
            classify(amd64, &Arch::new("amd64")),
            (Some("amd64".to_string()), ArchVerdict::Match)
        );
        assert_eq!(
            classify(amd64, &Arch::new("arm64")).1,
            ArchVerdict::Mismatch("amd64".to_string())
        );
        assert_eq!(
            classify(parse_header(b"#!/bin/sh\n"), &Arch::new("amd64")),
            (None, ArchVerdict::NotABinary)
        );
    }

    #[test]
    fn test_unknown_expected_arch_never_matches_unknown_machine() {
        let odd = parse_header(&elf64(0x1234));
        let (detected, verdict) = classify(odd, &Arch::new("made-up"));
        assert!(verdict.is_mismatch());
        assert!(detected.unwrap().contains("0x1234"));
    }
}
