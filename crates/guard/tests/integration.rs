//! Verification against real files on disk

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossgrader_dpkg::testing::FakePackageManager;
use crossgrader_errors::{Error, GuardError, StageError};
use crossgrader_events::{AppEvent, GuardEvent, VerifyScope};
use crossgrader_guard::{ArchVerifier, InitramfsHook, HOOK_BEGIN};
use crossgrader_types::{Arch, ArchVerdict};
use tempfile::TempDir;

fn write_elf(path: &Path, machine: u16) {
    let mut header = vec![0u8; 64];
    header[..4].copy_from_slice(b"\x7fELF");
    header[4] = 2;
    header[5] = 1;
    header[18..20].copy_from_slice(&machine.to_le_bytes());
    std::fs::write(path, header).unwrap();
}

fn amd64() -> Arch {
    Arch::new("amd64")
}

#[tokio::test]
async fn test_verify_verdicts() {
    let dir = TempDir::new().unwrap();
    let binary = dir.path().join("true");
    let script = dir.path().join("script.sh");
    write_elf(&binary, 62);
    std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();

    let verifier = ArchVerifier::current();
    assert_eq!(
        verifier.verify(&binary, &amd64()).await.unwrap(),
        ArchVerdict::Match
    );
    assert_eq!(
        verifier.verify(&binary, &Arch::new("arm64")).await.unwrap(),
        ArchVerdict::Mismatch("amd64".to_string())
    );
    assert_eq!(
        verifier.verify(&script, &amd64()).await.unwrap(),
        ArchVerdict::NotABinary
    );

    let err = verifier
        .verify(&dir.path().join("missing"), &amd64())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Guard(GuardError::HeaderUnreadable { .. })
    ));
}

#[tokio::test]
async fn test_scan_walks_directories_and_never_fails() {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    write_elf(&bin.join("busybox"), 62);
    write_elf(&bin.join("old-tool"), 183);
    std::fs::write(bin.join("README"), "text").unwrap();

    let pm = FakePackageManager::new("amd64");
    pm.own_file("old-tool", bin.join("old-tool"));

    let (tx, mut rx) = crossgrader_events::channel();
    let verifier = ArchVerifier::current()
        .with_event_sender(tx)
        .with_package_manager(Arc::new(pm));
    let report = verifier
        .scan(&[bin.clone(), dir.path().join("gone")], &amd64())
        .await;

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.not_binaries(), 1);
    assert_eq!(report.skipped.len(), 1);
    let mismatched: Vec<PathBuf> = report.mismatches().map(|r| r.path.clone()).collect();
    assert_eq!(mismatched, vec![bin.join("old-tool")]);

    let mut owners = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let AppEvent::Guard(GuardEvent::ArchitectureMismatch { scope, owner, .. }) = msg.event {
            assert_eq!(scope, VerifyScope::Scan);
            owners.push(owner);
        }
    }
    assert_eq!(owners, vec![Some("old-tool".to_string())]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scan_walks_nested_directories_in_name_order() {
    let dir = TempDir::new().unwrap();
    let lib = dir.path().join("usr/lib/x86_64-linux-gnu");
    std::fs::create_dir_all(&lib).unwrap();
    write_elf(&lib.join("libz.so.1"), 62);
    write_elf(&lib.join("liba.so.1"), 62);
    write_elf(&dir.path().join("usr/init"), 62);

    let report = ArchVerifier::current()
        .scan(&[dir.path().join("usr"), dir.path().join("missing")], &amd64())
        .await;
    let paths: Vec<PathBuf> = report.records.iter().map(|r| r.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            dir.path().join("usr/init"),
            lib.join("liba.so.1"),
            lib.join("libz.so.1"),
        ]
    );
    assert!(report.is_clean());
    assert_eq!(
        report.skipped,
        vec![(dir.path().join("missing"), "no such file".to_string())]
    );
}

#[tokio::test]
async fn test_preflight_blocks_on_mismatch() {
    let dir = TempDir::new().unwrap();
    let sh = dir.path().join("sh");
    let dpkg = dir.path().join("dpkg");
    write_elf(&sh, 62);
    write_elf(&dpkg, 183);

    let verifier = ArchVerifier::current();
    let clean = verifier
        .preflight(&[sh.clone(), dir.path().join("absent")], &amd64())
        .await
        .unwrap();
    assert!(clean.is_clean());

    let err = verifier
        .preflight(&[sh, dpkg.clone()], &amd64())
        .await
        .unwrap_err();
    match err {
        Error::Stage(StageError::PreflightMismatch { paths, .. }) => {
            assert_eq!(paths, vec![dpkg.display().to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

const HOOK_FUNCTIONS: &str = "\
# -*- shell-script -*-

copy_file() {
\t:
}

copy_exec() {
\tlocal src=\"${1}\" target=\"${2:-$1}\"
\tcopy_file binary \"${src}\" \"${target}\" || return $(($? - 1))
}
";

#[tokio::test]
async fn test_hook_install_and_restore() {
    let dir = TempDir::new().unwrap();
    let functions = dir.path().join("hook-functions");
    let backup = dir.path().join("state").join("hook-functions.bak");
    std::fs::write(&functions, HOOK_FUNCTIONS).unwrap();

    let hook = InitramfsHook::new(&functions, &backup);
    assert!(!hook.is_installed().await.unwrap());

    hook.install(&amd64()).await.unwrap();
    assert!(hook.is_installed().await.unwrap());
    let patched = std::fs::read_to_string(&functions).unwrap();
    assert!(patched.contains(HOOK_BEGIN));
    assert!(patched.contains("/usr/bin/crossgrader-arch-check \"$1\" amd64 || true"));
    assert_eq!(std::fs::read_to_string(&backup).unwrap(), HOOK_FUNCTIONS);

    let again = hook.install(&amd64()).await.unwrap_err();
    assert!(matches!(
        again,
        Error::Guard(GuardError::HookAlreadyInstalled { .. })
    ));

    hook.remove().await.unwrap();
    assert_eq!(std::fs::read_to_string(&functions).unwrap(), HOOK_FUNCTIONS);
    assert!(!backup.exists());

    let err = hook.remove().await.unwrap_err();
    assert!(matches!(err, Error::Guard(GuardError::BackupMissing { .. })));
}

#[tokio::test]
async fn test_hook_requires_copy_exec() {
    let dir = TempDir::new().unwrap();
    let functions = dir.path().join("hook-functions");
    std::fs::write(&functions, "copy_file() {\n}\n").unwrap();

    let hook = InitramfsHook::new(&functions, dir.path().join("bak"));
    let err = hook.install(&amd64()).await.unwrap_err();
    assert!(matches!(err, Error::Guard(GuardError::CopyExecNotFound { .. })));
    assert!(!dir.path().join("bak").exists());

    let missing = InitramfsHook::new(dir.path().join("nope"), dir.path().join("bak"));
    assert!(matches!(
        missing.install(&amd64()).await.unwrap_err(),
        Error::Guard(GuardError::HookFunctionsMissing { .. })
    ));
}
