//! Stage scenarios against the in-memory package manager

use async_trait::async_trait;
use crossgrader_config::Config;
use crossgrader_dpkg::testing::{FakePackage, FakePackageManager};
use crossgrader_dpkg::PackageManager;
use crossgrader_errors::{Error, StageError};
use crossgrader_events::{AppEvent, EventReceiver, SelectionReason, StageEvent};
use crossgrader_guard::HOOK_BEGIN;
use crossgrader_ops::{
    cleanup, install_from, run_stage, OpsContextBuilder, OpsCtx, SessionOptions, StageReport,
};
use crossgrader_platform::implementations::linux::binary::LinuxBinaryOperations;
use crossgrader_platform::{CommandOutput, Platform, PlatformCommand, PlatformContext, ProcessOperations};
use crossgrader_state::StageOutcome;
use crossgrader_types::{Arch, MultiArch, PackageRef, Priority, Stage};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Succeeds at everything and remembers what it was asked to run
#[derive(Default)]
struct RecordingProcess {
    commands: Mutex<Vec<String>>,
}

impl RecordingProcess {
    fn ran(&self, command_line: &str) -> bool {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == command_line)
    }
}

#[async_trait]
impl ProcessOperations for RecordingProcess {
    async fn execute_command(
        &self,
        _ctx: &PlatformContext,
        cmd: PlatformCommand,
    ) -> Result<CommandOutput, Error> {
        self.commands.lock().unwrap().push(cmd.command_line());
        Ok(CommandOutput {
            status: ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    async fn which(&self, program: &str) -> Result<PathBuf, Error> {
        Ok(PathBuf::from("/usr/bin").join(program))
    }
}

const HOOK_FUNCTIONS: &str = "\
copy_exec() {
\tlocal src=\"${1}\" target=\"${2:-$1}\"
\tcopy_file binary \"${src}\" \"${target}\"
}
";

struct Harness {
    dir: TempDir,
    pm: Arc<FakePackageManager>,
    process: Arc<RecordingProcess>,
    ctx: OpsCtx,
    _rx: Option<EventReceiver>,
}

impl Harness {
    fn new(pm: FakePackageManager) -> Self {
        let (mut harness, rx) = Self::with_events(pm);
        harness._rx = Some(rx);
        harness
    }

    /// Install one package per transaction batch
    fn one_per_batch(pm: FakePackageManager) -> Self {
        let (mut harness, rx) = Self::build(pm, |config| config.transaction.batch_size = 1);
        harness._rx = Some(rx);
        harness
    }

    fn with_events(pm: FakePackageManager) -> (Self, EventReceiver) {
        Self::build(pm, |_| {})
    }

    fn build(
        pm: FakePackageManager,
        tune: impl FnOnce(&mut Config),
    ) -> (Self, EventReceiver) {
        let dir = TempDir::new().unwrap();
        let hook_functions = dir.path().join("hook-functions");
        std::fs::write(&hook_functions, HOOK_FUNCTIONS).unwrap();

        let mut config = Config::default();
        config.paths.storage_dir = Some(dir.path().join("storage"));
        config.paths.archives_dir = Some(dir.path().join("archives"));
        config.paths.initramfs_hooks_dir = Some(dir.path().join("hooks"));
        config.paths.hook_functions = Some(hook_functions);
        config.verify.preflight = false;
        tune(&mut config);

        let pm = Arc::new(pm);
        let process = Arc::new(RecordingProcess::default());
        let platform = Platform::new(Arc::new(LinuxBinaryOperations::new()), process.clone());
        let (tx, rx) = crossgrader_events::channel();
        let ctx = OpsContextBuilder::new()
            .with_package_manager(pm.clone())
            .with_event_sender(tx)
            .with_config(config)
            .with_platform(platform)
            .build()
            .unwrap();
        (
            Self {
                dir,
                pm,
                process,
                ctx,
                _rx: None,
            },
            rx,
        )
    }

    async fn stage(&self, stage: Stage, options: SessionOptions) -> Result<StageReport, Error> {
        let from = (stage == Stage::Third).then(arm64);
        run_stage(&self.ctx, amd64(), stage, from, options).await
    }

    fn hooks_dir(&self) -> PathBuf {
        self.dir.path().join("hooks")
    }
}

fn amd64() -> Arch {
    Arch::new("amd64")
}

fn arm64() -> Arch {
    Arch::new("arm64")
}

fn target(name: &str) -> PackageRef {
    PackageRef::new(name, amd64())
}

/// arm64 system with an amd64 repository
fn system() -> FakePackageManager {
    let pm = FakePackageManager::new("arm64");
    for (name, priority) in [
        ("base-files", Priority::Required),
        ("dpkg", Priority::Required),
        ("hello", Priority::Optional),
    ] {
        pm.install(FakePackage::new(name, "arm64", "1.0").priority(priority))
            .publish(FakePackage::new(name, "amd64", "1.0").priority(priority));
    }
    pm.install(FakePackage::new("libfoo1", "arm64", "2.1").multi_arch(MultiArch::Same))
        .publish(FakePackage::new("libfoo1", "amd64", "2.1").multi_arch(MultiArch::Same));
    pm
}

#[tokio::test]
async fn test_three_stages_move_the_system() {
    let h = Harness::new(system());

    let one = h.stage(Stage::First, SessionOptions::default()).await.unwrap();
    assert_eq!(one.outcome, Some(StageOutcome::Done));
    assert_eq!(h.pm.installed_in("amd64"), vec!["base-files", "dpkg"]);
    assert_eq!(h.pm.installed_in("arm64"), vec!["hello", "libfoo1"]);
    assert_eq!(
        one.plan.selection.reason("dpkg"),
        Some(SelectionReason::Priority)
    );
    assert!(h.process.ran("update-initramfs -u -k all"));
    let patched = std::fs::read_to_string(h.ctx.config.hook_functions()).unwrap();
    assert!(patched.contains(HOOK_BEGIN));

    let two = h.stage(Stage::Second, SessionOptions::default()).await.unwrap();
    assert_eq!(two.outcome, Some(StageOutcome::Done));
    assert_eq!(two.crossgraded, vec!["hello", "libfoo1"]);
    assert_eq!(
        h.pm.installed_in("amd64"),
        vec!["base-files", "dpkg", "hello", "libfoo1"]
    );
    // Multi-Arch: same keeps the old instance until stage three
    assert_eq!(h.pm.installed_in("arm64"), vec!["libfoo1"]);

    let three = h.stage(Stage::Third, SessionOptions::default()).await.unwrap();
    assert_eq!(three.outcome, Some(StageOutcome::Done));
    assert_eq!(three.removed, vec!["libfoo1"]);
    assert!(h.pm.installed_in("arm64").is_empty());
    assert_eq!(
        std::fs::read_to_string(h.ctx.config.hook_functions()).unwrap(),
        HOOK_FUNCTIONS
    );

    let journal = h.ctx.journal().load().await.unwrap();
    for stage in [Stage::First, Stage::Second, Stage::Third] {
        let record = journal.record_for(&amd64(), stage).unwrap();
        assert_eq!(record.outcome, StageOutcome::Done);
        assert_eq!(record.source, arm64());
    }
}

#[tokio::test]
async fn test_rerunning_a_converged_stage_changes_nothing() {
    let h = Harness::new(system());
    h.stage(Stage::First, SessionOptions::default()).await.unwrap();

    let before = h.pm.mutations();
    let again = h.stage(Stage::First, SessionOptions::default()).await.unwrap();
    assert_eq!(h.pm.mutations(), before);
    assert_eq!(again.outcome, Some(StageOutcome::Done));
    assert!(again.plan.selection.is_empty());
    assert!(again.batches.is_empty());
}

#[tokio::test]
async fn test_dry_run_plans_without_mutating() {
    let pm = system();
    pm.add_architecture(&amd64()).await.unwrap();
    let (h, mut rx) = Harness::with_events(pm);
    let before = h.pm.mutations();

    let options = SessionOptions {
        dry_run: true,
        ..SessionOptions::default()
    };
    let report = h.stage(Stage::First, options).await.unwrap();

    assert_eq!(h.pm.mutations(), before);
    assert!(h.pm.installed_in("amd64").is_empty());
    assert_eq!(report.outcome, None);
    assert_eq!(report.plan.batches.concat().len(), 2);
    assert!(!h.ctx.journal().path().exists());

    let mut planned = None;
    while let Ok(msg) = rx.try_recv() {
        if let AppEvent::Stage(StageEvent::DryRun { batches, .. }) = msg.event {
            planned = Some(batches);
        }
    }
    assert_eq!(planned.unwrap().concat(), report.plan.batches.concat());
}

#[tokio::test]
async fn test_unavailable_packages_block_unless_forced() {
    let pm = system();
    pm.install(FakePackage::new("legacy-tool", "arm64", "0.9"));
    let h = Harness::new(pm);
    h.stage(Stage::First, SessionOptions::default()).await.unwrap();

    let err = h
        .stage(Stage::Second, SessionOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::Stage(StageError::Unavailable { packages }) => {
            assert_eq!(packages, vec!["legacy-tool"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.pm.installed_in("amd64"), vec!["base-files", "dpkg"]);

    let forced = SessionOptions {
        force_unavailable: true,
        ..SessionOptions::default()
    };
    let report = h.stage(Stage::Second, forced).await.unwrap();
    assert_eq!(report.outcome, Some(StageOutcome::Forced));
    assert_eq!(report.plan.unavailable, vec!["legacy-tool"]);
    assert!(h.pm.instance("legacy-tool", "arm64").is_some());
    assert!(h.pm.instance("hello", "amd64").is_some());

    let record = h
        .ctx
        .journal()
        .load()
        .await
        .unwrap()
        .record_for(&amd64(), Stage::Second)
        .cloned()
        .unwrap();
    assert_eq!(record.unavailable, vec!["legacy-tool"]);
}

#[tokio::test]
async fn test_remnant_initramfs_hooks() {
    let pm = system();
    pm.install(FakePackage::new("busybox", "arm64", "1.36"))
        .publish(FakePackage::new("busybox", "amd64", "1.36"));
    let h = Harness::new(pm);

    std::fs::create_dir_all(h.hooks_dir()).unwrap();
    let owned = h.hooks_dir().join("busybox");
    let orphan = h.hooks_dir().join("leftover");
    std::fs::write(&owned, "#!/bin/sh\n").unwrap();
    std::fs::write(&orphan, "#!/bin/sh\n").unwrap();
    h.pm.own_file("busybox:arm64", &owned);

    let err = h
        .stage(Stage::First, SessionOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::Stage(StageError::RemnantInitramfsHooks { hooks }) => {
            assert_eq!(hooks, vec![orphan.display().to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let options = SessionOptions {
        dry_run: true,
        force_initramfs: true,
        ..SessionOptions::default()
    };
    let report = h.stage(Stage::First, options).await.unwrap();
    assert_eq!(
        report.plan.selection.reason("busybox"),
        Some(SelectionReason::InitramfsHook)
    );
    assert!(!report.plan.selection.contains("hello"));
}

#[tokio::test]
async fn test_stuck_package_fails_the_stage_and_blocks_removal() {
    let pm = system();
    pm.fail_install_always("hello");
    let h = Harness::new(pm);
    h.stage(Stage::First, SessionOptions::default()).await.unwrap();

    let report = h.stage(Stage::Second, SessionOptions::default()).await.unwrap();
    assert_eq!(report.outcome, Some(StageOutcome::Failed));
    assert_eq!(report.stuck, vec!["hello"]);
    assert!(matches!(report.error(), Some(Error::Transaction(_))));
    // The healthy package in the same batch still converged
    assert!(h.pm.instance("libfoo1", "amd64").is_some());

    let err = h
        .stage(Stage::Third, SessionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Stage(StageError::PreconditionFailed { .. })
    ));
    assert!(h.pm.instance("hello", "arm64").is_some());
}

#[tokio::test]
async fn test_third_stage_needs_second() {
    let h = Harness::new(system());
    let err = h
        .stage(Stage::Third, SessionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Stage(StageError::PreconditionFailed { .. })
    ));
    assert_eq!(h.pm.mutations(), 0);
}

#[tokio::test]
async fn test_emulation_layer_goes_first_and_is_cached() {
    let pm = system();
    for name in ["qemu-user-static", "binfmt-support"] {
        pm.install(FakePackage::new(name, "arm64", "1:8.2"))
            .publish(FakePackage::new(name, "amd64", "1:8.2"));
    }
    let h = Harness::new(pm);

    let one = h.stage(Stage::First, SessionOptions::default()).await.unwrap();
    assert_eq!(one.plan.emulation, vec!["qemu-user-static", "binfmt-support"]);
    let log = h.pm.install_log();
    assert_eq!(log[0][0].to_string(), "qemu-user-static:amd64");
    assert_eq!(log[1][0].to_string(), "binfmt-support:amd64");

    let cache = h.ctx.config.emulation_cache_dir();
    assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 2);

    let two = h.stage(Stage::Second, SessionOptions::default()).await.unwrap();
    assert_eq!(two.plan.emulation_cache.len(), 2);
    assert!(!two.plan.selection.contains("qemu-user-static"));
    assert_eq!(two.outcome, Some(StageOutcome::Done));
    assert!(!cache.exists());
}

#[tokio::test]
async fn test_second_stage_without_cache_installs_emulation_first() {
    let pm = system();
    for name in ["qemu-user-static", "binfmt-support"] {
        pm.install(FakePackage::new(name, "arm64", "1:8.2"))
            .publish(FakePackage::new(name, "amd64", "1:8.2"));
    }
    let h = Harness::one_per_batch(pm);

    let two = h.stage(Stage::Second, SessionOptions::default()).await.unwrap();
    assert!(two.plan.emulation_cache.is_empty());
    assert_eq!(two.plan.emulation, vec!["qemu-user-static", "binfmt-support"]);
    assert_eq!(two.outcome, Some(StageOutcome::Done));

    let log = h.pm.install_log();
    assert_eq!(log[0], vec![target("qemu-user-static")]);
    assert_eq!(log[1], vec![target("binfmt-support")]);
    assert!(log[2..]
        .iter()
        .flatten()
        .all(|p| p.name != "qemu-user-static" && p.name != "binfmt-support"));
    assert!(!h.ctx.config.emulation_cache_dir().exists());
}

#[tokio::test]
async fn test_batches_install_dependencies_first() {
    let pm = system();
    pm.install(FakePackage::new("zzz-lib", "arm64", "1.0"))
        .publish(FakePackage::new("zzz-lib", "amd64", "1.0"));
    pm.install(FakePackage::new("aaa-app", "arm64", "1.0").depends(["zzz-lib"]))
        .publish(FakePackage::new("aaa-app", "amd64", "1.0").depends(["zzz-lib"]));
    pm.require_first("aaa-app", "zzz-lib");
    let h = Harness::one_per_batch(pm);
    h.stage(Stage::First, SessionOptions::default()).await.unwrap();
    let before = h.pm.install_log().len();

    let two = h.stage(Stage::Second, SessionOptions::default()).await.unwrap();
    assert_eq!(two.outcome, Some(StageOutcome::Done));
    assert!(two.batches.len() >= 4);

    let order: Vec<String> = h.pm.install_log()[before..]
        .iter()
        .flatten()
        .map(|p| p.name.clone())
        .collect();
    let lib = order.iter().position(|n| n == "zzz-lib").unwrap();
    let app = order.iter().position(|n| n == "aaa-app").unwrap();
    assert!(lib < app, "install order was {order:?}");
    assert_eq!(order.len(), 4);
}

#[tokio::test]
async fn test_package_stuck_on_a_later_batch_converges_in_a_sweep() {
    let pm = system();
    pm.require_first("hello", "libfoo1");
    let h = Harness::one_per_batch(pm);
    h.stage(Stage::First, SessionOptions::default()).await.unwrap();

    let two = h.stage(Stage::Second, SessionOptions::default()).await.unwrap();
    let plan: Vec<Vec<String>> = two.plan.batches.clone();
    assert_eq!(plan, vec![vec!["hello"], vec!["libfoo1"]]);
    assert_eq!(two.outcome, Some(StageOutcome::Done));
    assert!(two.stuck.is_empty());
    assert!(two.error().is_none());
    assert!(two.crossgraded.contains(&"hello".to_string()));
    assert!(h.pm.instance("hello", "amd64").is_some());

    // hello, libfoo1, then hello again once its dependency is in place
    let log = h.pm.install_log();
    let tail: Vec<String> = log[log.len() - 3..]
        .iter()
        .flatten()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(tail, vec!["hello", "libfoo1", "hello"]);
}

#[tokio::test]
async fn test_sweep_stops_when_nothing_recovers() {
    let pm = system();
    pm.fail_install_always("hello");
    let h = Harness::one_per_batch(pm);
    h.stage(Stage::First, SessionOptions::default()).await.unwrap();

    let two = h.stage(Stage::Second, SessionOptions::default()).await.unwrap();
    assert_eq!(two.outcome, Some(StageOutcome::Failed));
    assert_eq!(two.stuck, vec!["hello"]);
    // Two planned batches and a single fruitless sweep
    assert_eq!(two.batches.len(), 3);
    assert!(h.pm.instance("libfoo1", "amd64").is_some());
}

#[tokio::test]
async fn test_download_only_then_install_from() {
    let h = Harness::new(system());
    h.stage(Stage::First, SessionOptions::default()).await.unwrap();

    let before = h.pm.mutations();
    let options = SessionOptions {
        download_only: true,
        ..SessionOptions::default()
    };
    let fetched = h.stage(Stage::Second, options).await.unwrap();
    assert_eq!(fetched.downloaded, 2);
    assert_eq!(fetched.outcome, None);
    assert_eq!(h.pm.mutations(), before);

    let report = install_from(&h.ctx, None).await.unwrap();
    assert!(report.stuck.is_empty());
    assert!(h.pm.instance("hello", "amd64").is_some());
    assert!(h.pm.instance("libfoo1", "amd64").is_some());
}

#[tokio::test]
async fn test_download_only_reports_unfetched_packages() {
    let pm = system();
    pm.fail_download("hello");
    let h = Harness::new(pm);
    h.stage(Stage::First, SessionOptions::default()).await.unwrap();

    let options = SessionOptions {
        download_only: true,
        ..SessionOptions::default()
    };
    let fetched = h.stage(Stage::Second, options).await.unwrap();
    assert_eq!(fetched.outcome, None);
    assert_eq!(fetched.downloaded, 1);
    assert_eq!(fetched.stuck, vec!["hello"]);
    assert!(matches!(
        fetched.error(),
        Some(Error::Stage(StageError::DownloadIncomplete { ref packages })) if packages == &["hello"]
    ));
}

#[tokio::test]
async fn test_requested_packages_only() {
    let h = Harness::new(system());
    let options = SessionOptions {
        packages: vec!["hello".to_string()],
        ..SessionOptions::default()
    };
    let report = h.stage(Stage::First, options).await.unwrap();
    assert_eq!(report.crossgraded, vec!["hello"]);
    assert_eq!(h.pm.installed_in("amd64"), vec!["hello"]);
}

#[tokio::test]
async fn test_cleanup_restores_hook_then_drops_storage() {
    let h = Harness::new(system());
    h.ctx.hook().install(&amd64()).await.unwrap();
    assert!(h.ctx.config.storage_dir().exists());

    let report = cleanup(&h.ctx).await.unwrap();
    assert!(report.hook_removed);
    assert!(report.storage_removed);
    assert!(!h.ctx.config.storage_dir().exists());
    assert_eq!(
        std::fs::read_to_string(h.ctx.config.hook_functions()).unwrap(),
        HOOK_FUNCTIONS
    );

    let again = cleanup(&h.ctx).await.unwrap();
    assert!(!again.hook_removed && !again.storage_removed);
}
