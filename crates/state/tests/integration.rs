//! Snapshot and journal persistence against a scratch storage directory

use crossgrader_dpkg::testing::{FakePackage, FakePackageManager};
use crossgrader_dpkg::PackageManager;
use crossgrader_errors::{Error, StageError, StateError};
use crossgrader_state::{JournalStore, PackageSnapshot, StageOutcome, StageRecord};
use crossgrader_types::{Arch, ChangeType, PackageRef, Stage};
use tempfile::TempDir;

fn system() -> FakePackageManager {
    let pm = FakePackageManager::new("arm64");
    pm.install(FakePackage::new("bash", "arm64", "5.2"))
        .install(FakePackage::new("coreutils", "arm64", "9.1"))
        .install(FakePackage::new("tzdata", "all", "2024a"));
    pm
}

#[tokio::test]
async fn test_snapshot_round_trip_has_no_changes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("snapshot.json");
    let pm = system();

    let snapshot = PackageSnapshot::capture(&pm).await.unwrap();
    assert_eq!(snapshot.native, Arch::new("arm64"));
    assert_eq!(snapshot.packages.len(), 3);
    snapshot.save(&path).await.unwrap();

    let loaded = PackageSnapshot::load(&path).await.unwrap();
    assert_eq!(loaded, snapshot);
    assert!(loaded.diff(&snapshot).is_empty());
}

#[tokio::test]
async fn test_missing_and_corrupt_snapshots() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.json");

    let err = PackageSnapshot::load(&path).await.unwrap_err();
    assert!(matches!(
        err,
        Error::State(StateError::SnapshotNotFound { .. })
    ));

    tokio::fs::write(&path, b"{ not json").await.unwrap();
    let err = PackageSnapshot::load(&path).await.unwrap_err();
    assert!(matches!(err, Error::State(StateError::Corrupt { .. })));
}

#[tokio::test]
async fn test_audit_after_partial_crossgrade() {
    let pm = system();
    let baseline = PackageSnapshot::capture(&pm).await.unwrap();

    assert!(pm
        .force_remove(&PackageRef::new("bash", Arch::new("arm64")))
        .await
        .unwrap());
    pm.install(FakePackage::new("bash", "amd64", "5.2"));
    let current = PackageSnapshot::capture(&pm).await.unwrap();

    let diff = baseline.diff(&current);
    assert_eq!(diff.of_type(ChangeType::Crossgrade).count(), 1);

    let audit = baseline.audit(&current, &Arch::new("amd64"));
    assert_eq!(audit.not_crossgraded.len(), 1);
    assert_eq!(audit.not_crossgraded[0].name, "coreutils");
    assert!(audit.missing.is_empty());
}

#[tokio::test]
async fn test_journal_persists_and_gates() {
    let dir = TempDir::new().unwrap();
    let store = JournalStore::new(dir.path().join("journal.json"));
    let amd64 = Arch::new("amd64");

    let empty = store.load().await.unwrap();
    assert!(empty.targets.is_empty());
    assert!(empty.check_can_start(&amd64, Stage::Third, false).is_err());

    store
        .update(
            &amd64,
            Stage::First,
            StageRecord::new(StageOutcome::Done, Arch::new("arm64")),
        )
        .await
        .unwrap();
    store
        .update(
            &amd64,
            Stage::Second,
            StageRecord::new(StageOutcome::Forced, Arch::new("arm64"))
                .with_unavailable(vec!["libwidevine".to_string()]),
        )
        .await
        .unwrap();

    let journal = JournalStore::new(store.path()).load().await.unwrap();
    let second = journal.record_for(&amd64, Stage::Second).unwrap();
    assert_eq!(second.outcome, StageOutcome::Forced);
    assert_eq!(second.unavailable, vec!["libwidevine"]);

    assert!(journal.check_can_start(&amd64, Stage::Third, false).is_ok());
    assert!(matches!(
        journal.check_can_start(&amd64, Stage::First, false),
        Err(Error::Stage(StageError::Regression { .. }))
    ));
}
