//! Advisory scans and pre-flight checks over many files

use crossgrader_errors::{Error, StageError};
use crossgrader_events::{AppEvent, EventEmitter, GuardEvent, VerifyScope};
use crossgrader_types::{Arch, ArchRecord, ArchVerdict};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::verifier::ArchVerifier;

/// Header reads in flight at once
const SCAN_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub scope: VerifyScope,
    pub expected: Arch,
    pub records: Vec<ArchRecord>,
    /// Files that could not be read, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

impl VerificationReport {
    pub fn mismatches(&self) -> impl Iterator<Item = &ArchRecord> {
        self.records.iter().filter(|r| r.verdict.is_mismatch())
    }

    #[must_use]
    pub fn not_binaries(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.verdict == ArchVerdict::NotABinary)
            .count()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatches().next().is_none()
    }
}

/// Expand directories into the regular files below them
///
/// The walk runs on the blocking pool. If that task dies, every root is
/// reported as skipped.
async fn collect_files(roots: &[PathBuf]) -> (Vec<PathBuf>, Vec<(PathBuf, String)>) {
    let owned = roots.to_vec();
    match tokio::task::spawn_blocking(move || walk_roots(&owned)).await {
        Ok(collected) => collected,
        Err(e) => {
            let reason = format!("file walk failed: {e}");
            let skipped = roots.iter().map(|r| (r.clone(), reason.clone())).collect();
            (Vec::new(), skipped)
        }
    }
}

fn walk_roots(roots: &[PathBuf]) -> (Vec<PathBuf>, Vec<(PathBuf, String)>) {
    let mut files = Vec::new();
    let mut skipped = Vec::new();
    for root in roots {
        if root.is_dir() {
            for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        files.push(entry.into_path());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let path = e.path().map_or_else(|| root.clone(), Path::to_path_buf);
                        skipped.push((path, e.to_string()));
                    }
                }
            }
        } else if root.exists() {
            files.push(root.clone());
        } else {
            skipped.push((root.clone(), "no such file".to_string()));
        }
    }
    (files, skipped)
}

impl ArchVerifier {
    async fn run(&self, scope: VerifyScope, roots: &[PathBuf], expected: &Arch) -> VerificationReport {
        let (files, mut skipped) = collect_files(roots).await;
        self.emit(AppEvent::Guard(GuardEvent::VerificationStarted {
            scope,
            expected: expected.to_string(),
            files: files.len(),
        }));

        let results: Vec<(PathBuf, Result<ArchRecord, Error>)> = stream::iter(files)
            .map(|path| async move {
                let result = self.inspect(&path, expected).await;
                (path, result)
            })
            .buffered(SCAN_CONCURRENCY)
            .collect()
            .await;

        let mut records = Vec::with_capacity(results.len());
        for (path, result) in results {
            match result {
                Ok(record) => {
                    if let ArchVerdict::Mismatch(actual) = &record.verdict {
                        tracing::warn!(
                            path = %path.display(),
                            %expected,
                            %actual,
                            "binary architecture mismatch"
                        );
                        self.emit(AppEvent::Guard(GuardEvent::ArchitectureMismatch {
                            scope,
                            path: path.display().to_string(),
                            expected: expected.to_string(),
                            actual: actual.clone(),
                            owner: self.owner_of(&path).await,
                        }));
                    }
                    records.push(record);
                }
                Err(e) => skipped.push((path, e.to_string())),
            }
        }

        for (path, reason) in &skipped {
            self.emit(AppEvent::Guard(GuardEvent::FileSkipped {
                path: path.display().to_string(),
                reason: reason.clone(),
            }));
        }

        let report = VerificationReport {
            scope,
            expected: expected.clone(),
            records,
            skipped,
        };
        self.emit(AppEvent::Guard(GuardEvent::VerificationCompleted {
            scope,
            checked: report.records.len(),
            mismatches: report.mismatches().count(),
            not_binaries: report.not_binaries(),
        }));
        report
    }

    /// Advisory scan; mismatches are reported as warnings and never fail
    pub async fn scan(&self, roots: &[PathBuf], expected: &Arch) -> VerificationReport {
        self.run(VerifyScope::Scan, roots, expected).await
    }

    /// Check boot-critical binaries before a stage is declared complete
    ///
    /// Missing files are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StageError::PreflightMismatch` listing every mismatching binary.
    pub async fn preflight(
        &self,
        binaries: &[PathBuf],
        expected: &Arch,
    ) -> Result<VerificationReport, Error> {
        let report = self.run(VerifyScope::Preflight, binaries, expected).await;
        if report.is_clean() {
            return Ok(report);
        }
        Err(StageError::PreflightMismatch {
            expected: expected.to_string(),
            paths: report
                .mismatches()
                .map(|r| r.path.display().to_string())
                .collect(),
        }
        .into())
    }
}
