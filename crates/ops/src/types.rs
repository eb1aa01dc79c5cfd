//! Report types returned by operations

use chrono::{DateTime, Utc};
use crossgrader_errors::{Error, StageError, TransactionError};
use crossgrader_install::{BatchOutcome, BatchReport};
use crossgrader_state::StageOutcome;
use crossgrader_types::{Arch, Stage};
use serde::Serialize;
use std::path::PathBuf;

use crate::selection::Selection;

/// What a stage will do, computed before anything is installed
#[derive(Clone, Debug, Default, Serialize)]
pub struct StagePlan {
    /// Selected packages with the reason for each
    pub selection: Selection,
    /// Emulation packages crossgraded ahead of everything else, in order
    pub emulation: Vec<String>,
    /// Cached emulation debs installed first in stage two
    pub emulation_cache: Vec<PathBuf>,
    /// Selected packages without a target-architecture build
    pub unavailable: Vec<String>,
    /// Ordered batches handed to the executor
    pub batches: Vec<Vec<String>>,
    /// Packages leading the order (the package manager's own closure)
    pub leading: usize,
    pub cycles_broken: usize,
    /// Stage three: packages to purge from the source architecture
    pub removals: Vec<String>,
}

impl StagePlan {
    #[must_use]
    pub fn package_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum::<usize>() + self.emulation.len() + self.removals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.package_count() == 0 && self.emulation_cache.is_empty()
    }
}

/// Condensed result of one executor batch
#[derive(Clone, Debug, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub already_converged: usize,
    pub succeeded: Vec<String>,
    pub retried: Vec<String>,
    /// `name:arch` with the failure signature
    pub failed: Vec<(String, String)>,
    pub passes: u32,
    pub converged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<String>,
}

impl From<&BatchReport> for BatchSummary {
    fn from(report: &BatchReport) -> Self {
        Self {
            batch_id: report.batch_id.clone(),
            already_converged: report.already_converged,
            succeeded: report.succeeded().map(ToString::to_string).collect(),
            retried: report.retried().map(ToString::to_string).collect(),
            failed: report
                .failed()
                .map(|(pkg, kind)| (pkg.to_string(), kind.to_string()))
                .collect(),
            passes: report.passes,
            converged: report.is_converged(),
            stopped: match report.outcome {
                BatchOutcome::Converged => None,
                BatchOutcome::NoProgress { pass } => Some(format!("no progress in pass {pass}")),
                BatchOutcome::Stalled { passes } => Some(format!("stalled after {passes} passes")),
            },
        }
    }
}

/// Result of running one stage
#[derive(Clone, Debug, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub target: Arch,
    pub source: Arch,
    pub dry_run: bool,
    pub download_only: bool,
    pub plan: StagePlan,
    pub batches: Vec<BatchSummary>,
    /// Packages whose target instance was configured before the run
    pub converged: usize,
    /// Packages crossgraded by this run
    pub crossgraded: Vec<String>,
    /// Failed set left at the end of the stage
    pub stuck: Vec<String>,
    /// Debs fetched without installing
    pub downloaded: usize,
    /// Stage three: purged from the source architecture
    pub removed: Vec<String>,
    pub preflight_mismatches: Vec<String>,
    /// Journaled outcome; `None` for dry runs and download-only runs
    pub outcome: Option<StageOutcome>,
    #[serde(skip)]
    pub last_error: Option<TransactionError>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StageReport {
    #[must_use]
    pub fn new(stage: Stage, target: Arch, source: Arch) -> Self {
        Self {
            stage,
            target,
            source,
            dry_run: false,
            download_only: false,
            plan: StagePlan::default(),
            batches: Vec::new(),
            converged: 0,
            crossgraded: Vec::new(),
            stuck: Vec::new(),
            downloaded: 0,
            removed: Vec::new(),
            preflight_mismatches: Vec::new(),
            outcome: None,
            last_error: None,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Some(StageOutcome::Failed))
    }

    /// Error describing why the stage failed, if it did
    ///
    /// A mismatching boot binary wins over the generic stuck-set failure, and
    /// a single batch's transaction error is reported as such. A download-only
    /// run has no outcome but fails when archives are missing.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        if self.download_only && !self.stuck.is_empty() {
            return Some(
                StageError::DownloadIncomplete {
                    packages: self.stuck.clone(),
                }
                .into(),
            );
        }
        if self.outcome != Some(StageOutcome::Failed) {
            return None;
        }
        if !self.preflight_mismatches.is_empty() {
            return Some(
                StageError::PreflightMismatch {
                    expected: self.target.to_string(),
                    paths: self.preflight_mismatches.clone(),
                }
                .into(),
            );
        }
        if let Some(e) = &self.last_error {
            return Some(e.clone().into());
        }
        Some(
            StageError::Failed {
                stage: self.stage.to_string(),
                stuck: self.stuck.clone(),
            }
            .into(),
        )
    }
}

/// Result of `--cleanup`
#[derive(Clone, Debug, Default, Serialize)]
pub struct CleanupReport {
    pub hook_removed: bool,
    pub storage_removed: bool,
}

/// Result of `--install-from`
#[derive(Clone, Debug, Serialize)]
pub struct InstallFromReport {
    pub dir: PathBuf,
    pub debs: usize,
    pub batch: Option<BatchSummary>,
    pub stuck: Vec<String>,
}

/// Operation result that can be serialized for CLI output
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OperationResult {
    Stage(Box<StageReport>),
    InstallFrom(InstallFromReport),
    Cleanup(CleanupReport),
    /// Generic success message
    Success(String),
}

impl OperationResult {
    /// Convert to JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("failed to serialize result: {e}")))
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Stage(report) => report.is_success(),
            Self::InstallFrom(report) => report.stuck.is_empty(),
            Self::Cleanup(_) | Self::Success(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrader_install::PackageResult;
    use crossgrader_types::PackageRef;

    fn report(outcome: Option<StageOutcome>) -> StageReport {
        let mut report = StageReport::new(Stage::Second, Arch::new("amd64"), Arch::new("arm64"));
        report.outcome = outcome;
        report
    }

    #[test]
    fn test_error_only_for_failed_outcome() {
        assert!(report(Some(StageOutcome::Done)).error().is_none());
        assert!(report(Some(StageOutcome::Forced)).error().is_none());
        assert!(report(None).error().is_none());

        let mut failed = report(Some(StageOutcome::Failed));
        failed.stuck = vec!["libfoo".to_string()];
        assert!(matches!(
            failed.error(),
            Some(Error::Stage(StageError::Failed { ref stuck, .. })) if stuck == &["libfoo"]
        ));

        failed.preflight_mismatches = vec!["/bin/sh".to_string()];
        assert!(matches!(
            failed.error(),
            Some(Error::Stage(StageError::PreflightMismatch { .. }))
        ));
    }

    #[test]
    fn test_download_only_fails_on_unfetched_packages() {
        let mut fetched = report(None);
        fetched.download_only = true;
        fetched.downloaded = 3;
        assert!(fetched.error().is_none());

        fetched.stuck = vec!["hello".to_string()];
        let err = fetched.error().unwrap();
        assert!(matches!(
            err,
            Error::Stage(StageError::DownloadIncomplete { ref packages }) if packages == &["hello"]
        ));
        assert_eq!(
            crossgrader_errors::UserFacingError::user_code(&err),
            Some("stage.download_incomplete")
        );
    }

    #[test]
    fn test_batch_summary() {
        let mut batch = BatchReport::new("stage-two-0");
        batch
            .results
            .insert(PackageRef::new("a", Arch::new("amd64")), PackageResult::Succeeded);
        batch.outcome = BatchOutcome::Stalled { passes: 10 };
        let summary = BatchSummary::from(&batch);
        assert_eq!(summary.succeeded, vec!["a:amd64"]);
        assert!(!summary.converged);
        assert_eq!(summary.stopped.as_deref(), Some("stalled after 10 passes"));
    }

    #[test]
    fn test_result_json_is_tagged() {
        let json = OperationResult::Cleanup(CleanupReport {
            hook_removed: true,
            storage_removed: false,
        })
        .to_json()
        .unwrap();
        assert!(json.contains("\"type\": \"Cleanup\""));
        assert!(json.contains("\"hook_removed\": true"));
    }
}
