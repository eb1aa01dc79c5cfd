//! Stage journal
//!
//! Records how each stage ended for each target architecture. The journal
//! only gates stage transitions; work lists are always recomputed.

use chrono::{DateTime, Utc};
use crossgrader_errors::{Error, StageError, StateError};
use crossgrader_types::{Arch, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Failed set empty
    Done,
    /// Operator overrode unavailable packages, remnant hooks or failures
    Forced,
    Failed,
}

impl StageOutcome {
    /// Whether the next stage may start without force
    #[must_use]
    pub fn allows_next(self) -> bool {
        matches!(self, Self::Done | Self::Forced)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Forced => write!(f, "forced"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub outcome: StageOutcome,
    pub source: Arch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

impl StageRecord {
    #[must_use]
    pub fn new(outcome: StageOutcome, source: Arch) -> Self {
        Self {
            outcome,
            source,
            failed: Vec::new(),
            unavailable: Vec::new(),
            run_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_failed(mut self, failed: Vec<String>) -> Self {
        self.failed = failed;
        self
    }

    #[must_use]
    pub fn with_unavailable(mut self, unavailable: Vec<String>) -> Self {
        self.unavailable = unavailable;
        self
    }
}

/// Stage records for one target architecture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetJournal {
    pub stages: BTreeMap<Stage, StageRecord>,
}

impl TargetJournal {
    /// A crossgrade to this target was started and not finished by stage three
    #[must_use]
    pub fn in_progress(&self) -> bool {
        !self.stages.is_empty()
            && !self
                .stages
                .get(&Stage::Third)
                .is_some_and(|r| r.outcome == StageOutcome::Done)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageJournal {
    #[serde(default)]
    pub targets: BTreeMap<Arch, TargetJournal>,
}

impl StageJournal {
    #[must_use]
    pub fn record_for(&self, target: &Arch, stage: Stage) -> Option<&StageRecord> {
        self.targets.get(target)?.stages.get(&stage)
    }

    pub fn record(&mut self, target: &Arch, stage: Stage, record: StageRecord) {
        self.targets
            .entry(target.clone())
            .or_default()
            .stages
            .insert(stage, record);
    }

    /// Check whether `stage` may start for `target`
    ///
    /// - stage one may not start while a crossgrade to another target is unfinished
    /// - no stage may start after a later stage completed
    /// - stage two refuses a recorded failed stage one (a skipped one is fine)
    /// - stage three needs stage two done or forced
    ///
    /// `force` overrides every rule.
    ///
    /// # Errors
    ///
    /// Returns the rule that blocks the stage.
    pub fn check_can_start(&self, target: &Arch, stage: Stage, force: bool) -> Result<(), Error> {
        if force {
            return Ok(());
        }

        if stage == Stage::First {
            if let Some((other, _)) = self
                .targets
                .iter()
                .find(|(arch, journal)| *arch != target && journal.in_progress())
            {
                return Err(StateError::JournalMismatch {
                    recorded: other.to_string(),
                    requested: target.to_string(),
                }
                .into());
            }
        }

        let mut later = stage.next();
        while let Some(next) = later {
            if self
                .record_for(target, next)
                .is_some_and(|r| r.outcome.allows_next())
            {
                return Err(StageError::Regression {
                    from: next.to_string(),
                    to: stage.to_string(),
                }
                .into());
            }
            later = next.next();
        }

        match stage {
            Stage::First => Ok(()),
            Stage::Second => match self.record_for(target, Stage::First) {
                Some(r) if r.outcome == StageOutcome::Failed => Err(precondition(
                    stage,
                    format!("{} failed with {} stuck packages", Stage::First, r.failed.len()),
                )),
                _ => Ok(()),
            },
            Stage::Third => match self.record_for(target, Stage::Second) {
                Some(r) if r.outcome.allows_next() => Ok(()),
                Some(_) => Err(precondition(stage, format!("{} failed", Stage::Second))),
                None => Err(precondition(
                    stage,
                    format!("{} has not completed for {target}", Stage::Second),
                )),
            },
        }
    }
}

fn precondition(stage: Stage, reason: String) -> Error {
    StageError::PreconditionFailed {
        stage: stage.to_string(),
        reason,
    }
    .into()
}

/// Journal file in the storage directory
#[derive(Debug, Clone)]
pub struct JournalStore {
    path: PathBuf,
}

impl JournalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the journal; an absent file is an empty journal
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> Result<StageJournal, Error> {
        Ok(crate::read_json(&self.path).await?.unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns an error if the journal cannot be written.
    pub async fn save(&self, journal: &StageJournal) -> Result<(), Error> {
        crate::write_json(&self.path, journal).await
    }

    /// Load, record one stage outcome, and save
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or written.
    pub async fn update(
        &self,
        target: &Arch,
        stage: Stage,
        record: StageRecord,
    ) -> Result<StageJournal, Error> {
        let mut journal = self.load().await?;
        journal.record(target, stage, record);
        self.save(&journal).await?;
        tracing::debug!(path = %self.path.display(), %stage, %target, "journal updated");
        Ok(journal)
    }
}
