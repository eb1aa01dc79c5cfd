use crossgrader_types::Stage;
use serde::{Deserialize, Serialize};

/// Why a package was picked for stage one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    Priority,
    InitramfsHook,
    ToolDependency,
    LoginShell,
    AlwaysIncluded,
    Emulation,
    Requested,
    Remaining,
}

/// Per-reason counts of selected packages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub total: usize,
    pub by_reason: Vec<(SelectionReason, usize)>,
}

/// Stage controller lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    Started {
        stage: Stage,
        target: String,
        source: String,
        dry_run: bool,
    },

    TargetsSelected {
        stage: Stage,
        summary: SelectionSummary,
    },

    /// Packages without a target-architecture build
    Unavailable {
        stage: Stage,
        packages: Vec<String>,
        skipped: bool,
    },

    /// Plan shown instead of executed
    DryRun {
        stage: Stage,
        batches: Vec<Vec<String>>,
    },

    EmulationCrossgraded {
        stage: Stage,
        packages: Vec<String>,
    },

    InitramfsUpdated,

    InitramfsUpdateFailed {
        message: String,
    },

    /// Stage finished with an empty failed set, or the operator forced past it
    Completed {
        stage: Stage,
        forced: bool,
        converged: usize,
    },

    Failed {
        stage: Stage,
        failure: super::FailureContext,
        stuck: Vec<String>,
    },
}
