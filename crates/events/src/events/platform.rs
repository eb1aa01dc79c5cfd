//! Platform-specific operation events

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Category of platform operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformOperationKind {
    Process,
    Binary,
    Filesystem,
}

/// Command line of a spawned process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCommandDescriptor {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl ProcessCommandDescriptor {
    /// Single-line rendering for logs
    #[must_use]
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformOperationContext {
    pub kind: PlatformOperationKind,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<ProcessCommandDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformOperationMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_bytes: Option<u64>,
}

/// Platform operation events for tracking process and file operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    OperationStarted {
        context: PlatformOperationContext,
    },

    OperationCompleted {
        context: PlatformOperationContext,
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<PlatformOperationMetrics>,
    },

    OperationFailed {
        context: PlatformOperationContext,
        failure: super::FailureContext,
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<PlatformOperationMetrics>,
    },
}
