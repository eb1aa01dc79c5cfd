use serde::{Deserialize, Serialize};

/// Transaction executor events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionEvent {
    BatchStarted {
        batch_id: String,
        packages: Vec<String>,
        already_converged: usize,
    },

    PassStarted {
        batch_id: String,
        pass: u32,
        pending: usize,
    },

    /// A package-manager invocation reported a failure for one package
    PackageFailed {
        package: String,
        signature: String,
        message: String,
    },

    RemediationApplied {
        package: String,
        remediation: String,
        success: bool,
    },

    ConfigurePending {
        pass: u32,
        success: bool,
    },

    PassCompleted {
        batch_id: String,
        pass: u32,
        progressed: usize,
        pending: usize,
    },

    BatchCompleted {
        batch_id: String,
        succeeded: usize,
        retried: usize,
        failed: Vec<String>,
        passes: u32,
    },

    /// The pass ceiling was hit with work left
    Stalled {
        batch_id: String,
        passes: u32,
        pending: Vec<String>,
    },

    RemovalStarted {
        arch: String,
        packages: Vec<String>,
    },

    RemovalCompleted {
        arch: String,
        removed: usize,
        remaining: Vec<String>,
    },
}
