use serde::{Deserialize, Serialize};

/// Download-ahead pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    Started {
        package: String,
        arch: String,
    },

    Completed {
        package: String,
        path: String,
    },

    Failed {
        package: String,
        failure: super::FailureContext,
    },

    /// Producer is blocked on a full queue
    QueueFull {
        capacity: usize,
    },
}
