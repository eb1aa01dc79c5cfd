use serde::{Deserialize, Serialize};

/// Package state snapshot events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotEvent {
    Captured {
        packages: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },

    Compared {
        changes: usize,
        not_crossgraded: usize,
        missing: usize,
    },

    JournalUpdated {
        path: String,
        stage: crossgrader_types::Stage,
        outcome: String,
    },
}
