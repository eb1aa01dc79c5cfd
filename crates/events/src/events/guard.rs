use serde::{Deserialize, Serialize};

/// Where a verification was requested from; decides its severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyScope {
    /// Initramfs build hook, advisory only
    Scan,
    /// Boot-critical binaries checked before a stage is declared complete
    Preflight,
}

/// Guard events for binary verification and the initramfs hook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardEvent {
    VerificationStarted {
        scope: VerifyScope,
        expected: String,
        files: usize,
    },

    /// A binary does not match the expected architecture
    ArchitectureMismatch {
        scope: VerifyScope,
        path: String,
        expected: String,
        actual: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
    },

    /// A file could not be read; never fatal
    FileSkipped {
        path: String,
        reason: String,
    },

    VerificationCompleted {
        scope: VerifyScope,
        checked: usize,
        mismatches: usize,
        not_binaries: usize,
    },

    HookInstalled {
        path: String,
        backup: String,
    },

    HookRemoved {
        path: String,
    },
}
