use serde::{Deserialize, Serialize};

use crate::EventSource;
use crossgrader_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

pub mod download;
pub mod general;
pub mod guard;
pub mod platform;
pub mod resolver;
pub mod snapshot;
pub mod stage;
pub mod transaction;

pub use download::*;
pub use general::*;
pub use guard::*;
pub use platform::*;
pub use resolver::*;
pub use snapshot::*;
pub use stage::*;
pub use transaction::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Warnings, errors, operation notifications
    General(GeneralEvent),

    /// Stage controller lifecycle
    Stage(StageEvent),

    /// Install/configure passes and remediation
    Transaction(TransactionEvent),

    /// Dependency ordering
    Resolver(ResolverEvent),

    /// Download-ahead pipeline
    Download(DownloadEvent),

    /// Binary verification and initramfs hook
    Guard(GuardEvent),

    /// Snapshot capture/diff and the stage journal
    Snapshot(SnapshotEvent),

    /// Process execution
    Platform(PlatformEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for metadata/logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::General,
            Self::Stage(_) => EventSource::Stage,
            Self::Transaction(_) => EventSource::Transaction,
            Self::Resolver(_) => EventSource::Resolver,
            Self::Download(_) => EventSource::Download,
            Self::Guard(_) => EventSource::Guard,
            Self::Snapshot(_) => EventSource::Snapshot,
            Self::Platform(_) => EventSource::Platform,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. })
            | Self::Stage(StageEvent::Failed { .. })
            | Self::Transaction(TransactionEvent::Stalled { .. })
            | Self::Download(DownloadEvent::Failed { .. })
            | Self::Platform(PlatformEvent::OperationFailed { .. }) => Level::ERROR,

            Self::General(GeneralEvent::Warning { .. } | GeneralEvent::CancellationRequested)
            | Self::Stage(
                StageEvent::Unavailable { .. } | StageEvent::InitramfsUpdateFailed { .. },
            )
            | Self::Transaction(TransactionEvent::PackageFailed { .. })
            | Self::Guard(GuardEvent::ArchitectureMismatch { .. } | GuardEvent::FileSkipped { .. }) => {
                Level::WARN
            }

            Self::Transaction(TransactionEvent::BatchCompleted { failed, .. })
                if !failed.is_empty() =>
            {
                Level::WARN
            }

            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Resolver(ResolverEvent::CycleBroken { .. })
            | Self::Download(DownloadEvent::QueueFull { .. })
            | Self::Platform(PlatformEvent::OperationStarted { .. }) => Level::DEBUG,

            Self::Platform(PlatformEvent::OperationCompleted { .. }) => Level::TRACE,

            _ => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "crossgrader::events::general",
            Self::Stage(_) => "crossgrader::events::stage",
            Self::Transaction(_) => "crossgrader::events::transaction",
            Self::Resolver(_) => "crossgrader::events::resolver",
            Self::Download(_) => "crossgrader::events::download",
            Self::Guard(_) => "crossgrader::events::guard",
            Self::Snapshot(_) => "crossgrader::events::snapshot",
            Self::Platform(_) => "crossgrader::events::platform",
        }
    }

    /// Get structured fields for logging
    #[must_use]
    pub fn log_fields(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}
