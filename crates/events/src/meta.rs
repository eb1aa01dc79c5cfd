//! Envelope data attached to every emitted event

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Level;
use uuid::Uuid;

use crate::AppEvent;

/// When, where and how loudly an event was emitted
///
/// Transaction events emitted while a batch runs carry that batch's id in
/// `correlation_id`, so a failed package can be traced back to its batch
/// in the debug log.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub source: EventSource,
}

impl EventMeta {
    #[must_use]
    pub fn new(level: impl Into<EventLevel>, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            correlation_id: None,
            timestamp: Utc::now(),
            level: level.into(),
            source,
        }
    }

    /// Metadata derived from the event's own level and domain
    #[must_use]
    pub fn for_event(event: &AppEvent) -> Self {
        Self::new(event.log_level(), event.event_source())
    }

    /// Tie the event to a transaction batch
    #[must_use]
    pub fn in_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.correlation_id = Some(batch_id.into());
        self
    }

    #[must_use]
    pub fn tracing_level(&self) -> Level {
        match self.level {
            EventLevel::Trace => Level::TRACE,
            EventLevel::Debug => Level::DEBUG,
            EventLevel::Info => Level::INFO,
            EventLevel::Warn => Level::WARN,
            EventLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Level> for EventLevel {
    fn from(level: Level) -> Self {
        if level == Level::ERROR {
            Self::Error
        } else if level == Level::WARN {
            Self::Warn
        } else if level == Level::INFO {
            Self::Info
        } else if level == Level::DEBUG {
            Self::Debug
        } else {
            Self::Trace
        }
    }
}

/// Event domain, one per [`AppEvent`] variant
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    General,
    Stage,
    Transaction,
    Resolver,
    Download,
    Guard,
    Snapshot,
    Platform,
}

impl EventSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Stage => "stage",
            Self::Transaction => "transaction",
            Self::Resolver => "resolver",
            Self::Download => "download",
            Self::Guard => "guard",
            Self::Snapshot => "snapshot",
            Self::Platform => "platform",
        }
    }
}
