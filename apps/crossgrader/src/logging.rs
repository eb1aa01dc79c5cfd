//! Structured logging integration for events
//!
//! Every event is mirrored into `tracing` at the level carried in its
//! metadata, with the interesting fields broken out so the JSON debug log
//! can be filtered without parsing messages.

use crossgrader_events::{
    AppEvent, DownloadEvent, EventMessage, GuardEvent, PlatformEvent, ResolverEvent, SnapshotEvent,
    StageEvent, TransactionEvent,
};
use tracing::Level;

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!($($arg)+),
            Level::WARN => tracing::warn!($($arg)+),
            Level::INFO => tracing::info!($($arg)+),
            Level::DEBUG => tracing::debug!($($arg)+),
            _ => tracing::trace!($($arg)+),
        }
    };
}

/// Log an event with structured fields
pub fn log_event_with_tracing(message: &EventMessage) {
    let meta = &message.meta;
    let level = meta.tracing_level();
    let source = meta.source.as_str();

    match &message.event {
        AppEvent::Stage(StageEvent::Started {
            stage,
            target,
            source: from,
            dry_run,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                stage = %stage,
                target_arch = %target,
                from = %from,
                dry_run = dry_run,
                "Stage started"
            );
        }
        AppEvent::Stage(StageEvent::Unavailable {
            stage,
            packages,
            skipped,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                stage = %stage,
                packages = ?packages,
                skipped = skipped,
                "Packages unavailable in target architecture"
            );
        }
        AppEvent::Stage(StageEvent::Completed {
            stage,
            forced,
            converged,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                stage = %stage,
                forced = forced,
                converged = converged,
                "Stage completed"
            );
        }
        AppEvent::Stage(StageEvent::Failed {
            stage,
            failure,
            stuck,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                stage = %stage,
                code = ?failure.code,
                error_message = %failure.message,
                stuck = ?stuck,
                "Stage failed"
            );
        }
        AppEvent::Transaction(TransactionEvent::PassCompleted {
            batch_id,
            pass,
            progressed,
            pending,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                batch_id = %batch_id,
                pass = pass,
                progressed = progressed,
                pending = pending,
                "Pass completed"
            );
        }
        AppEvent::Transaction(TransactionEvent::PackageFailed {
            package,
            signature,
            message: error,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                batch_id = meta.correlation_id.as_deref().unwrap_or("-"),
                package = %package,
                signature = %signature,
                error = %error,
                "Package failed"
            );
        }
        AppEvent::Transaction(TransactionEvent::BatchCompleted {
            batch_id,
            succeeded,
            retried,
            failed,
            passes,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                batch_id = %batch_id,
                succeeded = succeeded,
                retried = retried,
                failed = ?failed,
                passes = passes,
                "Batch completed"
            );
        }
        AppEvent::Resolver(ResolverEvent::OrderingCompleted {
            leading,
            total,
            batches,
            cycles_broken,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                leading = leading,
                total = total,
                batches = batches,
                cycles_broken = cycles_broken,
                "Dependency order computed"
            );
        }
        AppEvent::Download(DownloadEvent::Failed { package, failure }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                package = %package,
                retryable = failure.retryable,
                code = ?failure.code,
                error_message = %failure.message,
                "Download failed"
            );
        }
        AppEvent::Guard(GuardEvent::ArchitectureMismatch {
            scope,
            path,
            expected,
            actual,
            owner,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                scope = ?scope,
                path = %path,
                expected = %expected,
                actual = %actual,
                owner = ?owner,
                "Architecture mismatch"
            );
        }
        AppEvent::Snapshot(SnapshotEvent::JournalUpdated {
            path,
            stage,
            outcome,
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                path = %path,
                stage = %stage,
                outcome = %outcome,
                "Journal updated"
            );
        }
        AppEvent::Platform(PlatformEvent::OperationFailed {
            context,
            failure,
            ..
        }) => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                operation = %context.operation,
                command = ?context.command.as_ref().map(|c| c.command_line()),
                error_message = %failure.message,
                "Platform operation failed"
            );
        }
        other => {
            log_at!(
                level,
                source,
                event_id = %meta.event_id,
                log_target = other.log_target(),
                fields = %other.log_fields(),
                "Event"
            );
        }
    }
}
