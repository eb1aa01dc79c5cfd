//! Integration tests for events

#[cfg(test)]
mod tests {
    use crossgrader_events::*;
    use crossgrader_types::Stage;

    #[tokio::test]
    async fn test_event_sender_emits_with_meta() {
        let (tx, mut rx) = channel();

        tx.emit_error("test error");
        tx.emit_debug("test debug");

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.event,
            AppEvent::General(GeneralEvent::Error { .. })
        ));
        assert_eq!(first.meta.level, EventLevel::Error);
        assert_eq!(first.meta.source, EventSource::General);

        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.event,
            AppEvent::General(GeneralEvent::DebugLog { .. })
        ));
        assert_ne!(first.meta.event_id, second.meta.event_id);
    }

    #[tokio::test]
    async fn test_dropped_receiver() {
        let (tx, rx) = channel();
        drop(rx);

        // Must not panic when the receiver is gone
        tx.emit_warning("ignored");
    }

    #[test]
    fn test_none_sender_is_silent() {
        let sender: Option<EventSender> = None;
        sender.emit_error("nobody listens");
    }

    #[test]
    fn test_app_event_serialization_shape() {
        let event = AppEvent::Stage(StageEvent::Completed {
            stage: Stage::Second,
            forced: false,
            converged: 12,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["domain"], "stage");
        assert_eq!(json["event"]["type"], "completed");
        assert_eq!(json["event"]["stage"], "second");
    }

    #[test]
    fn test_mismatch_is_a_warning() {
        let event = AppEvent::Guard(GuardEvent::ArchitectureMismatch {
            scope: VerifyScope::Scan,
            path: "/usr/bin/ls".into(),
            expected: "amd64".into(),
            actual: "arm64".into(),
            owner: None,
        });
        assert_eq!(event.log_level(), tracing::Level::WARN);
        assert_eq!(event.log_target(), "crossgrader::events::guard");
    }
}
