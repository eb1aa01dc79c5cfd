//! Integration tests for error types

#[cfg(test)]
mod tests {
    use crossgrader_errors::*;

    #[test]
    fn test_error_conversion() {
        let err: Error = TransactionError::Stalled {
            passes: 10,
            pending: 3,
        }
        .into();
        assert!(matches!(err, Error::Transaction(_)));
    }

    #[test]
    fn test_error_display() {
        let err = PackageError::NotFound {
            package: "zsh:amd64".into(),
        };
        assert_eq!(
            err.to_string(),
            "package not found in target architecture: zsh:amd64"
        );
    }

    #[test]
    fn test_stage_failed_counts_stuck_packages() {
        let err = StageError::Failed {
            stage: "stage two".into(),
            stuck: vec!["perl-base".into(), "python3-pil".into()],
        };
        assert_eq!(err.to_string(), "stage two failed with 2 stuck packages");
    }

    #[test]
    fn test_user_codes_are_stable() {
        let err: Error = PackageError::AmbiguousName {
            package: "python3-cairo".into(),
            instances: 2,
        }
        .into();
        assert_eq!(err.user_code(), Some("package.ambiguous_name"));
        assert!(err.user_hint().is_some());
    }

    #[test]
    fn test_cancellation_is_detected_through_wrappers() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::from(TransactionError::Cancelled).is_cancelled());
        assert!(!Error::internal("boom").is_cancelled());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let err: Error = io_err.into();
        assert!(matches!(
            err,
            Error::Io {
                kind: std::io::ErrorKind::PermissionDenied,
                ..
            }
        ));
    }
}
