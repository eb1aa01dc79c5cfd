use crossgrader_dpkg::FailureKind;
use crossgrader_errors::TransactionError;
use crossgrader_types::PackageRef;
use std::collections::BTreeMap;

/// Final state of one package in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageResult {
    /// Converged on the first attempt
    Succeeded,
    /// Converged after at least one failed attempt
    RetriedAndSucceeded,
    Failed { kind: FailureKind, message: String },
}

impl PackageResult {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Why the pass loop of a batch stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Pending set emptied
    Converged,
    /// A full pass changed nothing
    NoProgress { pass: u32 },
    /// Pass ceiling reached with work left
    Stalled { passes: u32 },
}

/// Result of running one batch to a fixed point
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: String,
    /// Packages already in the wanted state before the first pass
    pub already_converged: usize,
    pub results: BTreeMap<PackageRef, PackageResult>,
    pub passes: u32,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    #[must_use]
    pub fn new(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            already_converged: 0,
            results: BTreeMap::new(),
            passes: 0,
            outcome: BatchOutcome::Converged,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &PackageRef> {
        self.with_result(|r| matches!(r, PackageResult::Succeeded))
    }

    pub fn retried(&self) -> impl Iterator<Item = &PackageRef> {
        self.with_result(|r| matches!(r, PackageResult::RetriedAndSucceeded))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&PackageRef, FailureKind)> {
        self.results.iter().filter_map(|(pkg, r)| match r {
            PackageResult::Failed { kind, .. } => Some((pkg, *kind)),
            _ => None,
        })
    }

    fn with_result(
        &self,
        pred: impl Fn(&PackageResult) -> bool,
    ) -> impl Iterator<Item = &PackageRef> {
        self.results
            .iter()
            .filter(move |(_, r)| pred(r))
            .map(|(pkg, _)| pkg)
    }

    /// Names of the packages left in the Failed set
    #[must_use]
    pub fn stuck(&self) -> Vec<String> {
        self.failed().map(|(pkg, _)| pkg.name.clone()).collect()
    }

    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.outcome == BatchOutcome::Converged && self.failed().next().is_none()
    }

    /// Error describing why the batch did not converge
    #[must_use]
    pub fn error(&self) -> Option<TransactionError> {
        let pending = self.failed().count();
        match self.outcome {
            BatchOutcome::Converged if pending == 0 => None,
            BatchOutcome::Converged => {
                let (pkg, message) = self.results.iter().find_map(|(pkg, r)| match r {
                    PackageResult::Failed { message, .. } => Some((pkg, message)),
                    _ => None,
                })?;
                Some(TransactionError::Failed {
                    package: pkg.to_string(),
                    message: message.clone(),
                })
            }
            BatchOutcome::NoProgress { pass } => Some(TransactionError::NoProgress { pass, pending }),
            BatchOutcome::Stalled { passes } => Some(TransactionError::Stalled { passes, pending }),
        }
    }

    /// Fold download failures into the Failed set
    pub fn record_download_failures(&mut self, failures: &[(PackageRef, String)]) {
        for (pkg, message) in failures {
            self.results.insert(
                pkg.clone(),
                PackageResult::Failed {
                    kind: FailureKind::DownloadFailed,
                    message: message.clone(),
                },
            );
        }
    }
}

/// Result of a removal loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed: Vec<String>,
    /// Still installed in the removed architecture when the loop stopped
    pub remaining: Vec<String>,
    pub passes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrader_types::Arch;

    fn pkg(name: &str) -> PackageRef {
        PackageRef::new(name, Arch::new("amd64"))
    }

    #[test]
    fn test_partitions() {
        let mut report = BatchReport::new("b0");
        report.results.insert(pkg("a"), PackageResult::Succeeded);
        report
            .results
            .insert(pkg("b"), PackageResult::RetriedAndSucceeded);
        report.results.insert(
            pkg("c"),
            PackageResult::Failed {
                kind: FailureKind::Unrecognized,
                message: "boom".to_string(),
            },
        );

        assert_eq!(report.succeeded().count(), 1);
        assert_eq!(report.retried().count(), 1);
        assert_eq!(report.stuck(), vec!["c"]);
        assert!(!report.is_converged());
        assert!(matches!(
            report.error(),
            Some(TransactionError::Failed { ref package, .. }) if package == "c:amd64"
        ));

        report.outcome = BatchOutcome::NoProgress { pass: 3 };
        assert!(matches!(
            report.error(),
            Some(TransactionError::NoProgress { pass: 3, pending: 1 })
        ));
    }

    #[test]
    fn test_download_failures_join_failed_set() {
        let mut report = BatchReport::new("b1");
        report.record_download_failures(&[(pkg("x"), "timed out".to_string())]);
        assert_eq!(
            report.failed().collect::<Vec<_>>(),
            vec![(&pkg("x"), FailureKind::DownloadFailed)]
        );
    }
}
