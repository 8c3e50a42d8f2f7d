use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::error::CheckError;

/// Outcome of a single probe execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    Failed(CheckError),
}

impl std::fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckOutcome::Passed => write!(f, "passed"),
            CheckOutcome::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Result of one cluster check, or of one node check against one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Name of the check that produced the result
    pub name: String,

    /// Node the check ran against, `None` for cluster checks
    pub node: Option<String>,

    pub outcome: CheckOutcome,

    /// Insertion order assigned by the collector
    pub sequence: u64,
}

impl CheckResult {
    /// Create a passing result
    pub fn new(name: impl Into<String>, node: Option<&str>) -> Self {
        Self {
            name: name.into(),
            node: node.map(str::to_string),
            outcome: CheckOutcome::Passed,
            sequence: 0,
        }
    }

    /// Mark the result as failed with the given cause
    pub fn failure(mut self, error: CheckError) -> Self {
        self.outcome = CheckOutcome::Failed(error);
        self
    }

    /// Take the outcome from a check's return value
    pub fn with_outcome(self, outcome: Result<(), CheckError>) -> Self {
        match outcome {
            Ok(()) => self,
            Err(err) => self.failure(err),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self.outcome, CheckOutcome::Passed)
    }

    pub fn error(&self) -> Option<&CheckError> {
        match &self.outcome {
            CheckOutcome::Passed => None,
            CheckOutcome::Failed(err) => Some(err),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    results: Vec<CheckResult>,
    next_sequence: u64,
    sealed: bool,
}

/// Append-only aggregator shared by every unit of a run.
///
/// Once sealed the collector rejects further results, which keeps the
/// snapshot handed to the caller stable.
#[derive(Debug, Default)]
pub struct ResultCollector {
    inner: Mutex<Inner>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result. Returns `false` if the collector is already sealed.
    pub fn add(&self, mut result: CheckResult) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.sealed {
            warn!(
                "Dropping result for {} after the run completed (node: {:?})",
                result.name, result.node
            );
            return false;
        }
        result.sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.results.push(result);
        true
    }

    /// All results collected so far, in insertion order
    pub fn snapshot(&self) -> Vec<CheckResult> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).results.clone()
    }

    /// Sequence number the next accepted result would get
    pub fn sequence(&self) -> u64 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).next_sequence
    }

    /// Stop accepting results
    pub fn seal(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).sealed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_keeps_every_result() {
        let collector = Arc::new(ResultCollector::new());

        let mut handles = Vec::new();
        for worker in 0..16 {
            let collector = collector.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let node = format!("node-{}", i);
                    collector.add(CheckResult::new(format!("check-{}", worker), Some(&node)));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.len(), 16 * 50);

        let mut sequences: Vec<u64> = snapshot.iter().map(|r| r.sequence).collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), 16 * 50);
        assert_eq!(collector.sequence(), 16 * 50);
    }

    #[test]
    fn test_same_name_is_not_deduplicated() {
        let collector = ResultCollector::new();
        collector.add(CheckResult::new("CheckNodeDiskUUID", Some("worker-0")));
        collector.add(CheckResult::new("CheckNodeDiskUUID", Some("worker-1")));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].node.as_deref(), Some("worker-0"));
        assert_eq!(snapshot[1].node.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_sealed_collector_rejects_results() {
        let collector = ResultCollector::new();
        assert!(collector.add(CheckResult::new("CheckDefaultDatastore", None)));

        collector.seal();

        let late = CheckResult::new("CheckFolderPermissions", None)
            .failure(CheckError::failed("too late"));
        assert!(!collector.add(late));
        assert!(collector.is_sealed());
        assert_eq!(collector.len(), 1);
        assert_eq!(collector.sequence(), 1);
    }

    #[test]
    fn test_outcome_helpers() {
        let ok = CheckResult::new("a", None).with_outcome(Ok(()));
        let failed = CheckResult::new("b", None).with_outcome(Err(CheckError::failed("boom")));

        assert!(ok.passed());
        assert!(ok.error().is_none());
        assert!(!failed.passed());
        assert_eq!(failed.error(), Some(&CheckError::failed("boom")));
        assert_eq!(failed.outcome.to_string(), "failed: boom");
    }
}
