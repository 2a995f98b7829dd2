//! Folding bucket results into a run verdict.
//!
//! A single aggregation task owns the [`RunStatus`]. Bucket tasks send their
//! results over a channel; the task folds each one and forwards its report
//! text to the reporter right away, so progress shows up while other
//! buckets are still running.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::framework::{ClassifiedResult, Status};
use crate::report::{LogEntry, Reporter};

/// The overall status of a run.
///
/// Starts at SUCCESS and only ever moves up the precedence
/// `SUCCESS < FLAKY < INTERNAL < TIMEOUT < FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus(Status);

impl RunStatus {
    pub fn new() -> Self {
        Self(Status::Success)
    }

    /// Raises the status to `status` if that is more severe.
    pub fn fold(&mut self, status: Status) {
        if status.severity() > self.0.severity() {
            self.0 = status;
        }
    }

    pub fn status(&self) -> Status {
        self.0
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds a set of statuses; the order does not matter.
pub fn fold_statuses<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut run = RunStatus::new();
    for status in statuses {
        run.fold(status);
    }
    run.status()
}

/// State of the aggregation task.
#[derive(Debug, Default)]
pub struct Aggregator {
    status: RunStatus,
    results: Vec<ClassifiedResult>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one result and keeps it.
    pub fn record(&mut self, result: ClassifiedResult) {
        self.status.fold(result.status());
        self.results.push(result);
    }

    /// Receives results until every sender is gone, reporting each one.
    pub async fn run<R>(mut self, mut rx: mpsc::Receiver<ClassifiedResult>, reporter: Arc<R>) -> Self
    where
        R: Reporter + ?Sized,
    {
        while let Some(result) = rx.recv().await {
            if let Err(err) = reporter.log(&LogEntry::now(result.report_text())).await {
                warn!("Reporter failed for {}: {}", result.name(), err);
            }
            self.record(result);
        }
        self
    }

    pub fn status(&self) -> Status {
        self.status.status()
    }

    /// Results in completion order.
    pub fn results(&self) -> &[ClassifiedResult] {
        &self.results
    }

    pub fn into_parts(self) -> (Status, Vec<ClassifiedResult>) {
        (self.status.status(), self.results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::report::ReportError;

    const ALL: [Status; 5] = [
        Status::Success,
        Status::Flaky,
        Status::Internal,
        Status::Timeout,
        Status::Failed,
    ];

    #[test]
    fn test_empty_fold_is_success() {
        assert_eq!(fold_statuses([]), Status::Success);
    }

    #[test]
    fn test_fold_precedence() {
        assert_eq!(fold_statuses([Status::Success, Status::Flaky]), Status::Flaky);
        assert_eq!(fold_statuses([Status::Flaky, Status::Internal]), Status::Internal);
        assert_eq!(fold_statuses([Status::Timeout, Status::Internal]), Status::Timeout);
        assert_eq!(fold_statuses([Status::Failed, Status::Timeout]), Status::Failed);
    }

    #[test]
    fn test_fold_mixed_runs() {
        assert_eq!(
            fold_statuses([Status::Success, Status::Flaky, Status::Success]),
            Status::Flaky
        );
        assert_eq!(
            fold_statuses([Status::Success, Status::Timeout, Status::Failed]),
            Status::Failed
        );
    }

    #[test]
    fn test_fold_is_order_independent() {
        for a in ALL {
            for b in ALL {
                for c in ALL {
                    let forward = fold_statuses([a, b, c]);
                    assert_eq!(forward, fold_statuses([c, b, a]));
                    assert_eq!(forward, fold_statuses([b, a, c]));
                }
            }
        }
    }

    #[test]
    fn test_fold_never_lowers() {
        let mut run = RunStatus::new();
        run.fold(Status::Timeout);
        run.fold(Status::Success);
        run.fold(Status::Flaky);
        assert_eq!(run.status(), Status::Timeout);
    }

    struct Flaky {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Reporter for Flaky {
        async fn log(&self, entry: &LogEntry) -> Result<(), ReportError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(entry.text.clone());
            if seen.len() == 1 {
                Err(ReportError::Io(std::io::Error::other("first write fails")))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_aggregator_reports_and_survives_reporter_errors() {
        let reporter = Arc::new(Flaky {
            seen: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(Aggregator::new().run(rx, Arc::clone(&reporter)));

        tx.send(ClassifiedResult::new(Status::Success, "a", "a", "", 0.1))
            .await
            .unwrap();
        tx.send(ClassifiedResult::new(Status::Failed, "b", "b (1 failed)", "E", 0.1))
            .await
            .unwrap();
        drop(tx);

        let aggregate = task.await.unwrap();
        assert_eq!(aggregate.status(), Status::Failed);
        assert_eq!(aggregate.results().len(), 2);
        assert_eq!(
            *reporter.seen.lock().unwrap(),
            vec!["[SUCCESS] a", "[FAILED] b (1 failed)\nE"]
        );
    }
}
