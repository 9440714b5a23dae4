use crate::error::{CheckError, FailureKind};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

#[derive(Debug, Default)]
pub struct Statistics {
    pub updated: Vec<String>,
    pub unchanged: usize,
    pub failures: Vec<FailureReport>,
}

impl Statistics {
    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.checker_id.as_str())
    }

    pub fn transient_failures(&self) -> usize {
        self.failures.iter().filter(|f| f.kind.is_transient()).count()
    }
}

#[derive(Debug)]
pub struct FailureReport {
    pub checker_id: String,
    pub kind: FailureKind,
    pub error: String,
}

/// Gathers per-checker outcomes sent from any number of workers.
#[derive(Debug)]
pub struct StatisticsCollector {
    sender: UnboundedSender<CheckReport>,
    receiver: UnboundedReceiver<CheckReport>,
}

impl StatisticsCollector {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();

        Self { sender, receiver }
    }

    /// Get a sender to send statistics.
    pub fn sender(&self) -> StatisticsSender {
        StatisticsSender {
            sender: self.sender.clone(),
        }
    }

    /// Wait for every outstanding sender to be dropped and sum up the reports.
    pub async fn finish(self) -> Statistics {
        let Self {
            sender,
            mut receiver,
        } = self;
        drop(sender);

        let mut statistics = Statistics::default();
        while let Some(report) = receiver.recv().await {
            match report.data {
                CheckDataPoint::Updated => statistics.updated.push(report.id),
                CheckDataPoint::Unchanged => statistics.unchanged += 1,
                CheckDataPoint::Failed { kind, error } => statistics.failures.push(FailureReport {
                    checker_id: report.id,
                    kind,
                    error,
                }),
            }
        }

        statistics
    }
}

#[derive(Debug)]
struct CheckReport {
    id: String,
    data: CheckDataPoint,
}

#[derive(Debug)]
enum CheckDataPoint {
    Updated,
    Unchanged,
    Failed { kind: FailureKind, error: String },
}

#[derive(Debug, Clone)]
pub struct StatisticsSender {
    sender: UnboundedSender<CheckReport>,
}

impl StatisticsSender {
    pub fn send_updated(&self, id: impl Into<String>) {
        self.send(id, CheckDataPoint::Updated);
    }

    pub fn send_unchanged(&self, id: impl Into<String>) {
        self.send(id, CheckDataPoint::Unchanged);
    }

    pub fn send_failed(&self, id: impl Into<String>, error: &CheckError) {
        self.send(
            id,
            CheckDataPoint::Failed {
                kind: error.kind(),
                error: error.to_string(),
            },
        );
    }

    fn send(&self, id: impl Into<String>, data: CheckDataPoint) {
        let _ = self.sender.send(CheckReport {
            id: id.into(),
            data,
        });
    }
}
