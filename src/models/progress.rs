//! Progress reporting for long-running synchronization

use serde::{Deserialize, Serialize};

/// Snapshot of synchronization progress
///
/// Emitted to a [`ProgressSink`]; never retained by the emitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// 0-100, non-decreasing within one run
    pub percent: u8,
    pub activity: String,
}

impl ProgressReport {
    pub fn new(percent: u8, activity: impl Into<String>) -> Self {
        ProgressReport {
            percent: percent.min(100),
            activity: activity.into(),
        }
    }
}

/// Observer for progress reports
///
/// Implemented for any `Fn(&ProgressReport)` closure, so callers can forward
/// into a channel, a UI binding, or a test buffer.
pub trait ProgressSink: Send + Sync {
    fn report(&self, report: &ProgressReport);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressReport) + Send + Sync,
{
    fn report(&self, report: &ProgressReport) {
        self(report)
    }
}
