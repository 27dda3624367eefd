//! Static threshold tables and the classifier that evaluates them.
//!
//! A table is a list of `(bound, severity)` pairs. A value matches a threshold when it is
//! strictly greater than the bound; the matching threshold with the highest bound wins.

use super::{Finding, Severity};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub bound: f64,
    pub severity: Severity,
}

impl Threshold {
    pub const fn above(bound: f64, severity: Severity) -> Self {
        Self { bound, severity }
    }
}

pub type ThresholdTable = [Threshold];

/// Current InnoDB row lock waits
pub const ROW_LOCK_WAITS: &ThresholdTable = &[
    Threshold::above(10.0, Severity::Critical),
    Threshold::above(0.0, Severity::Warning),
];

/// `trx_rseg_history_len`
pub const UNDO_LOG_BACKLOG: &ThresholdTable = &[
    Threshold::above(5000.0, Severity::Critical),
    Threshold::above(1000.0, Severity::Warning),
];

/// Growth of a cumulative status counter across one sampling interval
pub const STATUS_COUNTER_DELTA: &ThresholdTable = &[
    Threshold::above(20.0, Severity::Critical),
    Threshold::above(5.0, Severity::Warning),
];

/// Random reads as a fraction of all handler reads
pub const RANDOM_READ_RATIO: &ThresholdTable = &[
    Threshold::above(0.4, Severity::Critical),
    Threshold::above(0.2, Severity::Warning),
];

/// Seconds behind the source
pub const REPLICATION_LAG_SECS: &ThresholdTable = &[
    Threshold::above(100.0, Severity::Critical),
    Threshold::above(0.0, Severity::Warning),
];

/// Difference in comma-separated GTID entry counts
pub const GTID_ENTRY_DIVERGENCE: &ThresholdTable = &[
    Threshold::above(100.0, Severity::Critical),
    Threshold::above(0.0, Severity::Warning),
];

/// Transactions waiting in a group replication queue
pub const CLUSTER_QUEUE_DEPTH: &ThresholdTable = &[
    Threshold::above(100.0, Severity::Critical),
    Threshold::above(10.0, Severity::Warning),
];

/// Average benchmark response time in milliseconds
pub const AVERAGE_RESPONSE_MS: &ThresholdTable = &[
    Threshold::above(50.0, Severity::Critical),
    Threshold::above(10.0, Severity::Warning),
];

/// Threads holding more than 1 GiB in one memory instrument
pub const HIGH_MEMORY_THREADS: &ThresholdTable = &[
    Threshold::above(10.0, Severity::Critical),
    Threshold::above(0.0, Severity::Warning),
];

/// Severity of the highest bound `value` exceeds, if any
pub fn classify(value: f64, table: &ThresholdTable) -> Option<Severity> {
    table
        .iter()
        .filter(|t| value > t.bound)
        .max_by(|a, b| a.bound.total_cmp(&b.bound))
        .map(|t| t.severity)
}

/// Classify `value` and build a finding for it; `describe` renders the message
pub fn classify_finding(
    key: &str,
    value: f64,
    table: &ThresholdTable,
    describe: impl FnOnce(Severity) -> String,
) -> Option<Finding> {
    classify(value, table).map(|severity| Finding::new(key, severity, describe(severity)))
}
