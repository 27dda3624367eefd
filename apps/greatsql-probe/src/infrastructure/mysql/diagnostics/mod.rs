//! # MySQL Diagnostics Module
//!
//! This module turns raw metric snapshots taken from a GreatSQL / MySQL server into
//! severity-tagged findings. Each diagnostic operation opens one session through a
//! [`SessionProvider`], runs the handful of queries it needs, classifies the results and
//! drops the session again. Nothing is shared between invocations.
//!
//! ## Architecture
//!
//! Three-layer design:
//! 1. **Sampling Layer** - [`snapshot`] reads name/value views, [`sample`] pairs two snapshots
//!    and derives deltas and ratios
//! 2. **Classification Layer** - [`thresholds`] holds the static rule tables, the analyzers
//!    ([`replication`], [`cluster`], [`config_audit`], ...) turn parsed rows into findings
//! 3. **Consumer Layer** - the CLI and the MCP server pick a [`DiagnosticOperation`] and
//!    serialize the resulting [`DiagnosticReport`]
//!
//! ## Diagnostic Operations
//!
//! ### 1. trackNotableStats
//! Thread states, two-sample global status deltas and the undo purge backlog.
//! - **Sources**: `performance_schema.processlist`, `performance_schema.global_status`,
//!   `information_schema.INNODB_METRICS`
//! - **Thresholds**: counters Critical (>20) / Warning (>5), row lock waits Critical (>10) /
//!   Warning (>0), random read ratio Critical (>0.4) / Warning (>0.2), undo backlog Critical
//!   (>5000) / Warning (>1000)
//!
//! ### 2. checkMGRStatus
//! Group replication membership and per-member queue depth.
//! - **Sources**: `performance_schema.replication_group_members`,
//!   `performance_schema.replication_group_member_stats`
//! - **Thresholds**: queue depth Critical (>100) / Warning (>10)
//!
//! ### 3. findAbnormalMemoryIssue
//! Memory instruments above 1 GiB.
//! - **Sources**: `performance_schema.memory_summary_global_by_event_name`,
//!   `performance_schema.memory_summary_by_thread_by_event_name`
//!
//! ### 4. findImproperVars
//! Configuration audit against recommended values.
//! - **Sources**: `performance_schema.global_variables`, `performance_schema.global_status`
//!
//! ### 5. monitorReplicationLag / getReplicaStatus
//! Replica thread health, lag, relay and GTID progress.
//! - **Source**: `SHOW REPLICA STATUS` (`SHOW SLAVE STATUS` on servers that reject it)
//! - **Thresholds**: lag Critical (>100s) / Warning (>0s)
//!
//! ### 6. checkCriticalTransactions
//! Long running or lock-heavy transactions.
//! - **Source**: `information_schema.INNODB_TRX`
//!
//! ### 7. avgSQLRT
//! Average execution time of a fixed CPU-bound statement.
//! - **Thresholds**: Critical (>50ms) / Warning (>10ms)

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod cluster;
pub mod config_audit;
pub mod latency;
pub mod memory;
pub mod notable_stats;
pub mod replication;
pub mod sample;
pub mod snapshot;
pub mod thresholds;
pub mod transactions;

/// One result row, keyed by column name as returned by the server
pub type Row = Map<String, Value>;

/// Error types for diagnostic operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiagnosticError {
    #[error("Failed to connect to MySQL: {0}")]
    ConnectionFailed(String),

    #[error("Failed to execute diagnostic query: {0}")]
    QueryFailed(String),

    #[error("Statement not supported by the server: {0}")]
    UnsupportedStatement(String),

    #[error("Query timeout after {0} seconds")]
    QueryTimeout(u64),

    #[error("Malformed diagnostic input: {0}")]
    MalformedInput(String),

    #[error("Diagnostic was cancelled before it completed")]
    Cancelled,

    #[error("Unknown operation: {0}. Available operations: {1}")]
    UnknownOperation(String, String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Diagnostic task failed: {0}")]
    TaskFailed(String),
}

/// Severity level for findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    /// Check if this severity should include findings of the given level
    pub fn includes(&self, other: &Severity) -> bool {
        match self {
            Severity::Info => true,
            Severity::Warning => matches!(other, Severity::Warning | Severity::Critical),
            Severity::Critical => matches!(other, Severity::Critical),
        }
    }

    /// Advisory grade used by DBA runbooks
    pub fn advisory_grade(&self) -> &'static str {
        match self {
            Severity::Critical => "严重级",
            Severity::Warning => "一般级",
            Severity::Info => "提示",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = DiagnosticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" | "error" => Ok(Severity::Critical),
            "warning" => Ok(Severity::Warning),
            "info" | "all" => Ok(Severity::Info),
            _ => Err(DiagnosticError::InvalidParameter(format!(
                "severity must be one of: critical, warning, info (got '{}')",
                s
            ))),
        }
    }
}

/// A single severity-tagged diagnostic message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub key: String,
    pub severity: Severity,
    pub message: String,
    /// Set when the entry records a sub-check that could not run
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

impl Finding {
    pub fn new(key: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            severity,
            message: message.into(),
            failed: false,
        }
    }

    pub fn critical(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(key, Severity::Critical, message)
    }

    pub fn warning(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(key, Severity::Warning, message)
    }

    pub fn info(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(key, Severity::Info, message)
    }

    /// Records the failure of one sub-check as `<check>_error`
    pub fn check_failed(check: &str, error: &DiagnosticError) -> Self {
        Self {
            key: format!("{}_error", check),
            severity: Severity::Warning,
            message: error.to_string(),
            failed: true,
        }
    }
}

/// Insertion-ordered collection of findings keyed by check identity.
///
/// Inserting a key that is already present replaces the earlier finding in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Findings {
    entries: Vec<Finding>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, finding: Finding) {
        match self.entries.iter_mut().find(|f| f.key == finding.key) {
            Some(existing) => *existing = finding,
            None => self.entries.push(finding),
        }
    }

    pub fn insert_opt(&mut self, finding: Option<Finding>) {
        if let Some(finding) = finding {
            self.insert(finding);
        }
    }

    pub fn merge(&mut self, other: Findings) {
        for finding in other.entries {
            self.insert(finding);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Finding> {
        self.entries.iter().find(|f| f.key == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|f| f.key.as_str()).collect()
    }

    /// Keep only findings at or above `min_severity`. Failed sub-checks are always kept.
    pub fn filtered(&self, min_severity: Severity) -> Findings {
        Findings {
            entries: self
                .entries
                .iter()
                .filter(|f| f.failed || min_severity.includes(&f.severity))
                .cloned()
                .collect(),
        }
    }
}

impl FromIterator<Finding> for Findings {
    fn from_iter<I: IntoIterator<Item = Finding>>(iter: I) -> Self {
        let mut findings = Findings::new();
        for finding in iter {
            findings.insert(finding);
        }
        findings
    }
}

impl<'a> IntoIterator for &'a Findings {
    type Item = &'a Finding;
    type IntoIter = std::slice::Iter<'a, Finding>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Serialize for Findings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Entry<'a> {
            severity: Severity,
            grade: &'static str,
            message: &'a str,
            #[serde(skip_serializing_if = "std::ops::Not::not")]
            failed: bool,
        }

        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for finding in &self.entries {
            map.serialize_entry(
                &finding.key,
                &Entry {
                    severity: finding.severity,
                    grade: finding.severity.advisory_grade(),
                    message: &finding.message,
                    failed: finding.failed,
                },
            )?;
        }
        map.end()
    }
}

/// Summary statistics for a report
#[derive(Debug, Clone, Serialize)]
pub struct FindingSummary {
    pub total_findings: usize,
    pub by_severity: HashMap<String, usize>,
    pub failed_checks: usize,
}

/// Complete output of one diagnostic operation
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub operation: String,
    pub findings: Findings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metrics: Map<String, Value>,
    pub summary: FindingSummary,
}

impl DiagnosticReport {
    /// Create a new report and compute summary statistics
    pub fn new(operation: &str, findings: Findings) -> Self {
        let summary = Self::summarize(&findings);
        Self {
            operation: operation.to_string(),
            findings,
            rows: Vec::new(),
            metrics: Map::new(),
            summary,
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_metric(mut self, name: &str, value: Value) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// Drop findings below `min_severity` and recompute the summary
    pub fn filter_severity(mut self, min_severity: Severity) -> Self {
        self.findings = self.findings.filtered(min_severity);
        self.summary = Self::summarize(&self.findings);
        self
    }

    fn summarize(findings: &Findings) -> FindingSummary {
        let mut by_severity = HashMap::new();
        let mut failed_checks = 0;

        for finding in findings {
            if finding.failed {
                failed_checks += 1;
                continue;
            }
            *by_severity
                .entry(finding.severity.as_str().to_string())
                .or_insert(0) += 1;
        }

        FindingSummary {
            total_findings: findings.len(),
            by_severity,
            failed_checks,
        }
    }
}

/// A connection-like handle able to run statements against one target.
///
/// Implementations own the underlying connection for the duration of one diagnostic call.
#[async_trait::async_trait]
pub trait QueryExecutor: Send {
    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<Row>, DiagnosticError>;
}

/// Opens sessions for diagnostic calls
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self, database: Option<&str>)
        -> Result<Box<dyn QueryExecutor>, DiagnosticError>;
}

fn default_sample_interval_secs() -> u64 {
    5
}

fn default_benchmark_iterations() -> u32 {
    10
}

fn default_benchmark_pause_ms() -> u64 {
    1000
}

/// Tunable policy knobs for the diagnostics engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagnosticSettings {
    /// Wait between the two global status snapshots
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    #[serde(default = "default_benchmark_iterations")]
    pub benchmark_iterations: u32,
    #[serde(default = "default_benchmark_pause_ms")]
    pub benchmark_pause_ms: u64,
}

impl DiagnosticSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn benchmark_pause(&self) -> Duration {
        Duration::from_millis(self.benchmark_pause_ms)
    }
}

impl Default for DiagnosticSettings {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            benchmark_iterations: default_benchmark_iterations(),
            benchmark_pause_ms: default_benchmark_pause_ms(),
        }
    }
}

/// Per-call context handed to every operation
#[derive(Debug, Clone, Default)]
pub struct DiagnosticContext {
    pub settings: DiagnosticSettings,
    /// Aborts timed waits when the caller goes away
    pub cancel: CancellationToken,
}

impl DiagnosticContext {
    pub fn new(settings: DiagnosticSettings) -> Self {
        Self {
            settings,
            cancel: CancellationToken::new(),
        }
    }
}

/// Closed set of diagnostic operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticOperation {
    TrackNotableStats,
    CheckClusterStatus,
    FindAbnormalMemory,
    FindImproperVariables,
    MonitorReplicationLag,
    ReplicaStatus,
    CheckCriticalTransactions,
    AverageResponseTime,
}

impl DiagnosticOperation {
    /// Lookup table of every operation, in presentation order
    pub const ALL: &'static [DiagnosticOperation] = &[
        DiagnosticOperation::TrackNotableStats,
        DiagnosticOperation::CheckClusterStatus,
        DiagnosticOperation::FindAbnormalMemory,
        DiagnosticOperation::FindImproperVariables,
        DiagnosticOperation::MonitorReplicationLag,
        DiagnosticOperation::ReplicaStatus,
        DiagnosticOperation::CheckCriticalTransactions,
        DiagnosticOperation::AverageResponseTime,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticOperation::TrackNotableStats => "trackNotableStats",
            DiagnosticOperation::CheckClusterStatus => "checkMGRStatus",
            DiagnosticOperation::FindAbnormalMemory => "findAbnormalMemoryIssue",
            DiagnosticOperation::FindImproperVariables => "findImproperVars",
            DiagnosticOperation::MonitorReplicationLag => "monitorReplicationLag",
            DiagnosticOperation::ReplicaStatus => "getReplicaStatus",
            DiagnosticOperation::CheckCriticalTransactions => "checkCriticalTransactions",
            DiagnosticOperation::AverageResponseTime => "avgSQLRT",
        }
    }

    /// Older names still accepted from callers
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            DiagnosticOperation::TrackNotableStats => &["listNotableWaitEvents"],
            DiagnosticOperation::ReplicaStatus => &["getSlaveStatus"],
            _ => &[],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DiagnosticOperation::TrackNotableStats => {
                "Scan thread states, sample global status counters twice and check the undo purge backlog"
            }
            DiagnosticOperation::CheckClusterStatus => {
                "Check group replication membership, quorum and per-member queue depth"
            }
            DiagnosticOperation::FindAbnormalMemory => {
                "Find memory instruments and threads holding more than 1 GiB"
            }
            DiagnosticOperation::FindImproperVariables => {
                "Audit server variables against recommended production values"
            }
            DiagnosticOperation::MonitorReplicationLag => {
                "Check replica thread health, lag, relay log and GTID execution progress"
            }
            DiagnosticOperation::ReplicaStatus => {
                "Show replica status fields with repair advice and a GTID divergence estimate"
            }
            DiagnosticOperation::CheckCriticalTransactions => {
                "List long running or lock-heavy InnoDB transactions"
            }
            DiagnosticOperation::AverageResponseTime => {
                "Benchmark a fixed statement repeatedly and report the average response time"
            }
        }
    }

    /// Operations that block for a long time and are left out of a sweep
    pub fn is_benchmark(&self) -> bool {
        matches!(self, DiagnosticOperation::AverageResponseTime)
    }

    pub fn available_names() -> String {
        Self::ALL
            .iter()
            .map(|op| op.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for DiagnosticOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DiagnosticOperation {
    type Err = DiagnosticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .iter()
            .find(|op| {
                op.name().eq_ignore_ascii_case(name)
                    || op.aliases().iter().any(|a| a.eq_ignore_ascii_case(name))
            })
            .copied()
            .ok_or_else(|| {
                DiagnosticError::UnknownOperation(name.to_string(), Self::available_names())
            })
    }
}

/// Run one operation against a fresh session
pub async fn run_operation(
    operation: DiagnosticOperation,
    provider: &dyn SessionProvider,
    context: &DiagnosticContext,
) -> Result<DiagnosticReport, DiagnosticError> {
    tracing::info!("Running diagnostic operation {}", operation);

    let mut session = provider.open(None).await?;
    let executor = session.as_mut();
    let name = operation.name();

    let report = match operation {
        DiagnosticOperation::TrackNotableStats => {
            let findings = notable_stats::track(executor, context).await;
            DiagnosticReport::new(name, findings)
        }
        DiagnosticOperation::CheckClusterStatus => {
            DiagnosticReport::new(name, cluster::check(executor).await)
        }
        DiagnosticOperation::FindAbnormalMemory => {
            DiagnosticReport::new(name, memory::scan(executor).await)
        }
        DiagnosticOperation::FindImproperVariables => {
            DiagnosticReport::new(name, config_audit::audit_server(executor).await)
        }
        DiagnosticOperation::MonitorReplicationLag => {
            let status = replication::fetch_status(executor).await?;
            DiagnosticReport::new(name, replication::analyze(status.as_ref()))
        }
        DiagnosticOperation::ReplicaStatus => {
            let (findings, rows) = replication::status_report(executor).await?;
            DiagnosticReport::new(name, findings).with_rows(rows)
        }
        DiagnosticOperation::CheckCriticalTransactions => {
            let rows = transactions::fetch_critical(executor).await?;
            DiagnosticReport::new(name, transactions::summarize(&rows)).with_rows(rows)
        }
        DiagnosticOperation::AverageResponseTime => {
            let avg_ms = latency::measure_average(executor, context).await?;
            let findings: Findings = latency::classify_average(avg_ms).into_iter().collect();
            DiagnosticReport::new(name, findings)
                .with_metric(latency::METRIC_NAME, serde_json::json!(avg_ms))
        }
    };

    tracing::info!(
        "Diagnostic operation {} complete. Found {} findings.",
        operation,
        report.findings.len()
    );

    Ok(report)
}

/// Run every non-benchmark operation concurrently.
///
/// A failing operation does not abort the sweep; it is reported as a single
/// `<operation>_error` entry in its own report. Reports come back in catalogue order.
pub async fn run_sweep(
    provider: Arc<dyn SessionProvider>,
    context: DiagnosticContext,
) -> Vec<DiagnosticReport> {
    let handles: Vec<_> = DiagnosticOperation::ALL
        .iter()
        .copied()
        .filter(|op| !op.is_benchmark())
        .map(|operation| {
            let provider = provider.clone();
            let context = context.clone();
            let handle = tokio::spawn(async move {
                run_operation(operation, provider.as_ref(), &context).await
            });
            (operation, handle)
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());

    for (operation, handle) in handles {
        let error = match handle.await {
            Ok(Ok(report)) => {
                reports.push(report);
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!("Operation {} failed: {}", operation, e);
                e
            }
            Err(e) => {
                // Task panicked or was aborted
                tracing::error!("Diagnostic task for {} failed: {}", operation, e);
                DiagnosticError::TaskFailed(e.to_string())
            }
        };
        let findings: Findings =
            std::iter::once(Finding::check_failed(operation.name(), &error)).collect();
        reports.push(DiagnosticReport::new(operation.name(), findings));
    }

    reports
}
