//! Diagnostics for a single replica's `SHOW REPLICA STATUS` output

use super::snapshot::{column_str, MetricValue};
use super::thresholds::{classify_finding, GTID_ENTRY_DIVERGENCE, REPLICATION_LAG_SECS};
use super::{DiagnosticError, Finding, Findings, QueryExecutor, Row};

const REPLICA_STATUS_QUERY: &str = "SHOW REPLICA STATUS";
/// Servers older than 8.0.22 only understand the legacy statement
const LEGACY_REPLICA_STATUS_QUERY: &str = "SHOW SLAVE STATUS";

const RUNNING: &str = "Yes";

/// Replica fields relevant to health checks, accepting both the legacy
/// (`Master_*` / `Slave_*`) and current (`Source_*` / `Replica_*`) column names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicaStatus {
    pub source_host: Option<String>,
    pub io_running: Option<String>,
    pub sql_running: Option<String>,
    pub seconds_behind: Option<String>,
    pub source_log_file: Option<String>,
    pub relay_source_log_file: Option<String>,
    pub read_position: Option<String>,
    pub exec_position: Option<String>,
    pub retrieved_gtid_set: Option<String>,
    pub executed_gtid_set: Option<String>,
    pub last_io_errno: Option<String>,
    pub last_io_error: Option<String>,
    pub last_sql_errno: Option<String>,
    pub last_sql_error: Option<String>,
    pub last_errno: Option<String>,
    pub last_error: Option<String>,
}

fn field(row: &Row, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| column_str(row, name))
}

fn integer(raw: &Option<String>) -> Option<i64> {
    raw.as_deref()
        .and_then(|s| MetricValue::parse(s).as_integer())
}

/// GTID sets are printed with a newline after each comma
fn normalize_gtid_set(set: &str) -> String {
    set.chars().filter(|c| !c.is_whitespace()).collect()
}

fn is_running(state: &Option<String>) -> bool {
    state
        .as_deref()
        .is_some_and(|s| s.trim().eq_ignore_ascii_case(RUNNING))
}

/// Error code/text pair, only when a non-zero error code was recorded
fn thread_error(errno: &Option<String>, error: &Option<String>) -> Option<String> {
    let errno = integer(errno).filter(|n| *n != 0)?;
    let error = error.as_deref().map(str::trim).unwrap_or("");
    Some(format!("errno {}: {}", errno, error))
}

impl ReplicaStatus {
    pub fn from_row(row: &Row) -> Self {
        Self {
            source_host: field(row, &["Source_Host", "Master_Host"]),
            io_running: field(row, &["Replica_IO_Running", "Slave_IO_Running"]),
            sql_running: field(row, &["Replica_SQL_Running", "Slave_SQL_Running"]),
            seconds_behind: field(row, &["Seconds_Behind_Source", "Seconds_Behind_Master"]),
            source_log_file: field(row, &["Source_Log_File", "Master_Log_File"]),
            relay_source_log_file: field(
                row,
                &["Relay_Source_Log_File", "Relay_Master_Log_File"],
            ),
            read_position: field(row, &["Read_Source_Log_Pos", "Read_Master_Log_Pos"]),
            exec_position: field(row, &["Exec_Source_Log_Pos", "Exec_Master_Log_Pos"]),
            retrieved_gtid_set: field(row, &["Retrieved_Gtid_Set"]),
            executed_gtid_set: field(row, &["Executed_Gtid_Set"]),
            last_io_errno: field(row, &["Last_IO_Errno"]),
            last_io_error: field(row, &["Last_IO_Error"]),
            last_sql_errno: field(row, &["Last_SQL_Errno"]),
            last_sql_error: field(row, &["Last_SQL_Error"]),
            last_errno: field(row, &["Last_Errno"]),
            last_error: field(row, &["Last_Error"]),
        }
    }

    /// All fields a configured replica always reports are present
    pub fn is_configured(&self) -> bool {
        self.source_host.is_some()
            && self.source_log_file.is_some()
            && self.exec_position.is_some()
            && self.retrieved_gtid_set.is_some()
            && self.executed_gtid_set.is_some()
    }

    pub fn threads_running(&self) -> bool {
        is_running(&self.io_running) && is_running(&self.sql_running)
    }

    pub fn lag_seconds(&self) -> Option<i64> {
        integer(&self.seconds_behind)
    }
}

/// Evaluate replica health as an ordered sequence of guards.
///
/// "Not configured" and "threads abnormal" are terminal. Lag, SQL thread progress and GTID
/// execution checks may all fire in one pass; relay log lag replaces the position check.
pub fn analyze(status: Option<&ReplicaStatus>) -> Findings {
    let mut findings = Findings::new();

    let status = match status {
        Some(status) if status.is_configured() => status,
        _ => {
            findings.insert(Finding::info(
                "replication_status",
                "Replication is not configured on this server",
            ));
            return findings;
        }
    };

    if !status.threads_running() {
        findings.insert(Finding::critical(
            "replication_error",
            format!(
                "Replica threads abnormal: IO thread {}, SQL thread {}",
                status.io_running.as_deref().unwrap_or("unknown"),
                status.sql_running.as_deref().unwrap_or("unknown"),
            ),
        ));
        if let Some(error) = thread_error(&status.last_io_errno, &status.last_io_error) {
            findings.insert(Finding::critical(
                "io_error",
                format!("IO thread {}", error),
            ));
        }
        if let Some(error) = thread_error(&status.last_sql_errno, &status.last_sql_error) {
            findings.insert(Finding::critical(
                "sql_error",
                format!("SQL thread {}", error),
            ));
        }
        return findings;
    }

    if let Some(lag) = status.lag_seconds() {
        findings.insert_opt(classify_finding(
            "replication_lag",
            lag as f64,
            REPLICATION_LAG_SECS,
            |_| format!("Replica is {} seconds behind the source", lag),
        ));
    }

    if status.relay_source_log_file != status.source_log_file {
        findings.insert(Finding::critical(
            "relay_log_behind",
            format!(
                "Relay log is behind: SQL thread is applying {} while the IO thread reads {}",
                status.relay_source_log_file.as_deref().unwrap_or("none"),
                status.source_log_file.as_deref().unwrap_or("none"),
            ),
        ));
    } else {
        let executed = integer(&status.exec_position).unwrap_or(0);
        let read = integer(&status.read_position).unwrap_or(0);
        if executed < read {
            findings.insert(Finding::warning(
                "sql_thread_behind",
                format!(
                    "SQL thread is behind the IO thread: executed position {} < read position {}",
                    executed, read
                ),
            ));
        }
    }

    let retrieved = status
        .retrieved_gtid_set
        .as_deref()
        .map(normalize_gtid_set)
        .unwrap_or_default();
    let executed = status
        .executed_gtid_set
        .as_deref()
        .map(normalize_gtid_set)
        .unwrap_or_default();
    if retrieved != executed {
        findings.insert(Finding::warning(
            "gtid_execution_lag",
            "Retrieved GTID set differs from executed GTID set: received transactions are not fully applied",
        ));
    }

    findings
}

/// Approximate GTID divergence: compares the number of comma-separated entries,
/// not the sets themselves
pub fn gtid_entry_divergence(retrieved: &str, executed: &str) -> Option<Finding> {
    if retrieved.trim().is_empty() || executed.trim().is_empty() {
        return None;
    }

    let retrieved_count = retrieved.split(',').count() as i64;
    let executed_count = executed.split(',').count() as i64;
    let diff = (retrieved_count - executed_count).abs();

    classify_finding("gtid_diff", diff as f64, GTID_ENTRY_DIVERGENCE, |_| {
        format!(
            "GTID entry count differs by {} (retrieved {}, executed {})",
            diff, retrieved_count, executed_count
        )
    })
}

/// Remediation notes when a replica thread stopped with a recorded error
fn repair_advice(status: &ReplicaStatus) -> Option<Finding> {
    if status.threads_running() {
        return None;
    }

    let details: Vec<String> = [
        ("IO thread", &status.last_io_errno, &status.last_io_error),
        ("SQL thread", &status.last_sql_errno, &status.last_sql_error),
        ("Last error", &status.last_errno, &status.last_error),
    ]
    .into_iter()
    .filter_map(|(label, errno, error)| {
        thread_error(errno, error).map(|e| format!("{} {}", label, e))
    })
    .collect();

    if details.is_empty() {
        return None;
    }

    Some(Finding::info(
        "repair_advice",
        format!(
            "{}. Suggested steps: 1. check network connectivity between source and replica; \
             2. check that source and replica configuration match; \
             3. check both error logs for related failures; \
             4. resolve the reported error code using the server documentation",
            details.join("; ")
        ),
    ))
}

/// Findings for the replica status report
pub fn report_findings(status: Option<&ReplicaStatus>) -> Findings {
    let mut findings = Findings::new();

    let Some(status) = status else {
        findings.insert(Finding::info(
            "replication_status",
            "Replication is not configured on this server",
        ));
        return findings;
    };

    findings.insert_opt(repair_advice(status));

    if let Some(lag) = status.lag_seconds() {
        findings.insert(Finding::info(
            "replication_lag_notice",
            format!("Replica lag: {} seconds", lag),
        ));
    }

    if let (Some(retrieved), Some(executed)) =
        (&status.retrieved_gtid_set, &status.executed_gtid_set)
    {
        findings.insert_opt(gtid_entry_divergence(retrieved, executed));
    }

    findings
}

/// First row of the replica status, `None` when the server is not a replica
pub async fn fetch_status_row(
    executor: &mut dyn QueryExecutor,
) -> Result<Option<Row>, DiagnosticError> {
    let rows = match executor.fetch_rows(REPLICA_STATUS_QUERY).await {
        Ok(rows) => rows,
        Err(DiagnosticError::UnsupportedStatement(e)) => {
            tracing::debug!(
                "{} not understood ({}), using {}",
                REPLICA_STATUS_QUERY,
                e,
                LEGACY_REPLICA_STATUS_QUERY
            );
            executor.fetch_rows(LEGACY_REPLICA_STATUS_QUERY).await?
        }
        Err(e) => return Err(e),
    };
    Ok(rows.into_iter().next())
}

pub async fn fetch_status(
    executor: &mut dyn QueryExecutor,
) -> Result<Option<ReplicaStatus>, DiagnosticError> {
    Ok(fetch_status_row(executor)
        .await?
        .map(|row| ReplicaStatus::from_row(&row)))
}

/// Raw status fields plus report findings
pub async fn status_report(
    executor: &mut dyn QueryExecutor,
) -> Result<(Findings, Vec<Row>), DiagnosticError> {
    let row = fetch_status_row(executor).await?;
    let status = row.as_ref().map(ReplicaStatus::from_row);
    let findings = report_findings(status.as_ref());

    // Keep NULL columns out of the raw listing
    let rows = row
        .map(|r| {
            r.into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect::<Row>()
        })
        .into_iter()
        .collect();

    Ok((findings, rows))
}

#[cfg(test)]
mod tests {
    use super::super::test_providers::*;
    use super::super::Severity;
    use super::*;
    use serde_json::{json, Value};

    fn healthy() -> ReplicaStatus {
        ReplicaStatus {
            source_host: Some("10.0.0.1".to_string()),
            io_running: Some("Yes".to_string()),
            sql_running: Some("Yes".to_string()),
            seconds_behind: Some("0".to_string()),
            source_log_file: Some("binlog.000042".to_string()),
            relay_source_log_file: Some("binlog.000042".to_string()),
            read_position: Some("1200".to_string()),
            exec_position: Some("1200".to_string()),
            retrieved_gtid_set: Some("3e11fa47-71ca-11e1-9e33-c80aa9429562:1-77".to_string()),
            executed_gtid_set: Some("3e11fa47-71ca-11e1-9e33-c80aa9429562:1-77".to_string()),
            last_io_errno: Some("0".to_string()),
            last_io_error: Some(String::new()),
            last_sql_errno: Some("0".to_string()),
            last_sql_error: Some(String::new()),
            last_errno: Some("0".to_string()),
            last_error: Some(String::new()),
        }
    }

    #[test]
    fn test_healthy_replica_has_no_findings() {
        assert!(analyze(Some(&healthy())).is_empty());
    }

    #[test]
    fn test_no_row_means_not_configured() {
        let findings = analyze(None);
        assert_eq!(findings.keys(), vec!["replication_status"]);
        assert_eq!(findings.get("replication_status").unwrap().severity, Severity::Info);
    }

    #[test]
    fn test_missing_required_field_means_not_configured() {
        let status = ReplicaStatus {
            executed_gtid_set: None,
            seconds_behind: Some("500".to_string()),
            ..healthy()
        };
        assert_eq!(analyze(Some(&status)).keys(), vec!["replication_status"]);
    }

    #[test]
    fn test_io_thread_down_is_terminal() {
        let status = ReplicaStatus {
            io_running: Some("Connecting".to_string()),
            seconds_behind: Some("500".to_string()),
            retrieved_gtid_set: Some("uuid:1-100".to_string()),
            ..healthy()
        };
        let findings = analyze(Some(&status));

        assert_eq!(findings.len(), 1);
        let finding = findings.get("replication_error").unwrap();
        assert_eq!(finding.severity, Severity::Critical);
        assert!(finding.message.contains("Connecting"));
    }

    #[test]
    fn test_thread_errors_are_attached() {
        let status = ReplicaStatus {
            io_running: Some("No".to_string()),
            sql_running: Some("No".to_string()),
            last_io_errno: Some("2003".to_string()),
            last_io_error: Some("Can't connect to source".to_string()),
            last_sql_errno: Some("1062".to_string()),
            last_sql_error: Some("Duplicate entry".to_string()),
            ..healthy()
        };
        let findings = analyze(Some(&status));

        assert_eq!(
            findings.keys(),
            vec!["replication_error", "io_error", "sql_error"]
        );
        assert!(findings.get("io_error").unwrap().message.contains("2003"));
        assert!(findings
            .get("sql_error")
            .unwrap()
            .message
            .contains("Duplicate entry"));
    }

    #[test]
    fn test_lag_150_is_single_critical() {
        let status = ReplicaStatus {
            seconds_behind: Some("150".to_string()),
            ..healthy()
        };
        let findings = analyze(Some(&status));

        assert_eq!(findings.len(), 1);
        let lag = findings.get("replication_lag").unwrap();
        assert_eq!(lag.severity, Severity::Critical);
        assert!(lag.message.contains("150"));
    }

    #[test]
    fn test_null_lag_is_skipped() {
        let status = ReplicaStatus {
            seconds_behind: None,
            ..healthy()
        };
        assert!(analyze(Some(&status)).is_empty());
    }

    #[test]
    fn test_relay_log_behind_replaces_position_check() {
        let status = ReplicaStatus {
            relay_source_log_file: Some("binlog.000040".to_string()),
            exec_position: Some("10".to_string()),
            ..healthy()
        };
        let findings = analyze(Some(&status));
        assert_eq!(findings.keys(), vec!["relay_log_behind"]);
        assert_eq!(
            findings.get("relay_log_behind").unwrap().severity,
            Severity::Critical
        );
    }

    #[test]
    fn test_non_terminal_findings_accumulate() {
        let status = ReplicaStatus {
            seconds_behind: Some("3".to_string()),
            exec_position: Some("900".to_string()),
            retrieved_gtid_set: Some("uuid:1-80".to_string()),
            executed_gtid_set: Some("uuid:1-77".to_string()),
            ..healthy()
        };
        let findings = analyze(Some(&status));
        assert_eq!(
            findings.keys(),
            vec!["replication_lag", "sql_thread_behind", "gtid_execution_lag"]
        );
        assert_eq!(
            findings.get("replication_lag").unwrap().severity,
            Severity::Warning
        );
    }

    #[test]
    fn test_gtid_whitespace_is_ignored() {
        let status = ReplicaStatus {
            retrieved_gtid_set: Some("a:1-5,\nb:1-3".to_string()),
            executed_gtid_set: Some("a:1-5,b:1-3".to_string()),
            ..healthy()
        };
        assert!(analyze(Some(&status)).is_empty());
    }

    #[test]
    fn test_idempotent() {
        let status = ReplicaStatus {
            seconds_behind: Some("42".to_string()),
            ..healthy()
        };
        assert_eq!(analyze(Some(&status)), analyze(Some(&status)));
    }

    #[test]
    fn test_from_row_accepts_legacy_and_current_names() {
        let legacy = row(&[
            ("Slave_IO_Running", json!("Yes")),
            ("Master_Log_File", json!("binlog.000001")),
            ("Seconds_Behind_Master", Value::Null),
        ]);
        let current = row(&[
            ("Replica_IO_Running", json!("Yes")),
            ("Source_Log_File", json!("binlog.000001")),
            ("Seconds_Behind_Source", json!(7)),
        ]);

        let legacy = ReplicaStatus::from_row(&legacy);
        let current = ReplicaStatus::from_row(&current);
        assert_eq!(legacy.io_running, current.io_running);
        assert_eq!(legacy.source_log_file, current.source_log_file);
        assert_eq!(legacy.lag_seconds(), None);
        assert_eq!(current.lag_seconds(), Some(7));
    }

    #[test]
    fn test_gtid_entry_divergence() {
        assert!(gtid_entry_divergence("a:1-5,b:1-3", "a:1-5,b:1-2").is_none());
        assert!(gtid_entry_divergence("", "a:1").is_none());

        let warning = gtid_entry_divergence("a:1,b:1,c:1", "a:1").unwrap();
        assert_eq!(warning.key, "gtid_diff");
        assert_eq!(warning.severity, Severity::Warning);

        let many: Vec<String> = (0..102).map(|i| format!("uuid{}:1", i)).collect();
        let critical = gtid_entry_divergence(&many.join(","), "a:1").unwrap();
        assert_eq!(critical.severity, Severity::Critical);
    }

    #[test]
    fn test_report_includes_repair_advice() {
        let status = ReplicaStatus {
            sql_running: Some("No".to_string()),
            last_sql_errno: Some("1032".to_string()),
            last_sql_error: Some("Can't find record".to_string()),
            seconds_behind: None,
            ..healthy()
        };
        let findings = report_findings(Some(&status));
        let advice = findings.get("repair_advice").unwrap();
        assert!(advice.message.contains("1032"));
        assert!(advice.message.contains("Suggested steps"));
        assert!(!findings.contains_key("replication_lag_notice"));
    }

    #[tokio::test]
    async fn test_fetch_status_falls_back_to_legacy_statement() {
        let mut executor = MockExecutor::new()
            .with_unsupported("SHOW REPLICA STATUS")
            .with_rows(
                "SHOW SLAVE STATUS",
                vec![row(&[
                    ("Master_Host", json!("10.0.0.1")),
                    ("Slave_IO_Running", json!("Yes")),
                    ("Slave_SQL_Running", json!("Yes")),
                    ("Seconds_Behind_Master", json!("0")),
                    ("Master_Log_File", json!("binlog.000003")),
                    ("Relay_Master_Log_File", json!("binlog.000003")),
                    ("Read_Master_Log_Pos", json!("100")),
                    ("Exec_Master_Log_Pos", json!("100")),
                    ("Retrieved_Gtid_Set", json!("")),
                    ("Executed_Gtid_Set", json!("")),
                ])],
            );

        let status = fetch_status(&mut executor).await.unwrap().unwrap();
        assert!(status.is_configured());
        assert!(analyze(Some(&status)).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_status_does_not_repeat_on_permission_error() {
        let mut executor = MockExecutor::new()
            .with_failure(
                "SHOW REPLICA STATUS",
                "Access denied; you need the REPLICATION CLIENT privilege",
            )
            .with_rows("SHOW SLAVE STATUS", Vec::new());

        let result = fetch_status(&mut executor).await;
        assert!(matches!(result, Err(DiagnosticError::QueryFailed(_))));
        assert_eq!(
            *executor.executed.lock().unwrap(),
            vec!["SHOW REPLICA STATUS".to_string()]
        );
    }

    #[test]
    fn test_repair_advice_needs_error_code() {
        let status = ReplicaStatus {
            sql_running: Some("No".to_string()),
            last_sql_errno: Some("0".to_string()),
            last_sql_error: Some("stale message".to_string()),
            last_io_errno: None,
            last_io_error: Some("no code recorded".to_string()),
            ..healthy()
        };
        let findings = report_findings(Some(&status));
        assert!(!findings.contains_key("repair_advice"));

        let analyzed = analyze(Some(&status));
        assert_eq!(analyzed.keys(), vec!["replication_error"]);
    }

    #[tokio::test]
    async fn test_status_report_drops_null_columns() {
        let mut executor = MockExecutor::new().with_rows(
            "SHOW REPLICA STATUS",
            vec![row(&[
                ("Source_Host", json!("10.0.0.1")),
                ("Seconds_Behind_Source", Value::Null),
            ])],
        );
        let (_, rows) = status_report(&mut executor).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains_key("Source_Host"));
        assert!(!rows[0].contains_key("Seconds_Behind_Source"));
    }
}
