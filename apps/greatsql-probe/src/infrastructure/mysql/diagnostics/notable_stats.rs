//! Notable statistics sweep: risky thread states, global status growth and undo backlog.
//!
//! Each of the three sub-checks runs on its own; a failing one is recorded as
//! `<check>_error` and the remaining checks still report.

use super::sample::{self, MetricSample};
use super::snapshot::{column_i64, column_str, MetricFilter, SnapshotView};
use super::thresholds::{
    classify_finding, RANDOM_READ_RATIO, ROW_LOCK_WAITS, STATUS_COUNTER_DELTA, UNDO_LOG_BACKLOG,
};
use super::{DiagnosticContext, DiagnosticError, Finding, Findings, QueryExecutor, Row};

const PROCESSLIST_QUERY: &str =
    "SELECT ID, USER, HOST, DB, COMMAND, TIME, STATE FROM performance_schema.processlist";

const UNDO_HISTORY_QUERY: &str =
    "SELECT NAME, COUNT FROM information_schema.INNODB_METRICS WHERE NAME = 'trx_rseg_history_len'";

/// State fragments that point at an expensive or blocked statement
const RISKY_THREAD_STATES: &[&str] = &[
    "converting HEAP to ondisk",
    "copy to tmp table",
    "Copying to group table",
    "Copying to tmp table",
    "Creating sort index",
    "Creating tmp table",
    "Rolling back",
    "Sending data",
    "Sorting result",
];

const WAITING_STATE: &str = "Waiting for";
const COORDINATOR_WAIT_STATE: &str = "Waiting for an event from Coordinator";

/// Cumulative counters whose growth over the interval is classified directly
pub const GROWTH_COUNTERS: &[&str] = &[
    "Created_tmp_disk_tables",
    "Innodb_buffer_pool_wait_free",
    "Innodb_log_waits",
    "Select_full_join",
    "Select_scan",
    "Sort_merge_passes",
];

const ROW_LOCK_GAUGE: &str = "Innodb_row_lock_current_waits";
const RANDOM_READ_COUNTERS: &[&str] = &["Handler_read_rnd", "Handler_read_rnd_next"];
const INDEXED_READ_COUNTERS: &[&str] = &[
    "Handler_read_first",
    "Handler_read_key",
    "Handler_read_last",
    "Handler_read_next",
    "Handler_read_prev",
];

pub fn is_risky_state(state: &str) -> bool {
    RISKY_THREAD_STATES.iter().any(|risky| state.contains(risky))
        || (state.contains(WAITING_STATE) && !state.contains(COORDINATOR_WAIT_STATE))
}

/// One finding for the thread states; the last risky thread seen wins
pub fn analyze_thread_states(rows: &[Row]) -> Findings {
    let mut findings = Findings::new();

    for row in rows {
        let Some(state) = column_str(row, "STATE") else {
            continue;
        };
        if is_risky_state(&state) {
            let thread = column_str(row, "ID").unwrap_or_else(|| "?".to_string());
            findings.insert(Finding::critical(
                "thread_state",
                format!("Thread {} is in a risky state: {}", thread, state),
            ));
        }
    }

    findings
}

fn status_filter() -> MetricFilter {
    let mut names: Vec<&str> = GROWTH_COUNTERS.to_vec();
    names.push(ROW_LOCK_GAUGE);
    names.extend_from_slice(RANDOM_READ_COUNTERS);
    names.extend_from_slice(INDEXED_READ_COUNTERS);
    MetricFilter::names(&names)
}

/// Counter growth, current row lock waits and the random read ratio
pub fn analyze_status_sample(sample: &MetricSample) -> Findings {
    let mut findings = Findings::new();
    let secs = sample.interval.as_secs();

    for counter in GROWTH_COUNTERS {
        let delta = sample.delta(counter);
        findings.insert_opt(classify_finding(
            &counter.to_ascii_lowercase(),
            delta as f64,
            STATUS_COUNTER_DELTA,
            |_| {
                format!(
                    "{} grew by {} in {}s ({:.1}/s)",
                    counter,
                    delta,
                    secs,
                    sample.rate(counter)
                )
            },
        ));
    }

    let waits = sample.second.integer_or_zero(ROW_LOCK_GAUGE);
    findings.insert_opt(classify_finding(
        "row_lock_wait",
        waits as f64,
        ROW_LOCK_WAITS,
        |_| format!("{} transactions are waiting for InnoDB row locks", waits),
    ));

    let ratio = sample.ratio(RANDOM_READ_COUNTERS, INDEXED_READ_COUNTERS);
    findings.insert_opt(classify_finding(
        "handler_read_rnd_ratio",
        ratio,
        RANDOM_READ_RATIO,
        |_| {
            format!(
                "Handler_read_rnd + Handler_read_rnd_next make up {:.1}% of indexed reads",
                ratio * 100.0
            )
        },
    ));

    findings
}

pub fn analyze_undo_history(history_length: i64) -> Option<Finding> {
    classify_finding(
        "undo_log_purge",
        history_length as f64,
        UNDO_LOG_BACKLOG,
        |_| {
            format!(
                "{} undo log records are waiting to be purged",
                history_length
            )
        },
    )
}

async fn check_thread_states(executor: &mut dyn QueryExecutor) -> Result<Findings, DiagnosticError> {
    let rows = executor.fetch_rows(PROCESSLIST_QUERY).await?;
    Ok(analyze_thread_states(&rows))
}

async fn check_global_status(
    executor: &mut dyn QueryExecutor,
    context: &DiagnosticContext,
) -> Result<Findings, DiagnosticError> {
    let filter = status_filter();
    let sample = sample::sample(
        executor,
        SnapshotView::GlobalStatus,
        Some(&filter),
        context.settings.sample_interval(),
        &context.cancel,
    )
    .await?;
    Ok(analyze_status_sample(&sample))
}

async fn check_undo_history(executor: &mut dyn QueryExecutor) -> Result<Findings, DiagnosticError> {
    let rows = executor.fetch_rows(UNDO_HISTORY_QUERY).await?;
    let history_length = rows
        .first()
        .and_then(|row| column_i64(row, "COUNT"))
        .unwrap_or(0);
    Ok(analyze_undo_history(history_length).into_iter().collect())
}

fn record(findings: &mut Findings, check: &str, result: Result<Findings, DiagnosticError>) {
    match result {
        Ok(found) => findings.merge(found),
        Err(e) => {
            tracing::warn!("Notable stats check {} failed: {}", check, e);
            findings.insert(Finding::check_failed(check, &e));
        }
    }
}

pub async fn track(executor: &mut dyn QueryExecutor, context: &DiagnosticContext) -> Findings {
    let mut findings = Findings::new();

    let threads = check_thread_states(executor).await;
    record(&mut findings, "thread_state", threads);

    let status = check_global_status(executor, context).await;
    record(&mut findings, "global_status", status);

    let undo = check_undo_history(executor).await;
    record(&mut findings, "undo_log_purge", undo);

    findings
}

#[cfg(test)]
mod tests {
    use super::super::test_providers::*;
    use super::super::Severity;
    use super::*;
    use crate::infrastructure::mysql::diagnostics::snapshot::MetricSnapshot;
    use serde_json::json;
    use std::time::Duration;

    fn sample_of(first: &[(&str, &str)], second: &[(&str, &str)]) -> MetricSample {
        MetricSample::new(
            MetricSnapshot::from_pairs(first.iter().copied()),
            MetricSnapshot::from_pairs(second.iter().copied()),
            Duration::from_secs(5),
        )
    }

    fn thread(id: i64, state: &str) -> Row {
        row(&[("ID", json!(id)), ("STATE", json!(state))])
    }

    #[test]
    fn test_risky_states() {
        assert!(is_risky_state("Creating sort index"));
        assert!(is_risky_state("Waiting for table metadata lock"));
        assert!(!is_risky_state("Waiting for an event from Coordinator"));
        assert!(!is_risky_state("executing"));
    }

    #[test]
    fn test_thread_state_last_write_wins() {
        let findings = analyze_thread_states(&[
            thread(1, "Sending data"),
            thread(2, "starting"),
            thread(3, "Waiting for table metadata lock"),
        ]);
        assert_eq!(findings.len(), 1);
        let finding = findings.get("thread_state").unwrap();
        assert_eq!(finding.severity, Severity::Critical);
        assert!(finding.message.contains("metadata lock"));
    }

    #[test]
    fn test_counter_growth() {
        let sample = sample_of(
            &[("Select_scan", "100"), ("Sort_merge_passes", "10")],
            &[("Select_scan", "130"), ("Sort_merge_passes", "16")],
        );
        let findings = analyze_status_sample(&sample);

        assert_eq!(findings.keys(), vec!["select_scan", "sort_merge_passes"]);
        assert_eq!(
            findings.get("select_scan").unwrap().severity,
            Severity::Critical
        );
        assert_eq!(
            findings.get("sort_merge_passes").unwrap().severity,
            Severity::Warning
        );
        assert_eq!(
            findings.get("select_scan").unwrap().message,
            "Select_scan grew by 30 in 5s (6.0/s)"
        );
    }

    #[test]
    fn test_counter_reset_is_silent() {
        let sample = sample_of(&[("Select_scan", "500")], &[("Select_scan", "20")]);
        assert!(analyze_status_sample(&sample).is_empty());
    }

    #[test]
    fn test_row_lock_wait_uses_current_gauge() {
        let sample = sample_of(
            &[("Innodb_row_lock_current_waits", "12")],
            &[("Innodb_row_lock_current_waits", "12")],
        );
        let findings = analyze_status_sample(&sample);
        assert_eq!(
            findings.get("row_lock_wait").unwrap().severity,
            Severity::Critical
        );
    }

    #[test]
    fn test_random_read_ratio() {
        let sample = sample_of(
            &[("Handler_read_rnd_next", "0"), ("Handler_read_key", "0")],
            &[("Handler_read_rnd_next", "30"), ("Handler_read_key", "100")],
        );
        let findings = analyze_status_sample(&sample);
        let ratio = findings.get("handler_read_rnd_ratio").unwrap();
        assert_eq!(ratio.severity, Severity::Warning);
        assert!(ratio.message.contains("30.0%"));
    }

    #[test]
    fn test_identical_snapshots_have_no_ratio_finding() {
        let pairs = [("Handler_read_rnd", "900"), ("Handler_read_key", "100")];
        let findings = analyze_status_sample(&sample_of(&pairs, &pairs));
        assert!(!findings.contains_key("handler_read_rnd_ratio"));
    }

    #[test]
    fn test_undo_history() {
        assert_eq!(
            analyze_undo_history(6000).unwrap().severity,
            Severity::Critical
        );
        assert_eq!(
            analyze_undo_history(1500).unwrap().severity,
            Severity::Warning
        );
        assert!(analyze_undo_history(1000).is_none());
    }

    #[tokio::test]
    async fn test_track_combines_sub_checks() {
        let mut executor = MockExecutor::new()
            .with_rows("processlist", vec![thread(7, "Creating tmp table")])
            .with_sequence(
                "global_status",
                vec![
                    variable_rows(&[("Created_tmp_disk_tables", "0")]),
                    variable_rows(&[("Created_tmp_disk_tables", "8")]),
                ],
            )
            .with_rows(
                "INNODB_METRICS",
                vec![row(&[
                    ("NAME", json!("trx_rseg_history_len")),
                    ("COUNT", json!("7000")),
                ])],
            );

        let findings = track(&mut executor, &fast_context()).await;
        assert_eq!(
            findings.keys(),
            vec!["thread_state", "created_tmp_disk_tables", "undo_log_purge"]
        );
    }

    #[tokio::test]
    async fn test_track_continues_after_failure() {
        let mut executor = MockExecutor::new()
            .with_failure("processlist", "SELECT command denied")
            .with_failure("global_status", "SELECT command denied");

        let findings = track(&mut executor, &fast_context()).await;
        assert_eq!(
            findings.keys(),
            vec!["thread_state_error", "global_status_error"]
        );
        assert!(findings.iter().all(|f| f.failed));
    }

    #[tokio::test]
    async fn test_track_cancelled_during_sample() {
        let mut executor = MockExecutor::new();
        let context = DiagnosticContext::default();
        context.cancel.cancel();

        let findings = track(&mut executor, &context).await;
        assert!(findings.get("global_status_error").unwrap().failed);
    }
}
