//! Memory instruments holding more than 1 GiB, globally and per thread

use super::snapshot::{self, column_i64, column_str, MetricFilter, SnapshotView};
use super::thresholds::{classify_finding, HIGH_MEMORY_THREADS};
use super::{DiagnosticError, Finding, Findings, QueryExecutor, Row};

const GLOBAL_MEMORY_QUERY: &str = "SELECT EVENT_NAME, SUM_NUMBER_OF_BYTES_ALLOC \
     FROM performance_schema.memory_summary_global_by_event_name \
     WHERE SUM_NUMBER_OF_BYTES_ALLOC >= 1073741824 \
     ORDER BY SUM_NUMBER_OF_BYTES_ALLOC DESC";

const THREAD_MEMORY_QUERY: &str = "SELECT THREAD_ID, EVENT_NAME, SUM_NUMBER_OF_BYTES_ALLOC \
     FROM performance_schema.memory_summary_by_thread_by_event_name \
     WHERE SUM_NUMBER_OF_BYTES_ALLOC >= 1073741824 \
     ORDER BY SUM_NUMBER_OF_BYTES_ALLOC DESC";

const BUFFER_POOL_EVENT: &str = "memory/innodb/buf_buf_pool";
const HEAP_POINTERS_EVENT: &str = "memory/memory/HP_PTRS";
const SQL_EVENT_PREFIX: &str = "memory/sql/";
const INNODB_EVENT_PREFIX: &str = "memory/innodb/";

/// Allowed buffer pool allocation relative to `innodb_buffer_pool_size`
const BUFFER_POOL_OVERSHOOT: f64 = 1.2;

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEvent {
    pub thread_id: Option<i64>,
    pub event_name: String,
    pub bytes: i64,
}

impl MemoryEvent {
    pub fn from_row(row: &Row) -> Self {
        Self {
            thread_id: column_i64(row, "THREAD_ID"),
            event_name: column_str(row, "EVENT_NAME").unwrap_or_default(),
            bytes: column_i64(row, "SUM_NUMBER_OF_BYTES_ALLOC").unwrap_or(0),
        }
    }
}

/// Findings for server-wide instruments already known to exceed 1 GiB
pub fn analyze_global_events(events: &[MemoryEvent], buffer_pool_size: i64) -> Findings {
    let mut findings = Findings::new();

    for event in events {
        if event.event_name == BUFFER_POOL_EVENT {
            if event.bytes as f64 > buffer_pool_size as f64 * BUFFER_POOL_OVERSHOOT {
                findings.insert(Finding::critical(
                    "memory_innodb_buffer_pool",
                    format!(
                        "InnoDB buffer pool allocated {} bytes, above the configured {} bytes; possible memory leak",
                        event.bytes, buffer_pool_size
                    ),
                ));
            }
        } else if event.event_name.starts_with(SQL_EVENT_PREFIX)
            || event.event_name == HEAP_POINTERS_EVENT
        {
            findings.insert(Finding::warning(
                "memory_inefficient_sql",
                format!(
                    "Instrument {} allocated {} bytes; check slow queries for inefficient SQL",
                    event.event_name, event.bytes
                ),
            ));
        }
    }

    findings
}

/// Count per-thread InnoDB/SQL instruments above 1 GiB
pub fn analyze_thread_events(events: &[MemoryEvent]) -> Option<Finding> {
    let heavy = events
        .iter()
        .filter(|e| {
            e.event_name.starts_with(INNODB_EVENT_PREFIX) || e.event_name.starts_with(SQL_EVENT_PREFIX)
        })
        .count();

    classify_finding(
        "memory_high_threads",
        heavy as f64,
        HIGH_MEMORY_THREADS,
        |_| {
            format!(
                "{} threads each hold more than 1GB in one memory instrument; check slow queries",
                heavy
            )
        },
    )
}

async fn check_global(executor: &mut dyn QueryExecutor) -> Result<Findings, DiagnosticError> {
    let rows = executor.fetch_rows(GLOBAL_MEMORY_QUERY).await?;
    let events: Vec<MemoryEvent> = rows.iter().map(MemoryEvent::from_row).collect();

    let buffer_pool_size = if events.iter().any(|e| e.event_name == BUFFER_POOL_EVENT) {
        let filter = MetricFilter::names(&["innodb_buffer_pool_size"]);
        snapshot::read(executor, SnapshotView::GlobalVariables, Some(&filter))
            .await?
            .integer_or_zero("innodb_buffer_pool_size")
    } else {
        0
    };

    Ok(analyze_global_events(&events, buffer_pool_size))
}

async fn check_threads(executor: &mut dyn QueryExecutor) -> Result<Findings, DiagnosticError> {
    let rows = executor.fetch_rows(THREAD_MEMORY_QUERY).await?;
    let events: Vec<MemoryEvent> = rows.iter().map(MemoryEvent::from_row).collect();
    Ok(analyze_thread_events(&events).into_iter().collect())
}

pub async fn scan(executor: &mut dyn QueryExecutor) -> Findings {
    let mut findings = Findings::new();

    match check_global(executor).await {
        Ok(found) => findings.merge(found),
        Err(e) => {
            tracing::warn!("Global memory check failed: {}", e);
            findings.insert(Finding::check_failed("memory_global", &e));
        }
    }

    match check_threads(executor).await {
        Ok(found) => findings.merge(found),
        Err(e) => {
            tracing::warn!("Thread memory check failed: {}", e);
            findings.insert(Finding::check_failed("memory_thread", &e));
        }
    }

    findings
}
