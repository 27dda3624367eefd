//! Server variable audit against recommended production values
//!
//! Every rule reads the variable and status snapshots and adds findings keyed by the
//! variable it concerns. Rules are independent of each other; a rule whose inputs are
//! missing or non-numeric stays silent.

use super::snapshot::{self, MetricSnapshot, SnapshotView};
use super::{Finding, Findings, QueryExecutor, Severity};

const GIB: i64 = 1024 * 1024 * 1024;
const MIB: i64 = 1024 * 1024;

/// Fraction of a limit at which a resource counts as saturated
const SATURATION_RATIO: f64 = 0.8;
/// Fraction of the thread cache below which it counts as underused
const THREAD_CACHE_IDLE_RATIO: f64 = 0.2;
/// How many times the open count the opened counter must exceed to indicate churn
const CHURN_FACTOR: i64 = 10;

const MIN_REDO_BYTES: i64 = 2 * GIB;
const MIN_BUFFER_POOL_BYTES: i64 = 2 * GIB;
const MIN_LOG_BUFFER_BYTES: i64 = 32 * MIB;
const MIN_IO_CAPACITY: i64 = 10000;
const MAX_DISK_TMP_TABLES: i64 = 100;
const MAX_DISK_TMP_TABLE_RATIO: f64 = 0.1;
const MAX_LONG_QUERY_TIME_SECS: f64 = 1.0;

/// Variables that have one recommended value
struct RecommendedValue {
    variable: &'static str,
    recommended: &'static str,
    severity: Severity,
}

const RECOMMENDED_VALUES: &[RecommendedValue] = &[
    RecommendedValue {
        variable: "innodb_open_files",
        recommended: "65534",
        severity: Severity::Info,
    },
    RecommendedValue {
        variable: "innodb_flush_method",
        recommended: "O_DIRECT",
        severity: Severity::Info,
    },
    RecommendedValue {
        variable: "innodb_use_fdatasync",
        recommended: "ON",
        severity: Severity::Info,
    },
    RecommendedValue {
        variable: "innodb_adaptive_hash_index",
        recommended: "OFF",
        severity: Severity::Info,
    },
    RecommendedValue {
        variable: "innodb_doublewrite_pages",
        recommended: "128",
        severity: Severity::Info,
    },
    RecommendedValue {
        variable: "innodb_thread_concurrency",
        recommended: "0",
        severity: Severity::Warning,
    },
    RecommendedValue {
        variable: "binlog_format",
        recommended: "ROW",
        severity: Severity::Warning,
    },
];

/// Per-session buffers that should be at least 4 MiB
const SESSION_BUFFERS: &[&str] = &[
    "sort_buffer_size",
    "join_buffer_size",
    "read_rnd_buffer_size",
    "read_buffer_size",
];
const MIN_SESSION_BUFFER_BYTES: i64 = 4 * MIB;

/// The two snapshots every rule reads from
pub struct ConfigContext<'a> {
    pub variables: &'a MetricSnapshot,
    pub status: &'a MetricSnapshot,
}

type Rule = fn(&ConfigContext<'_>, &mut Findings);

const RULES: &[Rule] = &[
    check_max_connections,
    check_table_caches,
    check_thread_cache,
    check_tmp_tables,
    check_durability,
    check_redo_space,
    check_log_buffer,
    check_buffer_pool,
    check_session_buffers,
    check_io_capacity,
    check_recommended_values,
    check_parallel_replication,
    check_long_query_time,
];

fn check_max_connections(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    let (Some(limit), Some(connected)) = (
        ctx.variables.integer("max_connections"),
        ctx.status.integer("Threads_connected"),
    ) else {
        return;
    };

    if connected as f64 >= limit as f64 * SATURATION_RATIO {
        findings.insert(Finding::warning(
            "max_connections",
            format!(
                "Connected threads ({}) are close to max_connections ({}); consider raising max_connections",
                connected, limit
            ),
        ));
    }
}

fn check_cache_churn(
    ctx: &ConfigContext<'_>,
    findings: &mut Findings,
    variable: &str,
    open_counter: &str,
    opened_counter: &str,
) {
    let (Some(size), Some(open), Some(opened)) = (
        ctx.variables.integer(variable),
        ctx.status.integer(open_counter),
        ctx.status.integer(opened_counter),
    ) else {
        return;
    };

    if open as f64 >= size as f64 * SATURATION_RATIO && opened > open.saturating_mul(CHURN_FACTOR)
    {
        findings.insert(Finding::warning(
            variable,
            format!(
                "{} ({}) is close to {} ({}) and {} is high ({}); consider raising {}",
                open_counter, open, variable, size, opened_counter, opened, variable
            ),
        ));
    }
}

fn check_table_caches(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    check_cache_churn(ctx, findings, "table_open_cache", "Open_tables", "Opened_tables");
    check_cache_churn(
        ctx,
        findings,
        "table_definition_cache",
        "Open_table_definitions",
        "Opened_table_definitions",
    );
}

fn check_thread_cache(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    let (Some(size), Some(cached), Some(created)) = (
        ctx.variables.integer("thread_cache_size"),
        ctx.status.integer("Threads_cached"),
        ctx.status.integer("Threads_created"),
    ) else {
        return;
    };

    if cached as f64 <= size as f64 * THREAD_CACHE_IDLE_RATIO
        && created > cached.saturating_mul(CHURN_FACTOR)
    {
        findings.insert(Finding::warning(
            "thread_cache_size",
            format!(
                "Thread cache is underused ({}/{}) while Threads_created is high ({}); consider raising thread_cache_size",
                cached, size, created
            ),
        ));
    }
}

fn check_tmp_tables(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    let (Some(on_disk), Some(total)) = (
        ctx.status.integer("Created_tmp_disk_tables"),
        ctx.status.integer("Created_tmp_tables"),
    ) else {
        return;
    };

    if on_disk > MAX_DISK_TMP_TABLES || on_disk as f64 > total as f64 * MAX_DISK_TMP_TABLE_RATIO {
        findings.insert(Finding::warning(
            "tmp_table_size",
            format!(
                "{} temporary tables were created on disk; consider raising tmp_table_size and max_heap_table_size to at least 96MB",
                on_disk
            ),
        ));
    }
}

fn check_durability(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    if ctx.variables.text("sync_binlog").as_deref() == Some("0") {
        findings.insert(Finding::warning(
            "sync_binlog",
            "sync_binlog is 0; binary log events can be lost on power failure, set it to 1",
        ));
    }
    if ctx.variables.text("innodb_flush_log_at_trx_commit").as_deref() == Some("0") {
        findings.insert(Finding::warning(
            "innodb_flush_log_at_trx_commit",
            "innodb_flush_log_at_trx_commit is 0; committed transactions can be lost on power failure, set it to 1",
        ));
    }
}

fn check_redo_space(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    let vars = ctx.variables;
    let file_capacity = match (
        vars.integer("innodb_log_file_size"),
        vars.integer("innodb_log_files_in_group"),
    ) {
        (Some(size), Some(files)) => size.saturating_mul(files),
        _ => 0,
    };
    let redo_capacity = vars.integer("innodb_redo_log_capacity");
    if redo_capacity.is_none() && file_capacity == 0 {
        return;
    }
    let redo_capacity = redo_capacity.unwrap_or(0);

    if file_capacity < MIN_REDO_BYTES && redo_capacity < MIN_REDO_BYTES {
        findings.insert(Finding::warning(
            "innodb_redo_space",
            "InnoDB redo log space is below 2GB and may limit write throughput",
        ));
    }
}

fn check_minimum_bytes(
    ctx: &ConfigContext<'_>,
    findings: &mut Findings,
    variable: &str,
    minimum: i64,
    severity: Severity,
) {
    let Some(size) = ctx.variables.integer(variable) else {
        return;
    };
    if size < minimum {
        findings.insert(Finding::new(
            variable,
            severity,
            format!(
                "{} is {}MB; recommended at least {}",
                variable,
                size / MIB,
                format_bytes(minimum)
            ),
        ));
    }
}

fn check_log_buffer(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    check_minimum_bytes(
        ctx,
        findings,
        "innodb_log_buffer_size",
        MIN_LOG_BUFFER_BYTES,
        Severity::Info,
    );
}

fn check_buffer_pool(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    check_minimum_bytes(
        ctx,
        findings,
        "innodb_buffer_pool_size",
        MIN_BUFFER_POOL_BYTES,
        Severity::Warning,
    );
}

fn check_session_buffers(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    for variable in SESSION_BUFFERS {
        check_minimum_bytes(
            ctx,
            findings,
            variable,
            MIN_SESSION_BUFFER_BYTES,
            Severity::Info,
        );
    }
}

fn check_io_capacity(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    for variable in ["innodb_io_capacity", "innodb_io_capacity_max"] {
        if let Some(capacity) = ctx.variables.integer(variable) {
            if capacity < MIN_IO_CAPACITY {
                findings.insert(Finding::warning(
                    variable,
                    format!(
                        "{} is {}; recommended at least {}",
                        variable, capacity, MIN_IO_CAPACITY
                    ),
                ));
            }
        }
    }
}

fn check_recommended_values(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    for rule in RECOMMENDED_VALUES {
        let Some(live) = ctx.variables.text(rule.variable) else {
            continue;
        };
        if !live.trim().eq_ignore_ascii_case(rule.recommended) {
            findings.insert(Finding::new(
                rule.variable,
                rule.severity,
                format!(
                    "{} is set to {}; recommended {}",
                    rule.variable, live, rule.recommended
                ),
            ));
        }
    }
}

/// Only evaluated when the server exposes one of the parallel type variables
fn check_parallel_replication(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    let live = ctx
        .variables
        .text("replica_parallel_type")
        .or_else(|| ctx.variables.text("slave_parallel_type"));

    if let Some(live) = live {
        if !live.trim().eq_ignore_ascii_case("LOGICAL_CLOCK") {
            findings.insert(Finding::warning(
                "parallel_replication",
                format!(
                    "Parallel replication type is {}; recommended LOGICAL_CLOCK",
                    live
                ),
            ));
        }
    }
}

fn check_long_query_time(ctx: &ConfigContext<'_>, findings: &mut Findings) {
    if let Some(secs) = ctx.variables.float("long_query_time") {
        if secs > MAX_LONG_QUERY_TIME_SECS {
            findings.insert(Finding::info(
                "long_query_time",
                format!(
                    "long_query_time is {}s; recommended between 0.05 and 1.0",
                    secs
                ),
            ));
        }
    }
}

fn format_bytes(bytes: i64) -> String {
    if bytes >= GIB && bytes % GIB == 0 {
        format!("{}GB", bytes / GIB)
    } else {
        format!("{}MB", bytes / MIB)
    }
}

/// Run every rule over the two snapshots
pub fn audit(variables: &MetricSnapshot, status: &MetricSnapshot) -> Findings {
    let ctx = ConfigContext { variables, status };
    let mut findings = Findings::new();
    for rule in RULES {
        rule(&ctx, &mut findings);
    }
    findings
}

/// Read variables and status from the server and audit them.
///
/// A view that cannot be read becomes a `<view>_error` entry and the rules run
/// against an empty snapshot for it, so variable-only rules still report when the
/// status read fails and vice versa.
pub async fn audit_server(executor: &mut dyn QueryExecutor) -> Findings {
    let mut failures = Findings::new();
    let variables = read_or_record(
        executor,
        SnapshotView::GlobalVariables,
        "global_variables",
        &mut failures,
    )
    .await;
    let status =
        read_or_record(executor, SnapshotView::GlobalStatus, "global_status", &mut failures).await;
    tracing::debug!(
        "Auditing {} variables against {} status counters",
        variables.len(),
        status.len()
    );

    let mut findings = audit(&variables, &status);
    findings.merge(failures);
    findings
}

async fn read_or_record(
    executor: &mut dyn QueryExecutor,
    view: SnapshotView,
    check: &str,
    failures: &mut Findings,
) -> MetricSnapshot {
    match snapshot::read(executor, view, None).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!("Configuration audit could not read {}: {}", check, e);
            failures.insert(Finding::check_failed(check, &e));
            MetricSnapshot::default()
        }
    }
}
