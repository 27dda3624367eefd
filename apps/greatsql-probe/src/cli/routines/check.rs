//! # Check Routine
//!
//! Runs diagnostic operations from the command line and renders their reports.
//!
//! - `check <OPERATION>`: one operation
//! - `sweep`: every operation except the benchmark, concurrently
//! - `operations`: the operation catalogue
//!
//! Reports print as `comfy-table` tables, or as pretty JSON with `--json`.
//! Ctrl-C cancels a running operation at its next wait point.

use std::sync::Arc;

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde_json::Value;
use tracing::{debug, info};

use crate::cli::display::status::{format_severity, format_success, STATUS_ERROR};
use crate::cli::display::Message;
use crate::cli::routines::{RoutineFailure, RoutineSuccess};
use crate::infrastructure::mysql::diagnostics::{
    run_operation, run_sweep, DiagnosticContext, DiagnosticOperation, DiagnosticReport,
    DiagnosticSettings, Row, SessionProvider, Severity,
};

fn failure(action: &str, details: String) -> RoutineFailure {
    RoutineFailure::error(Message {
        action: action.to_string(),
        details,
    })
}

fn parse_severity(action: &str, severity: &str) -> Result<Severity, RoutineFailure> {
    severity
        .parse::<Severity>()
        .map_err(|e| failure(action, e.to_string()))
}

/// Context whose token fires on Ctrl-C
fn interruptible_context(settings: DiagnosticSettings) -> DiagnosticContext {
    let context = DiagnosticContext::new(settings);
    let cancel = context.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling diagnostics");
            cancel.cancel();
        }
    });
    context
}

fn to_json<T: serde::Serialize>(action: &str, value: &T) -> Result<String, RoutineFailure> {
    serde_json::to_string_pretty(value)
        .map_err(|e| failure(action, format!("Failed to format output as JSON: {}", e)))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn findings_table(report: &DiagnosticReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Severity", "Check", "Message"]);

    for finding in &report.findings {
        let severity = if finding.failed {
            format!("{} check failed", STATUS_ERROR)
        } else {
            format_severity(finding.severity)
        };
        table.add_row(vec![severity, finding.key.clone(), finding.message.clone()]);
    }

    table
}

fn rows_table(rows: &[Row]) -> Option<Table> {
    let first = rows.first()?;
    let headers: Vec<String> = first.keys().cloned().collect();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.clone());

    for row in rows {
        table.add_row(
            headers
                .iter()
                .map(|h| row.get(h).map(cell_text).unwrap_or_default())
                .collect::<Vec<_>>(),
        );
    }

    Some(table)
}

/// Human readable report; `-v` adds raw rows and metrics
fn render_report(report: &DiagnosticReport, verbosity: u8) -> String {
    let mut output = String::new();

    if report.findings.is_empty() {
        output.push_str(&format_success(&report.operation, "no findings"));
        output.push('\n');
    } else {
        output.push_str(&format!("{}\n", findings_table(report)));
    }

    for (name, value) in &report.metrics {
        output.push_str(&format!("{}: {}\n", name, cell_text(value)));
    }

    if verbosity >= 1 {
        if let Some(table) = rows_table(&report.rows) {
            output.push_str(&format!("{}\n", table));
        }
    }

    output
}

fn summary_line(reports: &[DiagnosticReport]) -> String {
    let count = |severity: Severity| -> usize {
        reports
            .iter()
            .map(|r| *r.summary.by_severity.get(severity.as_str()).unwrap_or(&0))
            .sum()
    };
    let failed: usize = reports.iter().map(|r| r.summary.failed_checks).sum();

    format!(
        "{} critical, {} warning, {} info, {} failed checks",
        count(Severity::Critical),
        count(Severity::Warning),
        count(Severity::Info),
        failed
    )
}

pub async fn check_operation(
    provider: Arc<dyn SessionProvider>,
    settings: DiagnosticSettings,
    operation: &str,
    severity: &str,
    json_output: bool,
    verbosity: u8,
) -> Result<RoutineSuccess, RoutineFailure> {
    let operation = operation
        .parse::<DiagnosticOperation>()
        .map_err(|e| failure("Check", e.to_string()))?;
    let severity = parse_severity("Check", severity)?;
    debug!("Parsed operation: {}, severity: {:?}", operation, severity);

    let context = interruptible_context(settings);
    let report = run_operation(operation, provider.as_ref(), &context)
        .await
        .map_err(|e| failure("Check", format!("{} failed: {}", operation, e)))?
        .filter_severity(severity);

    if json_output {
        println!("{}", to_json("Check", &report)?);
        return Ok(RoutineSuccess::silent());
    }

    print!("{}", render_report(&report, verbosity));
    let summary = summary_line(std::slice::from_ref(&report));

    Ok(RoutineSuccess::success(Message {
        action: "Check".to_string(),
        details: format!("{}: {}", operation, summary),
    }))
}

pub async fn sweep(
    provider: Arc<dyn SessionProvider>,
    settings: DiagnosticSettings,
    severity: &str,
    json_output: bool,
    verbosity: u8,
) -> Result<RoutineSuccess, RoutineFailure> {
    let severity = parse_severity("Sweep", severity)?;

    let context = interruptible_context(settings);
    let reports: Vec<DiagnosticReport> = run_sweep(provider, context)
        .await
        .into_iter()
        .map(|report| report.filter_severity(severity))
        .collect();

    info!("Sweep complete. Ran {} operations.", reports.len());

    if json_output {
        println!("{}", to_json("Sweep", &reports)?);
        return Ok(RoutineSuccess::silent());
    }

    for report in &reports {
        println!("── {} ──", report.operation);
        print!("{}", render_report(report, verbosity));
        println!();
    }

    Ok(RoutineSuccess::success(Message {
        action: "Sweep".to_string(),
        details: format!("{} operations: {}", reports.len(), summary_line(&reports)),
    }))
}

fn operations_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Operation", "Description", "In sweep"]);

    for operation in DiagnosticOperation::ALL {
        table.add_row(vec![
            operation.name().to_string(),
            operation.description().to_string(),
            if operation.is_benchmark() { "no" } else { "yes" }.to_string(),
        ]);
    }

    table
}

pub fn list_operations(json_output: bool) -> Result<RoutineSuccess, RoutineFailure> {
    if json_output {
        let catalogue: Vec<Value> = DiagnosticOperation::ALL
            .iter()
            .map(|op| {
                serde_json::json!({
                    "name": op.name(),
                    "description": op.description(),
                    "inSweep": !op.is_benchmark(),
                })
            })
            .collect();
        println!("{}", to_json("Operations", &catalogue)?);
        return Ok(RoutineSuccess::silent());
    }

    println!("{}", operations_table());
    Ok(RoutineSuccess::success(Message {
        action: "Operations".to_string(),
        details: format!("{} operations available", DiagnosticOperation::ALL.len()),
    }))
}
