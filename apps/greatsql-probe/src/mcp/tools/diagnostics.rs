//! # Diagnostic Tools
//!
//! One MCP tool per [`DiagnosticOperation`]. The tools take no arguments and return the
//! serialized [`DiagnosticReport`](crate::infrastructure::mysql::diagnostics::DiagnosticReport).

use rmcp::model::{CallToolResult, Tool};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{build_tool, create_error_result, create_success_result};
use crate::infrastructure::mysql::diagnostics::{
    run_operation, DiagnosticContext, DiagnosticOperation, DiagnosticSettings, SessionProvider,
};

fn title(operation: DiagnosticOperation) -> &'static str {
    match operation {
        DiagnosticOperation::TrackNotableStats => "Track Notable Stats",
        DiagnosticOperation::CheckClusterStatus => "Check MGR Status",
        DiagnosticOperation::FindAbnormalMemory => "Find Abnormal Memory Usage",
        DiagnosticOperation::FindImproperVariables => "Find Improper Variables",
        DiagnosticOperation::MonitorReplicationLag => "Monitor Replication Lag",
        DiagnosticOperation::ReplicaStatus => "Get Replica Status",
        DiagnosticOperation::CheckCriticalTransactions => "Check Critical Transactions",
        DiagnosticOperation::AverageResponseTime => "Average SQL Response Time",
    }
}

pub fn tool_definition(operation: DiagnosticOperation) -> Tool {
    build_tool(
        operation.name(),
        title(operation),
        operation.description(),
        json!({
            "type": "object",
            "properties": {}
        }),
    )
}

pub fn tool_definitions() -> Vec<Tool> {
    DiagnosticOperation::ALL
        .iter()
        .copied()
        .map(tool_definition)
        .collect()
}

/// Run one operation; `cancel` fires when the client abandons the request
pub async fn handle_call(
    provider: &dyn SessionProvider,
    settings: &DiagnosticSettings,
    operation: DiagnosticOperation,
    cancel: CancellationToken,
) -> CallToolResult {
    info!("[MCP] Running diagnostic tool {}", operation);

    let context = DiagnosticContext {
        settings: settings.clone(),
        cancel,
    };

    match run_operation(operation, provider, &context).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => create_success_result(json),
            Err(e) => create_error_result(format!("Failed to serialize report: {}", e)),
        },
        Err(e) => create_error_result(format!("Diagnostic error: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::result_text;
    use super::*;
    use crate::infrastructure::mysql::diagnostics::test_providers::*;

    #[test]
    fn test_one_tool_per_operation() {
        let tools = tool_definitions();
        assert_eq!(tools.len(), DiagnosticOperation::ALL.len());
        assert_eq!(tools[0].name, "trackNotableStats");
        assert!(tools.iter().any(|t| t.name == "avgSQLRT"));
        assert!(tools.iter().all(|t| t.description.is_some()));
    }

    #[tokio::test]
    async fn test_handle_call_returns_report_json() {
        let provider = MockSessionProvider::new(MockExecutor::new());
        let result = handle_call(
            &provider,
            &fast_context().settings,
            DiagnosticOperation::CheckClusterStatus,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result.is_error, Some(false));
        let body: serde_json::Value = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(body["operation"], "checkMGRStatus");
        assert_eq!(body["findings"]["mgr_enabled"]["severity"], "info");
    }

    #[tokio::test]
    async fn test_handle_call_connection_failure() {
        let provider = MockSessionProvider::unreachable();
        let result = handle_call(
            &provider,
            &DiagnosticSettings::default(),
            DiagnosticOperation::FindImproperVariables,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result.is_error, Some(true));
        assert!(result_text(&result).starts_with("Diagnostic error: Failed to connect"));
    }
}
