//! # Schema Exploration Tools
//!
//! `listDatabases`, `listTables` and `getTableRowCount`: read-only lookups that need no SQL
//! from the caller.

use rmcp::model::{CallToolResult, Tool};
use serde_json::{json, Map, Value};

use super::{build_tool, create_error_result, create_success_result, required_str};
use crate::infrastructure::mysql::diagnostics::{DiagnosticError, SessionProvider};
use crate::infrastructure::mysql::queries;

pub const LIST_DATABASES: &str = "listDatabases";
pub const LIST_TABLES: &str = "listTables";
pub const TABLE_ROW_COUNT: &str = "getTableRowCount";

pub fn tool_definitions() -> Vec<Tool> {
    vec![
        build_tool(
            LIST_DATABASES,
            "List Databases",
            "List every database (schema) on the server with its default character set and collation.",
            json!({"type": "object", "properties": {}}),
        ),
        build_tool(
            LIST_TABLES,
            "List Tables",
            "List the tables of one database with estimated row counts, creation time and comments.",
            json!({
                "type": "object",
                "properties": {
                    "database": {"type": "string", "description": "Database (schema) name"}
                },
                "required": ["database"]
            }),
        ),
        build_tool(
            TABLE_ROW_COUNT,
            "Get Table Row Count",
            "Count the rows of one table exactly with COUNT(*).",
            json!({
                "type": "object",
                "properties": {
                    "database": {"type": "string", "description": "Database (schema) name"},
                    "tableName": {"type": "string", "description": "Table name"}
                },
                "required": ["database", "tableName"]
            }),
        ),
    ]
}

fn rows_result(rows: Result<Vec<Map<String, Value>>, DiagnosticError>) -> CallToolResult {
    match rows.and_then(|rows| {
        serde_json::to_string_pretty(&rows)
            .map_err(|e| DiagnosticError::MalformedInput(e.to_string()))
    }) {
        Ok(json) => create_success_result(json),
        Err(e) => create_error_result(format!("Query execution error: {}", e)),
    }
}

pub async fn list_databases(provider: &dyn SessionProvider) -> CallToolResult {
    let rows = match provider.open(None).await {
        Ok(mut session) => queries::list_databases(session.as_mut()).await,
        Err(e) => Err(e),
    };
    rows_result(rows)
}

pub async fn list_tables(
    provider: &dyn SessionProvider,
    arguments: Option<&Map<String, Value>>,
) -> CallToolResult {
    let database = match required_str(arguments, "database") {
        Ok(database) => database,
        Err(e) => return create_error_result(format!("Parameter validation error: {}", e)),
    };

    let rows = match provider.open(None).await {
        Ok(mut session) => queries::list_tables(session.as_mut(), database).await,
        Err(e) => Err(e),
    };
    rows_result(rows)
}

pub async fn table_row_count(
    provider: &dyn SessionProvider,
    arguments: Option<&Map<String, Value>>,
) -> CallToolResult {
    let (database, table) = match (
        required_str(arguments, "database"),
        required_str(arguments, "tableName"),
    ) {
        (Ok(database), Ok(table)) => (database, table),
        (Err(e), _) | (_, Err(e)) => {
            return create_error_result(format!("Parameter validation error: {}", e))
        }
    };

    let count = match provider.open(None).await {
        Ok(mut session) => queries::table_row_count(session.as_mut(), database, table).await,
        Err(e) => Err(e),
    };

    match count {
        Ok(count) => create_success_result(
            json!({"database": database, "table": table, "rowCount": count}).to_string(),
        ),
        Err(e) => create_error_result(format!("Query execution error: {}", e)),
    }
}
