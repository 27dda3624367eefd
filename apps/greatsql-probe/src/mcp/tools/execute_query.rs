//! # Execute Query Tool
//!
//! This module implements the MCP tool for executing read-only SQL queries
//! against one database of the server for data exploration and debugging.

use rmcp::model::{CallToolResult, Tool};
use serde_json::{json, Map, Value};
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use tracing::{debug, info};

use super::{build_tool, create_error_result, create_success_result, required_str};
use crate::infrastructure::mysql::diagnostics::{Row, SessionProvider};
use crate::infrastructure::mysql::errors::validate_mysql_identifier;

pub const TOOL_NAME: &str = "executeQuery";

// Constants for validation and limits
const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;
const MIN_LIMIT: u32 = 1;

/// Error types for query operations
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Failed to parse SQL: {0}")]
    ParseError(#[from] sqlparser::parser::ParserError),

    #[error("Empty query provided")]
    EmptyQuery,

    #[error("Multiple statements not allowed. Only one statement can be executed at a time.")]
    MultipleStatements,

    #[error("Write operation not allowed: {0}. Only read operations (SELECT, SHOW, DESCRIBE, EXPLAIN) are permitted.")]
    WriteOperation(&'static str),

    #[error("DDL operation not allowed: {0}. Only read operations (SELECT, SHOW, DESCRIBE, EXPLAIN) are permitted.")]
    DdlOperation(&'static str),

    #[error(
        "Unsupported statement type. Only SELECT, SHOW, DESCRIBE, and EXPLAIN queries are allowed."
    )]
    UnsupportedStatement,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Failed to execute query: {0}")]
    ExecutionError(String),

    #[error("Failed to format results: {0}")]
    FormattingError(String),
}

/// Parameters for the executeQuery tool
#[derive(Debug)]
struct ExecuteQueryParams {
    /// Schema the session is opened on
    database: String,
    query: String,
    /// Maximum number of rows to return
    limit: u32,
    /// Output format (json or table)
    format: String,
}

/// Analysis result for a SQL query
#[derive(Debug, PartialEq)]
struct QueryAnalysis {
    /// Whether a LIMIT can be appended to the statement
    supports_limit: bool,
    /// Whether the query already carries its own LIMIT
    has_limit: bool,
}

/// Validates that a SQL query is a single read-only statement.
///
/// MySQL only accepts LIMIT on query expressions, so SHOW / DESCRIBE / EXPLAIN are
/// capped after the rows come back instead.
fn validate_and_analyze_query(sql: &str) -> Result<QueryAnalysis, QueryError> {
    let dialect = MySqlDialect {};
    let ast = Parser::parse_sql(&dialect, sql)?;

    if ast.is_empty() {
        return Err(QueryError::EmptyQuery);
    }

    if ast.len() > 1 {
        return Err(QueryError::MultipleStatements);
    }

    match &ast[0] {
        Statement::Query(query) => Ok(QueryAnalysis {
            // LIMIT must precede a locking clause, so those run as written
            supports_limit: query.locks.is_empty(),
            has_limit: query.limit_clause.is_some(),
        }),

        Statement::ShowTables { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCreate { .. }
        | Statement::ExplainTable { .. }
        | Statement::Explain { .. } => Ok(QueryAnalysis {
            supports_limit: false,
            has_limit: false,
        }),

        // Block all write operations
        Statement::Insert { .. } => Err(QueryError::WriteOperation("INSERT")),
        Statement::Update { .. } => Err(QueryError::WriteOperation("UPDATE")),
        Statement::Delete { .. } => Err(QueryError::WriteOperation("DELETE")),

        // Block all DDL operations
        Statement::CreateDatabase { .. } => Err(QueryError::DdlOperation("CREATE DATABASE")),
        Statement::CreateTable { .. } => Err(QueryError::DdlOperation("CREATE TABLE")),
        Statement::CreateView { .. } => Err(QueryError::DdlOperation("CREATE VIEW")),
        Statement::CreateIndex { .. } => Err(QueryError::DdlOperation("CREATE INDEX")),
        Statement::AlterTable { .. } => Err(QueryError::DdlOperation("ALTER TABLE")),
        Statement::Drop { .. } => Err(QueryError::DdlOperation("DROP")),
        Statement::Truncate { .. } => Err(QueryError::DdlOperation("TRUNCATE")),

        _ => Err(QueryError::UnsupportedStatement),
    }
}

/// Appends `LIMIT max_rows` to a query that has none.
///
/// Queries with their own LIMIT run as written and the returned rows are capped
/// afterwards; a derived table wrapper would reject joins that select two columns
/// of the same name. The LIMIT goes on its own line so a trailing `--` comment
/// cannot swallow it.
fn apply_limit_to_query(query: &str, max_rows: u32, analysis: &QueryAnalysis) -> String {
    let trimmed = query.trim().trim_end_matches(';').trim_end();

    if !analysis.supports_limit || analysis.has_limit {
        return trimmed.to_string();
    }

    format!("{}\nLIMIT {}", trimmed, max_rows)
}

/// Formats the rows as pretty-printed JSON
fn format_as_json(rows: &[Row]) -> Result<String, QueryError> {
    serde_json::to_string_pretty(rows)
        .map_err(|e| QueryError::FormattingError(format!("Failed to format JSON: {}", e)))
}

/// Formats the rows as a markdown table
fn format_as_table(rows: &[Row]) -> String {
    let Some(first_row) = rows.first() else {
        return "No rows returned.".to_string();
    };

    let columns: Vec<&String> = first_row.keys().collect();
    let mut table = String::new();

    // Header row
    table.push_str("| ");
    let column_names: Vec<&str> = columns.iter().map(|s| s.as_str()).collect();
    table.push_str(&column_names.join(" | "));
    table.push_str(" |\n");

    // Separator row
    table.push('|');
    for _ in &columns {
        table.push_str(" --- |");
    }
    table.push('\n');

    for row in rows {
        table.push_str("| ");
        let values: Vec<String> = columns
            .iter()
            .map(|col| {
                row.get(*col)
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        Value::Null => "NULL".to_string(),
                        _ => v.to_string(),
                    })
                    .unwrap_or_default()
            })
            .collect();
        table.push_str(&values.join(" | "));
        table.push_str(" |\n");
    }

    table
}

/// Returns the tool definition for the MCP server
pub fn tool_definition() -> Tool {
    build_tool(
        TOOL_NAME,
        "Execute Read-Only Query",
        "Execute a read-only SQL query against one database of the GreatSQL / MySQL server. Supports SELECT queries, information_schema and performance_schema lookups, and metadata commands (SHOW, DESCRIBE, EXPLAIN).",
        json!({
            "type": "object",
            "properties": {
                "database": {
                    "type": "string",
                    "description": "Database (schema) to run the query in"
                },
                "query": {
                    "type": "string",
                    "description": "SQL query to execute. Only read operations are allowed (SELECT, SHOW, DESCRIBE, EXPLAIN). Example: 'SELECT * FROM orders LIMIT 10'"
                },
                "limit": {
                    "type": "number",
                    "description": format!("Maximum number of rows to return (default: {}, max: {})", DEFAULT_LIMIT, MAX_LIMIT),
                    "minimum": MIN_LIMIT,
                    "maximum": MAX_LIMIT,
                    "default": DEFAULT_LIMIT
                },
                "format": {
                    "type": "string",
                    "description": "Output format for results",
                    "enum": ["json", "table"],
                    "default": "json"
                }
            },
            "required": ["database", "query"]
        }),
    )
}

/// Parse and validate parameters from MCP arguments
fn parse_params(arguments: Option<&Map<String, Value>>) -> Result<ExecuteQueryParams, QueryError> {
    if arguments.is_none() {
        return Err(QueryError::InvalidParameter(
            "No arguments provided".to_string(),
        ));
    }

    let database = required_str(arguments, "database").map_err(QueryError::InvalidParameter)?;
    validate_mysql_identifier(database, "database")
        .map_err(|e| QueryError::InvalidParameter(e.to_string()))?;

    let query = required_str(arguments, "query").map_err(QueryError::InvalidParameter)?;

    let limit = arguments
        .and_then(|args| args.get("limit"))
        .and_then(|v| v.as_u64())
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(DEFAULT_LIMIT);

    if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        return Err(QueryError::InvalidParameter(format!(
            "limit must be between {} and {}, got {}",
            MIN_LIMIT, MAX_LIMIT, limit
        )));
    }

    let format = arguments
        .and_then(|args| args.get("format"))
        .and_then(|v| v.as_str())
        .unwrap_or("json")
        .to_string();

    if format != "json" && format != "table" {
        return Err(QueryError::InvalidParameter(format!(
            "format must be 'json' or 'table', got '{}'",
            format
        )));
    }

    Ok(ExecuteQueryParams {
        database: database.to_string(),
        query: query.to_string(),
        limit,
        format,
    })
}

async fn execute_query(
    provider: &dyn SessionProvider,
    params: ExecuteQueryParams,
) -> Result<String, QueryError> {
    info!(
        "Executing query with limit {} and format {}",
        params.limit, params.format
    );
    debug!("Query: {}", params.query);

    let analysis = validate_and_analyze_query(&params.query)?;
    let limited_query = apply_limit_to_query(&params.query, params.limit, &analysis);

    let mut session = provider
        .open(Some(&params.database))
        .await
        .map_err(|e| QueryError::ExecutionError(e.to_string()))?;

    debug!(
        "Executing in database '{}': {}",
        params.database, limited_query
    );

    let mut rows = session
        .fetch_rows(&limited_query)
        .await
        .map_err(|e| QueryError::ExecutionError(e.to_string()))?;
    rows.truncate(params.limit as usize);

    let formatted_result = match params.format.as_str() {
        "table" => format_as_table(&rows),
        _ => format_as_json(&rows)?,
    };

    Ok(format!(
        "Query executed successfully. Rows returned: {}\n\n{}",
        rows.len(),
        formatted_result
    ))
}

/// Handle the tool call with the given arguments
pub async fn handle_call(
    provider: &dyn SessionProvider,
    arguments: Option<&Map<String, Value>>,
) -> CallToolResult {
    let params = match parse_params(arguments) {
        Ok(p) => p,
        Err(e) => return create_error_result(format!("Parameter validation error: {}", e)),
    };

    match execute_query(provider, params).await {
        Ok(content) => create_success_result(content),
        Err(e) => create_error_result(format!("Query execution error: {}", e)),
    }
}
