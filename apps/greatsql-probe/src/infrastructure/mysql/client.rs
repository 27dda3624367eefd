//! sqlx backed sessions for the diagnostics engine.
//!
//! Every session is a single [`MySqlConnection`] opened for one call and dropped with it.
//! Statements go through the text protocol so `SHOW` statements work regardless of
//! prepared statement support, and every column comes back as text that is converted
//! to JSON here.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{Column, Connection, Executor, Row as _, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::Instrument;

use super::config::MySqlConfig;
use crate::infrastructure::mysql::diagnostics::{
    DiagnosticError, QueryExecutor, Row, SessionProvider,
};

/// Opens one connection per diagnostic call
#[derive(Debug, Clone)]
pub struct MySqlSessionProvider {
    config: MySqlConfig,
}

impl MySqlSessionProvider {
    pub fn new(config: MySqlConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.query_timeout_secs)
    }
}

#[async_trait]
impl SessionProvider for MySqlSessionProvider {
    async fn open(
        &self,
        database: Option<&str>,
    ) -> Result<Box<dyn QueryExecutor>, DiagnosticError> {
        let options = self
            .config
            .connect_options(database)
            .map_err(|e| DiagnosticError::ConnectionFailed(e.to_string()))?;

        tracing::debug!("Connecting to {}", self.config.display_connection());

        let conn = tokio::time::timeout(self.timeout(), MySqlConnection::connect_with(&options))
            .await
            .map_err(|_| DiagnosticError::QueryTimeout(self.config.query_timeout_secs))?
            .map_err(|e| DiagnosticError::ConnectionFailed(e.to_string()))?;

        Ok(Box::new(MySqlSession {
            conn,
            timeout_secs: self.config.query_timeout_secs,
        }))
    }
}

pub struct MySqlSession {
    conn: MySqlConnection,
    timeout_secs: u64,
}

/// ER_PARSE_ERROR, also what older servers return for statements they do not know
const PARSE_ERROR: u16 = 1064;

fn query_error(e: sqlx::Error) -> DiagnosticError {
    let number = e
        .as_database_error()
        .and_then(|db| db.try_downcast_ref::<MySqlDatabaseError>())
        .map(MySqlDatabaseError::number);

    match number {
        Some(PARSE_ERROR) => DiagnosticError::UnsupportedStatement(e.to_string()),
        _ => DiagnosticError::QueryFailed(e.to_string()),
    }
}

#[async_trait]
impl QueryExecutor for MySqlSession {
    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<Row>, DiagnosticError> {
        let span = tracing::info_span!("mysql.query", db.system = "mysql", db.statement = sql);

        let rows = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            (&mut self.conn).fetch_all(sqlx::raw_sql(sql)),
        )
        .instrument(span)
        .await
        .map_err(|_| DiagnosticError::QueryTimeout(self.timeout_secs))?
        .map_err(query_error)?;

        tracing::trace!("Query returned {} rows", rows.len());

        Ok(rows.iter().map(row_to_json).collect())
    }
}

fn row_to_json(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .map(|column| {
            let value = cell_text(row, column.ordinal())
                .map(|text| typed_cell(text, column.type_info().name()))
                .unwrap_or(Value::Null);
            (column.name().to_string(), value)
        })
        .collect()
}

/// Raw cell bytes as text; `None` for SQL NULL
fn cell_text(row: &MySqlRow, index: usize) -> Option<String> {
    let raw = row.try_get_raw(index).ok()?;
    if raw.is_null() {
        return None;
    }
    row.try_get_unchecked::<Vec<u8>, _>(index)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Integer columns become JSON numbers, everything else stays text
fn typed_cell(text: String, type_name: &str) -> Value {
    if type_name.contains("INT") {
        if let Ok(n) = text.parse::<i64>() {
            return Value::from(n);
        }
    }
    Value::String(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_cell() {
        assert_eq!(typed_cell("42".to_string(), "BIGINT"), json!(42));
        assert_eq!(typed_cell("7".to_string(), "INT UNSIGNED"), json!(7));
        assert_eq!(
            typed_cell("18446744073709551615".to_string(), "BIGINT UNSIGNED"),
            json!("18446744073709551615")
        );
        assert_eq!(typed_cell("42".to_string(), "VARCHAR"), json!("42"));
        assert_eq!(typed_cell("1.5".to_string(), "DECIMAL"), json!("1.5"));
    }

    #[test]
    fn test_non_database_errors_are_query_failures() {
        assert!(matches!(
            query_error(sqlx::Error::RowNotFound),
            DiagnosticError::QueryFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_url() {
        let provider = MySqlSessionProvider::new(MySqlConfig {
            url: Some("::::".to_string()),
            ..Default::default()
        });
        let result = provider.open(None).await;
        assert!(matches!(result, Err(DiagnosticError::ConnectionFailed(_))));
    }
}
