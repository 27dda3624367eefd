//! Read-only schema exploration queries
//!
//! Identifiers are validated before they are interpolated into SQL.

use super::errors::validate_mysql_identifier;
use crate::infrastructure::mysql::diagnostics::snapshot::column_i64;
use crate::infrastructure::mysql::diagnostics::{DiagnosticError, QueryExecutor, Row};

const LIST_DATABASES_QUERY: &str = "SELECT SCHEMA_NAME, DEFAULT_CHARACTER_SET_NAME, \
     DEFAULT_COLLATION_NAME FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME";

fn validate(name: &str, identifier_type: &str) -> Result<(), DiagnosticError> {
    validate_mysql_identifier(name, identifier_type)
        .map_err(|e| DiagnosticError::InvalidParameter(e.to_string()))
}

pub async fn list_databases(executor: &mut dyn QueryExecutor) -> Result<Vec<Row>, DiagnosticError> {
    executor.fetch_rows(LIST_DATABASES_QUERY).await
}

pub async fn list_tables(
    executor: &mut dyn QueryExecutor,
    database: &str,
) -> Result<Vec<Row>, DiagnosticError> {
    validate(database, "database")?;
    let sql = format!(
        "SELECT TABLE_NAME, TABLE_SCHEMA, TABLE_ROWS, CREATE_TIME, TABLE_COMMENT \
         FROM information_schema.TABLES WHERE TABLE_SCHEMA = '{}' ORDER BY TABLE_NAME",
        database
    );
    executor.fetch_rows(&sql).await
}

pub async fn table_row_count(
    executor: &mut dyn QueryExecutor,
    database: &str,
    table: &str,
) -> Result<i64, DiagnosticError> {
    validate(database, "database")?;
    validate(table, "table")?;
    let sql = format!("SELECT COUNT(*) AS row_count FROM `{}`.`{}`", database, table);
    let rows = executor.fetch_rows(&sql).await?;
    rows.first()
        .and_then(|row| column_i64(row, "row_count"))
        .ok_or_else(|| DiagnosticError::MalformedInput("COUNT(*) returned no rows".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mysql::diagnostics::test_providers::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_tables_validates_database() {
        let mut executor = MockExecutor::new();
        let result = list_tables(&mut executor, "app' OR '1'='1").await;
        assert!(matches!(result, Err(DiagnosticError::InvalidParameter(_))));
        assert!(executor.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_tables_filters_schema() {
        let mut executor = MockExecutor::new().with_rows(
            "information_schema.TABLES",
            vec![row(&[("TABLE_NAME", json!("orders"))])],
        );
        let rows = list_tables(&mut executor, "shop").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(executor.executed.lock().unwrap()[0].contains("TABLE_SCHEMA = 'shop'"));
    }

    #[tokio::test]
    async fn test_table_row_count() {
        let mut executor = MockExecutor::new()
            .with_rows("COUNT(*)", vec![row(&[("row_count", json!(1234))])]);
        let count = table_row_count(&mut executor, "shop", "orders").await.unwrap();
        assert_eq!(count, 1234);
        assert!(executor.executed.lock().unwrap()[0].contains("`shop`.`orders`"));
    }

    #[tokio::test]
    async fn test_table_row_count_rejects_bad_table() {
        let mut executor = MockExecutor::new();
        let result = table_row_count(&mut executor, "shop", "orders;--").await;
        assert!(matches!(result, Err(DiagnosticError::InvalidParameter(_))));
    }
}
