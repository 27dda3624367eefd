//! Point-in-time captures of name/value system views

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use super::{DiagnosticError, QueryExecutor, Row};

lazy_static! {
    static ref INTEGER_PATTERN: Regex = Regex::new(r"^\d+$").unwrap();
}

/// System views exposing `VARIABLE_NAME` / `VARIABLE_VALUE` pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotView {
    GlobalStatus,
    GlobalVariables,
}

impl SnapshotView {
    pub fn query(&self) -> &'static str {
        match self {
            SnapshotView::GlobalStatus => {
                "SELECT VARIABLE_NAME, VARIABLE_VALUE FROM performance_schema.global_status"
            }
            SnapshotView::GlobalVariables => {
                "SELECT VARIABLE_NAME, VARIABLE_VALUE FROM performance_schema.global_variables"
            }
        }
    }
}

/// Restricts a snapshot to a set of metric names, compared case-insensitively
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFilter {
    names: Vec<String>,
}

impl MetricFilter {
    pub fn names(names: &[&str]) -> Self {
        MetricFilter {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Integer(i64),
    Text(String),
    Null,
}

impl MetricValue {
    /// Integer when the raw text is all digits; digits that overflow read as zero
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if INTEGER_PATTERN.is_match(trimmed) {
            MetricValue::Integer(trimmed.parse().unwrap_or(0))
        } else {
            MetricValue::Text(raw.to_string())
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => MetricValue::Null,
            Value::String(s) => MetricValue::parse(s),
            Value::Number(n) => MetricValue::parse(&n.to_string()),
            other => MetricValue::Text(other.to_string()),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            MetricValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            MetricValue::Integer(i) => Some(i.to_string()),
            MetricValue::Text(s) => Some(s.clone()),
            MetricValue::Null => None,
        }
    }
}

/// Immutable mapping of metric name to raw value. Names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    values: HashMap<String, MetricValue>,
}

impl MetricSnapshot {
    /// Build a snapshot from rows holding a name column and a value column
    pub fn from_rows(
        rows: &[Row],
        name_column: &str,
        value_column: &str,
        filter: Option<&MetricFilter>,
    ) -> Self {
        let mut values = HashMap::new();

        for row in rows {
            let Some(name) = column_str(row, name_column) else {
                continue;
            };
            if filter.is_some_and(|f| !f.matches(&name)) {
                continue;
            }
            let value = column(row, value_column)
                .map(MetricValue::from_json)
                .unwrap_or(MetricValue::Null);
            values.insert(name.to_ascii_lowercase(), value);
        }

        Self { values }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), MetricValue::parse(value)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.values.get(&name.to_ascii_lowercase())
    }

    /// Numeric reading; absent when missing or not an integer
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(MetricValue::as_integer)
    }

    pub fn integer_or_zero(&self, name: &str) -> i64 {
        self.integer(name).unwrap_or(0)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(MetricValue::as_text)
    }

    /// Decimal reading for values such as `long_query_time`
    pub fn float(&self, name: &str) -> Option<f64> {
        self.text(name).and_then(|s| s.trim().parse().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Capture one snapshot of `view`
pub async fn read(
    executor: &mut dyn QueryExecutor,
    view: SnapshotView,
    filter: Option<&MetricFilter>,
) -> Result<MetricSnapshot, DiagnosticError> {
    tracing::debug!("Reading snapshot of {:?}", view);
    let rows = executor.fetch_rows(view.query()).await?;
    Ok(MetricSnapshot::from_rows(
        &rows,
        "VARIABLE_NAME",
        "VARIABLE_VALUE",
        filter,
    ))
}

/// Case-insensitive column lookup
pub fn column<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

/// Column rendered as text; `None` for NULL or missing
pub fn column_str(row: &Row, name: &str) -> Option<String> {
    match column(row, name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Column read with the integer rule
pub fn column_i64(row: &Row, name: &str) -> Option<i64> {
    column(row, name).and_then(|v| MetricValue::from_json(v).as_integer())
}

#[cfg(test)]
mod tests {
    use super::super::test_providers::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_pattern() {
        assert_eq!(MetricValue::parse("42"), MetricValue::Integer(42));
        assert_eq!(MetricValue::parse("-3"), MetricValue::Text("-3".to_string()));
        assert_eq!(MetricValue::parse("1.5"), MetricValue::Text("1.5".to_string()));
        assert_eq!(MetricValue::parse("ON"), MetricValue::Text("ON".to_string()));
        assert_eq!(
            MetricValue::parse("99999999999999999999999"),
            MetricValue::Integer(0)
        );
    }

    #[test]
    fn test_malformed_numeric_is_absent() {
        let snapshot = MetricSnapshot::from_pairs([("Threads_connected", "n/a")]);
        assert_eq!(snapshot.integer("Threads_connected"), None);
        assert_eq!(snapshot.integer_or_zero("Threads_connected"), 0);
        assert_eq!(
            snapshot.text("threads_connected"),
            Some("n/a".to_string())
        );
    }

    #[test]
    fn test_from_rows_with_filter_and_case() {
        let rows = variable_rows(&[
            ("Innodb_log_waits", "7"),
            ("Innodb_row_lock_current_waits", "2"),
            ("Select_scan", "10"),
        ]);
        let filter =
            MetricFilter::names(&["innodb_log_waits", "INNODB_ROW_LOCK_CURRENT_WAITS"]);
        let snapshot = MetricSnapshot::from_rows(&rows, "variable_name", "variable_value", Some(&filter));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.integer("INNODB_LOG_WAITS"), Some(7));
        assert!(!snapshot.contains("Select_scan"));
    }

    #[test]
    fn test_null_and_numeric_json_values() {
        let rows = vec![
            row(&[("VARIABLE_NAME", json!("a")), ("VARIABLE_VALUE", json!(12))]),
            row(&[("VARIABLE_NAME", json!("b")), ("VARIABLE_VALUE", Value::Null)]),
        ];
        let snapshot = MetricSnapshot::from_rows(&rows, "VARIABLE_NAME", "VARIABLE_VALUE", None);
        assert_eq!(snapshot.integer("a"), Some(12));
        assert_eq!(snapshot.get("b"), Some(&MetricValue::Null));
        assert_eq!(snapshot.text("b"), None);
    }

    #[test]
    fn test_names_filter() {
        let filter = MetricFilter::names(&["Select_scan", "Sort_merge_passes"]);
        assert!(filter.matches("SELECT_SCAN"));
        assert!(!filter.matches("Select_full_join"));
    }

    #[tokio::test]
    async fn test_read_surfaces_query_failure() {
        let mut executor =
            MockExecutor::new().with_failure("global_status", "Table access denied");
        let result = read(&mut executor, SnapshotView::GlobalStatus, None).await;
        assert!(matches!(result, Err(DiagnosticError::QueryFailed(_))));
    }

    #[tokio::test]
    async fn test_read_global_variables() {
        let mut executor = MockExecutor::new().with_rows(
            "global_variables",
            variable_rows(&[("max_connections", "151"), ("binlog_format", "ROW")]),
        );
        let snapshot = read(&mut executor, SnapshotView::GlobalVariables, None)
            .await
            .unwrap();
        assert_eq!(snapshot.integer("max_connections"), Some(151));
        assert_eq!(snapshot.text("binlog_format"), Some("ROW".to_string()));
    }
}
