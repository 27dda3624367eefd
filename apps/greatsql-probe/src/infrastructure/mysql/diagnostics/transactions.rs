//! Long running or lock-heavy InnoDB transactions

use super::snapshot::column_str;
use super::{DiagnosticError, Finding, Findings, QueryExecutor, Row};

const CRITICAL_TRANSACTIONS_QUERY: &str = "SELECT trx_id, trx_state, trx_started, \
     TIMESTAMPDIFF(SECOND, trx_started, NOW()) AS trx_age_secs, trx_mysql_thread_id, \
     trx_query, trx_lock_structs, trx_rows_locked, trx_rows_modified \
     FROM information_schema.INNODB_TRX \
     WHERE trx_lock_structs >= 5 \
     OR trx_rows_locked >= 100 \
     OR trx_rows_modified >= 100 \
     OR TIMESTAMPDIFF(SECOND, trx_started, NOW()) > 100";

pub async fn fetch_critical(executor: &mut dyn QueryExecutor) -> Result<Vec<Row>, DiagnosticError> {
    executor.fetch_rows(CRITICAL_TRANSACTIONS_QUERY).await
}

/// One warning per transaction, keyed by its id
pub fn summarize(rows: &[Row]) -> Findings {
    rows.iter()
        .map(|row| {
            let trx_id = column_str(row, "trx_id").unwrap_or_else(|| "unknown".to_string());
            let field = |name: &str| column_str(row, name).unwrap_or_else(|| "-".to_string());
            Finding::warning(
                format!("critical_trx_{}", trx_id),
                format!(
                    "Transaction {} (thread {}) running for {}s holds {} lock structs, {} locked rows, {} modified rows",
                    trx_id,
                    field("trx_mysql_thread_id"),
                    field("trx_age_secs"),
                    field("trx_lock_structs"),
                    field("trx_rows_locked"),
                    field("trx_rows_modified"),
                ),
            )
        })
        .collect()
}
