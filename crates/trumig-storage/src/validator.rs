use crate::{column_names, quote_ident, table_names, LegacyStore};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use trumig_core::schema::is_payload_column;
use trumig_core::{PayloadShape, MIGRATION_UNKNOWN};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSummary {
    pub table: String,
    pub column: String,
    pub checked: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub columns: Vec<ColumnSummary>,
}

impl ValidationSummary {
    pub fn checked(&self) -> usize {
        self.columns.iter().map(|column| column.checked).sum()
    }

    pub fn skipped(&self) -> usize {
        self.columns.iter().map(|column| column.skipped).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{table}.{column}: {reason} (value: {})", .value.as_deref().unwrap_or("<none>"))]
pub struct ValidationIssue {
    pub table: String,
    pub column: String,
    pub value: Option<String>,
    pub reason: String,
}

impl ValidationIssue {
    fn new(table: &str, column: &str, value: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            value,
            reason: reason.into(),
        }
    }
}

/// Re-parses every payload column of every table against its current shape.
/// Stops at the first value that does not fit.
pub fn validate_store(store: &LegacyStore) -> Result<ValidationSummary, ValidationIssue> {
    let conn = store.connection();
    let tables = table_names(conn).map_err(|err| ValidationIssue::new("*", "*", None, err.to_string()))?;

    let mut summary = ValidationSummary::default();
    for table in &tables {
        let columns = column_names(conn, table)
            .map_err(|err| ValidationIssue::new(table, "*", None, err.to_string()))?;
        for column in columns.iter().filter(|column| is_payload_column(column)) {
            let counts = validate_column(conn, table, column)?;
            debug!(
                table = %table,
                column = %column,
                checked = counts.checked,
                skipped = counts.skipped,
                "validated payload column"
            );
            summary.columns.push(counts);
        }
    }
    Ok(summary)
}

fn validate_column(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<ColumnSummary, ValidationIssue> {
    let sqlite_issue = |err: rusqlite::Error| ValidationIssue::new(table, column, None, err.to_string());
    let mut statement = conn
        .prepare(&format!("SELECT {} FROM {}", quote_ident(column), quote_ident(table)))
        .map_err(sqlite_issue)?;
    let mut rows = statement.query([]).map_err(sqlite_issue)?;

    let mut counts = ColumnSummary {
        table: table.to_string(),
        column: column.to_string(),
        checked: 0,
        skipped: 0,
    };
    let mut shape = None;
    while let Some(row) = rows.next().map_err(sqlite_issue)? {
        let raw = match row.get_ref(0).map_err(sqlite_issue)? {
            ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            ValueRef::Null => {
                return Err(ValidationIssue::new(table, column, None, "payload is NULL"));
            }
            other => {
                return Err(ValidationIssue::new(
                    table,
                    column,
                    None,
                    format!("payload is stored as {:?}, expected text", other.data_type()),
                ));
            }
        };
        if raw == MIGRATION_UNKNOWN {
            counts.skipped += 1;
            continue;
        }
        let shape = match shape {
            Some(shape) => shape,
            None => {
                let resolved = PayloadShape::for_column(column).map_err(|err| {
                    ValidationIssue::new(table, column, Some(raw.clone()), err.to_string())
                })?;
                *shape.insert(resolved)
            }
        };
        let payload: Value = serde_json::from_str(&raw).map_err(|err| {
            ValidationIssue::new(table, column, Some(raw.clone()), format!("invalid json: {err}"))
        })?;
        shape
            .validate(&payload)
            .map_err(|err| ValidationIssue::new(table, column, Some(raw.clone()), err.to_string()))?;
        counts.checked += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(sql: &str) -> LegacyStore {
        let store = LegacyStore::open_in_memory().expect("open store");
        store.connection().execute_batch(sql).expect("seed");
        store
    }

    #[test]
    fn counts_checked_and_skipped_values() {
        let store = store_with(
            "CREATE TABLE records (record_id TEXT PRIMARY KEY, perf_json TEXT, cost_json TEXT, tags TEXT);
             INSERT INTO records VALUES ('a', 'unknown[db_migration]', '{\"n_tokens\": 1, \"cost\": 0.5}', '-');
             INSERT INTO records VALUES ('b', '{\"start_time\": \"t0\", \"end_time\": \"t1\"}', '{\"n_tokens\": 0, \"cost\": 0}', '-');",
        );
        let summary = validate_store(&store).expect("valid store");

        assert_eq!(summary.columns.len(), 2);
        assert_eq!(summary.checked(), 3);
        assert_eq!(summary.skipped(), 1);
        let perf = &summary.columns[0];
        assert_eq!((perf.column.as_str(), perf.checked, perf.skipped), ("perf_json", 1, 1));
    }

    #[test]
    fn reports_corrupted_payload_with_location() {
        let store = store_with(
            "CREATE TABLE feedbacks (feedback_result_id TEXT PRIMARY KEY, cost_json TEXT);
             INSERT INTO feedbacks VALUES ('fb-1', '{\"n_tokens\": null, \"cost\": 0.0}');",
        );
        let issue = validate_store(&store).expect_err("null counter");
        assert_eq!(issue.table, "feedbacks");
        assert_eq!(issue.column, "cost_json");
        assert_eq!(issue.value.as_deref(), Some("{\"n_tokens\": null, \"cost\": 0.0}"));
        assert!(issue.to_string().starts_with("feedbacks.cost_json: payload does not match cost shape"));
    }

    #[test]
    fn unknown_payload_column_fails_only_with_data() {
        let empty = store_with("CREATE TABLE extras (id TEXT, extra_json TEXT);");
        validate_store(&empty).expect("no rows to check");

        let filled = store_with(
            "CREATE TABLE extras (id TEXT, extra_json TEXT);
             INSERT INTO extras VALUES ('x', '{}');",
        );
        let issue = validate_store(&filled).expect_err("unknown column");
        assert_eq!(issue.reason, "serialized column migration not implemented: extra_json");
    }

    #[test]
    fn null_and_non_text_payloads_fail() {
        let null = store_with(
            "CREATE TABLE apps (app_id TEXT, app_json TEXT);
             INSERT INTO apps VALUES ('a', NULL);",
        );
        assert_eq!(validate_store(&null).expect_err("null").reason, "payload is NULL");

        let integer = store_with(
            "CREATE TABLE apps (app_id TEXT, app_json);
             INSERT INTO apps VALUES ('a', 7);",
        );
        let issue = validate_store(&integer).expect_err("integer");
        assert!(issue.reason.contains("expected text"));
    }

    #[test]
    fn invalid_json_is_reported() {
        let store = store_with(
            "CREATE TABLE records (record_id TEXT, record_json TEXT);
             INSERT INTO records VALUES ('a', '{broken');",
        );
        let issue = validate_store(&store).expect_err("broken json");
        assert!(issue.reason.starts_with("invalid json"));
        assert_eq!(issue.value.as_deref(), Some("{broken"));
    }
}
