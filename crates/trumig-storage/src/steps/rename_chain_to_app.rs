use super::{table_exists, PayloadColumn, StepError};
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use tracing::debug;
use trumig_core::{ensure_field, rename_field, take_field, MIGRATION_UNKNOWN};

const RECORD_JSON: PayloadColumn = PayloadColumn::new("records", "record_id", "record_json");
const CHAIN_JSON: PayloadColumn = PayloadColumn::new("chains", "chain_id", "chain_json");

struct RecordRow {
    record_id: String,
    app_id: String,
    record_json: String,
}

struct ChainRow {
    chain_id: String,
    chain_json: String,
}

pub(super) fn migrate(conn: &Connection) -> Result<(), StepError> {
    conn.execute_batch(&format!(
        "ALTER TABLE records RENAME COLUMN chain_id TO app_id;
         ALTER TABLE records ADD COLUMN perf_json TEXT NOT NULL DEFAULT '{MIGRATION_UNKNOWN}';"
    ))
    .map_err(StepError::sqlite("records"))?;
    conn.execute_batch("ALTER TABLE feedbacks DROP COLUMN chain_id;")
        .map_err(StepError::sqlite("feedbacks"))?;

    migrate_records(conn)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS apps (
            app_id TEXT NOT NULL PRIMARY KEY,
            app_json TEXT NOT NULL
        );",
    )
    .map_err(StepError::sqlite("apps"))?;
    if table_exists(conn, "chains")? {
        migrate_chains(conn)?;
        conn.execute_batch("DROP TABLE chains;")
            .map_err(StepError::sqlite("chains"))?;
    }
    Ok(())
}

fn migrate_records(conn: &Connection) -> Result<(), StepError> {
    let rows = {
        let mut statement = conn
            .prepare("SELECT record_id, app_id, record_json FROM records")
            .map_err(StepError::sqlite("records"))?;
        let rows = statement
            .query_map([], |row| {
                Ok(RecordRow {
                    record_id: row.get(0)?,
                    app_id: row.get(1)?,
                    record_json: row.get(2)?,
                })
            })
            .map_err(StepError::sqlite("records"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StepError::sqlite("records"))?
    };

    for row in &rows {
        let payload = serde_json::from_str(&row.record_json)
            .map_err(|err| RECORD_JSON.error(&row.record_id, format!("invalid json: {err}")))?;
        let migrated = rename_record_fields(payload, &row.app_id)
            .map_err(|reason| RECORD_JSON.error(&row.record_id, reason))?;
        RECORD_JSON.store(conn, &row.record_id, &migrated)?;
    }
    debug!(rows = rows.len(), "migrated records to app ids");
    Ok(())
}

fn rename_record_fields(payload: Value, app_id: &str) -> Result<Value, String> {
    let Value::Object(mut entries) = payload else {
        return Err("record payload is not an object".to_string());
    };
    if !rename_field(&mut entries, "chain_id", "app_id") {
        ensure_field(&mut entries, "app_id", Value::String(app_id.to_string()));
    }
    match entries.get_mut("calls") {
        Some(Value::Array(calls)) => {
            for call in calls.iter_mut() {
                let Value::Object(call) = call else {
                    return Err("record call is not an object".to_string());
                };
                rename_field(call, "chain_stack", "stack");
            }
        }
        Some(_) => return Err("record calls is not a list".to_string()),
        None => {}
    }
    Ok(Value::Object(entries))
}

fn migrate_chains(conn: &Connection) -> Result<(), StepError> {
    let rows = {
        let mut statement = conn
            .prepare("SELECT chain_id, chain_json FROM chains")
            .map_err(StepError::sqlite("chains"))?;
        let rows = statement
            .query_map([], |row| {
                Ok(ChainRow {
                    chain_id: row.get(0)?,
                    chain_json: row.get(1)?,
                })
            })
            .map_err(StepError::sqlite("chains"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StepError::sqlite("chains"))?
    };

    for row in &rows {
        let payload = serde_json::from_str(&row.chain_json)
            .map_err(|err| CHAIN_JSON.error(&row.chain_id, format!("invalid json: {err}")))?;
        let app = chain_to_app(payload, &row.chain_id)
            .map_err(|reason| CHAIN_JSON.error(&row.chain_id, reason))?;
        let app_id = app
            .get("app_id")
            .and_then(Value::as_str)
            .unwrap_or(&row.chain_id)
            .to_string();
        let app_json = serde_json::to_string(&app)
            .map_err(|err| CHAIN_JSON.error(&row.chain_id, format!("serialization failed: {err}")))?;
        conn.execute(
            "INSERT OR REPLACE INTO apps (app_id, app_json) VALUES (?1, ?2)",
            params![app_id, app_json],
        )
        .map_err(StepError::sqlite("apps"))?;
    }
    debug!(rows = rows.len(), "moved chains into apps");
    Ok(())
}

fn chain_to_app(payload: Value, chain_id: &str) -> Result<Value, String> {
    let Value::Object(mut entries) = payload else {
        return Err("chain payload is not an object".to_string());
    };
    if !rename_field(&mut entries, "chain_id", "app_id") {
        ensure_field(&mut entries, "app_id", Value::String(chain_id.to_string()));
    }
    entries.insert("root_class".to_string(), unknown_class());
    if let Some(Value::String(mode)) = entries.get_mut("feedback_mode") {
        *mode = mode.replace("chain", "app");
    }
    take_field(&mut entries, "db");
    Ok(Value::Object(entries))
}

fn unknown_class() -> Value {
    json!({
        "name": "Unknown_class",
        "module": {
            "package_name": MIGRATION_UNKNOWN,
            "module_name": MIGRATION_UNKNOWN
        },
        "bases": null
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::{columns, payload, store_at};
    use trumig_core::checkpoints::V0_1_2;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            r#"
            INSERT INTO records VALUES (
                'rec-1', 'abc', 'hi', 'hello',
                '{"chain_id": "abc", "calls": [{"chain_stack": [], "args": {"chain_stack": 1}}], "ts": 1}',
                '-', 1700000000, '{"n_tokens": null, "cost": null}'
            );
            INSERT INTO records VALUES (
                'rec-2', 'fallback', NULL, NULL, '{"calls": []}', '-', 1700000001, '{}'
            );
            INSERT INTO feedbacks VALUES (
                'rec-1', 'fb-1', 'abc', 'def-1', 1700000002, 'done', NULL,
                '{"calls": []}', 0.5, 'relevance', '{"n_tokens": 3, "cost": 0.1}'
            );
            INSERT INTO chains VALUES (
                'abc',
                '{"chain_id": "abc", "feedback_mode": "with_chain_thread", "db": {"filename": "x"}, "chain": {}}'
            );
            "#,
        )
        .expect("seed rows");
    }

    #[test]
    fn renames_columns_and_adds_perf_sentinel() {
        let store = store_at(V0_1_2, seed);
        migrate(store.connection()).expect("migrate");

        let record_columns = columns(&store, "records");
        assert!(record_columns.contains(&"app_id".to_string()));
        assert!(!record_columns.contains(&"chain_id".to_string()));
        assert!(record_columns.contains(&"perf_json".to_string()));
        assert!(!columns(&store, "feedbacks").contains(&"chain_id".to_string()));

        let perf: String = store
            .connection()
            .query_row(
                "SELECT perf_json FROM records WHERE record_id = 'rec-1'",
                [],
                |row| row.get(0),
            )
            .expect("perf");
        assert_eq!(perf, MIGRATION_UNKNOWN);
    }

    #[test]
    fn rewrites_record_payloads() {
        let store = store_at(V0_1_2, seed);
        migrate(store.connection()).expect("migrate");

        let record = payload(&store, "records", "record_json", "record_id", "rec-1");
        assert_eq!(record["app_id"], json!("abc"));
        assert!(record.get("chain_id").is_none());
        assert_eq!(record["calls"][0]["stack"], json!([]));
        assert!(record["calls"][0].get("chain_stack").is_none());
        assert_eq!(record["calls"][0]["args"], json!({"chain_stack": 1}));
        let keys = record.as_object().expect("object").keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, vec!["app_id", "calls", "ts"]);

        let fallback = payload(&store, "records", "record_json", "record_id", "rec-2");
        assert_eq!(fallback["app_id"], json!("fallback"));
    }

    #[test]
    fn moves_chains_into_apps() {
        let store = store_at(V0_1_2, seed);
        migrate(store.connection()).expect("migrate");

        assert!(!store.table_exists("chains").expect("table check"));
        let app = payload(&store, "apps", "app_json", "app_id", "abc");
        assert_eq!(app["app_id"], json!("abc"));
        assert_eq!(app["feedback_mode"], json!("with_app_thread"));
        assert_eq!(app["root_class"]["module"]["module_name"], json!(MIGRATION_UNKNOWN));
        assert!(app.get("db").is_none());
        assert!(app.get("chain_id").is_none());
    }

    #[test]
    fn rejects_non_object_records() {
        let store = store_at(V0_1_2, |conn| {
            conn.execute(
                "INSERT INTO records VALUES ('rec-x', 'abc', NULL, NULL, '[1, 2]', '-', 1, '{}')",
                [],
            )
            .expect("seed");
        });
        let err = migrate(store.connection()).expect_err("non-object record");
        assert_eq!(err.table(), "records");
        assert_eq!(err.column(), Some("record_json"));
    }
}
