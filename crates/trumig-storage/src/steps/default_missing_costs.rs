use super::{PayloadColumn, StepError};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use trumig_core::take_field;

const COST_COLUMNS: [PayloadColumn; 2] = [
    PayloadColumn::new("records", "record_id", "cost_json"),
    PayloadColumn::new("feedbacks", "feedback_result_id", "cost_json"),
];
const FEEDBACK_JSON: PayloadColumn =
    PayloadColumn::new("feedback_defs", "feedback_definition_id", "feedback_json");

pub(super) fn migrate(conn: &Connection) -> Result<(), StepError> {
    for column in COST_COLUMNS {
        column.rewrite(conn, default_costs)?;
    }
    FEEDBACK_JSON.rewrite(conn, move_feedback_bindings)?;
    Ok(())
}

fn default_costs(payload: Value) -> Result<Value, String> {
    let Value::Object(mut cost) = payload else {
        return Err("cost payload is not an object".to_string());
    };
    default_if_null(&mut cost, "n_tokens", json!(0));
    default_if_null(&mut cost, "cost", json!(0.0));
    Ok(Value::Object(cost))
}

fn default_if_null(entries: &mut Map<String, Value>, key: &str, default: Value) {
    match entries.get_mut(key) {
        Some(value) if value.is_null() => *value = default,
        Some(_) => {}
        None => {
            entries.insert(key.to_string(), default);
        }
    }
}

fn move_feedback_bindings(mut payload: Value) -> Result<Value, String> {
    if !payload.is_object() {
        return Err("feedback definition is not an object".to_string());
    }
    if let Some(Value::String(module_name)) =
        payload.pointer_mut("/implementation/obj/cls/module/module_name")
    {
        *module_name = module_name.replace("tru_feedback", "feedback");
    }
    let Some(Value::Object(obj)) = payload.pointer_mut("/implementation/obj") else {
        return Ok(payload);
    };
    // Definitions without init_kwargs keep whatever bindings they already carry.
    let kwargs = match take_field(obj, "init_kwargs") {
        Some(Value::Object(kwargs)) => kwargs,
        Some(Value::Null) => Map::new(),
        Some(_) => return Err("implementation init_kwargs is not a mapping".to_string()),
        None => return Ok(payload),
    };
    obj.insert(
        "init_bindings".to_string(),
        json!({"args": [], "kwargs": kwargs}),
    );
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::{payload, store_at};
    use trumig_core::checkpoints::V0_2_0;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            r#"
            INSERT INTO records VALUES (
                'rec-1', 'abc', NULL, NULL, '{"chain_id": "abc", "calls": []}', '-', 1,
                '{"n_tokens": null, "cost": null, "n_requests": 2}'
            );
            INSERT INTO records VALUES (
                'rec-2', 'abc', NULL, NULL, '{"chain_id": "abc", "calls": []}', '-', 2,
                '{"n_tokens": 12, "cost": 0.25}'
            );
            INSERT INTO feedbacks VALUES (
                'rec-1', 'fb-1', 'abc', 'def-1', 3, 'done', NULL, '{"calls": []}', 0.5, 'f', '{}'
            );
            INSERT INTO feedback_defs VALUES (
                'def-1',
                '{"implementation": {"obj": {"cls": {"name": "Huggingface", "module": {"module_name": "trulens_eval.tru_feedback"}}, "id": 1, "init_kwargs": {"key": "v"}}, "name": "language_match"}}'
            );
            INSERT INTO feedback_defs VALUES ('def-2', '{"implementation": {"name": "plain"}}');
            "#,
        )
        .expect("seed rows");
    }

    #[test]
    fn fills_missing_cost_counters() {
        let store = store_at(V0_2_0, seed);
        migrate(store.connection()).expect("migrate");

        let nulls = payload(&store, "records", "cost_json", "record_id", "rec-1");
        assert_eq!(nulls, json!({"n_tokens": 0, "cost": 0.0, "n_requests": 2}));
        let kept = payload(&store, "records", "cost_json", "record_id", "rec-2");
        assert_eq!(kept, json!({"n_tokens": 12, "cost": 0.25}));
        let missing = payload(&store, "feedbacks", "cost_json", "feedback_result_id", "fb-1");
        assert_eq!(missing, json!({"n_tokens": 0, "cost": 0.0}));
    }

    #[test]
    fn moves_init_kwargs_into_bindings() {
        let store = store_at(V0_2_0, seed);
        migrate(store.connection()).expect("migrate");

        let definition = payload(
            &store,
            "feedback_defs",
            "feedback_json",
            "feedback_definition_id",
            "def-1",
        );
        let obj = &definition["implementation"]["obj"];
        assert_eq!(obj["cls"]["module"]["module_name"], json!("trulens_eval.feedback"));
        assert!(obj.get("init_kwargs").is_none());
        assert_eq!(obj["init_bindings"], json!({"args": [], "kwargs": {"key": "v"}}));

        let plain = payload(
            &store,
            "feedback_defs",
            "feedback_json",
            "feedback_definition_id",
            "def-2",
        );
        assert_eq!(plain, json!({"implementation": {"name": "plain"}}));
    }

    #[test]
    fn existing_init_bindings_survive() {
        let store = store_at(V0_2_0, |conn| {
            conn.execute_batch(
                r#"
                INSERT INTO feedback_defs VALUES (
                    'def-1',
                    '{"implementation": {"obj": {"cls": {"name": "OpenAI", "module": {"module_name": "trulens_eval.tru_feedback"}}, "id": 1, "init_bindings": {"args": ["sk"], "kwargs": {"model_engine": "gpt-4"}}}, "name": "relevance"}}'
                );
                INSERT INTO feedback_defs VALUES (
                    'def-2',
                    '{"implementation": {"obj": {"cls": {"name": "OpenAI", "module": {"module_name": "m"}}, "id": 2, "init_kwargs": null}, "name": "relevance"}}'
                );
                "#,
            )
            .expect("seed rows");
        });
        migrate(store.connection()).expect("migrate");

        let kept = payload(
            &store,
            "feedback_defs",
            "feedback_json",
            "feedback_definition_id",
            "def-1",
        );
        let obj = &kept["implementation"]["obj"];
        assert_eq!(
            obj["init_bindings"],
            json!({"args": ["sk"], "kwargs": {"model_engine": "gpt-4"}})
        );
        assert_eq!(obj["cls"]["module"]["module_name"], json!("trulens_eval.feedback"));

        let null_kwargs = payload(
            &store,
            "feedback_defs",
            "feedback_json",
            "feedback_definition_id",
            "def-2",
        );
        let obj = &null_kwargs["implementation"]["obj"];
        assert!(obj.get("init_kwargs").is_none());
        assert_eq!(obj["init_bindings"], json!({"args": [], "kwargs": {}}));
    }

    #[test]
    fn rejects_non_object_costs() {
        let store = store_at(V0_2_0, |conn| {
            conn.execute(
                "INSERT INTO records VALUES ('rec-x', 'abc', NULL, NULL, '{\"calls\": []}', '-', 1, '3')",
                [],
            )
            .expect("seed");
        });
        let err = migrate(store.connection()).expect_err("non-object cost");
        assert!(matches!(
            err,
            StepError::Payload { table: "records", column: "cost_json", ref row_key, .. } if row_key == "rec-x"
        ));
    }
}
