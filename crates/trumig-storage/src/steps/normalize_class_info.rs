use super::{table_exists, PayloadColumn, StepError};
use rusqlite::Connection;
use serde_json::{json, Value};
use trumig_core::{ensure_field, rename_key, rename_value, PayloadMapper};

const RECORD_JSON: PayloadColumn = PayloadColumn::new("records", "record_id", "record_json");
const FEEDBACK_JSON: PayloadColumn =
    PayloadColumn::new("feedback_defs", "feedback_definition_id", "feedback_json");
const APP_JSON: PayloadColumn = PayloadColumn::new("apps", "app_id", "app_json");

pub(super) fn migrate(conn: &Connection) -> Result<(), StepError> {
    let mapper = class_info_mapper();

    RECORD_JSON.rewrite(conn, |payload| Ok(mapper.apply(payload)))?;
    FEEDBACK_JSON.rewrite(conn, |payload| {
        fill_defaults(mapper.apply(payload), feedback_defaults())
    })?;
    if table_exists(conn, "apps")? {
        APP_JSON.rewrite(conn, |payload| fill_defaults(mapper.apply(payload), app_defaults()))?;
    }
    Ok(())
}

fn class_info_mapper() -> PayloadMapper<'static> {
    rename_value(json!("ObjSerial"), json!("Obj"))
        .then(rename_key("__tru_class_info", "tru_class_info"))
        .then(PayloadMapper::new().on_value(upgrade_legacy_method))
}

/// `{module_name, class_name, method_name}` triples become full method
/// descriptors pointing at an object of that class.
fn upgrade_legacy_method(value: Value) -> Value {
    let is_legacy = value.as_object().is_some_and(|entries| {
        ["module_name", "class_name", "method_name"]
            .iter()
            .all(|key| entries.get(*key).is_some_and(Value::is_string))
    });
    if !is_legacy {
        return value;
    }
    json!({
        "obj": {
            "cls": {
                "name": value["class_name"],
                "module": {
                    "package_name": null,
                    "module_name": value["module_name"]
                },
                "bases": null
            },
            "id": 0,
            "init_bindings": null
        },
        "name": value["method_name"]
    })
}

fn fill_defaults(payload: Value, defaults: Value) -> Result<Value, String> {
    let (Value::Object(mut entries), Value::Object(defaults)) = (payload, defaults) else {
        return Err("payload is not an object".to_string());
    };
    for (key, default) in defaults {
        ensure_field(&mut entries, &key, default);
    }
    Ok(Value::Object(entries))
}

fn feedback_defaults() -> Value {
    json!({
        "tru_class_info": {
            "name": "Feedback",
            "module": {
                "package_name": "trulens_eval.feedback",
                "module_name": "trulens_eval.feedback.feedback"
            },
            "bases": null
        },
        "initial_app_loader": null,
        "initial_app_loader_dump": null
    })
}

fn app_defaults() -> Value {
    json!({
        "tru_class_info": {
            "name": "AppDefinition",
            "module": {
                "package_name": "trulens_eval",
                "module_name": "trulens_eval.schema"
            },
            "bases": null
        },
        "app": {}
    })
}
