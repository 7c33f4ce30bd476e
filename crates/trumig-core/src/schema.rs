use crate::ContractError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

type Extra = BTreeMap<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Module {
    #[serde(default)]
    pub package_name: Option<String>,
    pub module_name: String,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Class {
    pub name: String,
    pub module: Module,
    #[serde(default)]
    pub bases: Option<Vec<Class>>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bindings {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Obj {
    pub cls: Class,
    pub id: Number,
    #[serde(default)]
    pub init_bindings: Option<Bindings>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Method {
    pub obj: Obj,
    pub name: String,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Function {
    pub module: Module,
    #[serde(default)]
    pub cls: Option<Class>,
    pub name: String,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FunctionOrMethod {
    Method(Method),
    Function(Function),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cost {
    #[serde(default)]
    pub n_requests: Option<i64>,
    #[serde(default)]
    pub n_successful_requests: Option<i64>,
    #[serde(default)]
    pub n_classes: Option<i64>,
    pub n_tokens: i64,
    #[serde(default)]
    pub n_prompt_tokens: Option<i64>,
    #[serde(default)]
    pub n_completion_tokens: Option<i64>,
    pub cost: f64,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Perf {
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordAppCallMethod {
    pub path: Value,
    pub method: Method,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordAppCall {
    pub stack: Vec<RecordAppCallMethod>,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub rets: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub perf: Option<Perf>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub tid: Option<i64>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    #[serde(default)]
    pub record_id: Option<String>,
    pub app_id: String,
    pub calls: Vec<RecordAppCall>,
    #[serde(default)]
    pub cost: Option<Cost>,
    #[serde(default)]
    pub perf: Option<Perf>,
    #[serde(default)]
    pub ts: Option<Value>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub main_input: Option<Value>,
    #[serde(default)]
    pub main_output: Option<Value>,
    #[serde(default)]
    pub main_error: Option<Value>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackCall {
    pub args: Map<String, Value>,
    #[serde(default)]
    pub ret: Option<f64>,
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackCalls {
    pub calls: Vec<FeedbackCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackDefinition {
    pub tru_class_info: Class,
    #[serde(default)]
    pub feedback_definition_id: Option<String>,
    #[serde(default)]
    pub implementation: Option<FunctionOrMethod>,
    #[serde(default)]
    pub aggregator: Option<FunctionOrMethod>,
    #[serde(default)]
    pub selectors: Option<Map<String, Value>>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackMode {
    None,
    WithApp,
    WithAppThread,
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppDefinition {
    pub app_id: String,
    pub tru_class_info: Class,
    pub root_class: Class,
    pub feedback_mode: FeedbackMode,
    pub app: Map<String, Value>,
    #[serde(default)]
    pub initial_app_loader: Option<Value>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

/// Current-version shape of a payload-bearing column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Record,
    Cost,
    Perf,
    FeedbackCalls,
    FeedbackDefinition,
    AppDefinition,
}

impl PayloadShape {
    pub fn for_column(column: &str) -> Result<Self, ContractError> {
        match column {
            "record_json" => Ok(Self::Record),
            "cost_json" => Ok(Self::Cost),
            "perf_json" => Ok(Self::Perf),
            "calls_json" => Ok(Self::FeedbackCalls),
            "feedback_json" => Ok(Self::FeedbackDefinition),
            "app_json" => Ok(Self::AppDefinition),
            other => Err(ContractError::UnknownPayloadColumn {
                column: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Cost => "cost",
            Self::Perf => "perf",
            Self::FeedbackCalls => "feedback calls",
            Self::FeedbackDefinition => "feedback definition",
            Self::AppDefinition => "app definition",
        }
    }

    pub fn validate(&self, payload: &Value) -> Result<(), ContractError> {
        match self {
            Self::Record => check::<Record>(self.as_str(), payload)?,
            Self::Cost => check::<Cost>(self.as_str(), payload)?,
            Self::Perf => check::<Perf>(self.as_str(), payload)?,
            Self::FeedbackCalls => check::<FeedbackCalls>(self.as_str(), payload)?,
            Self::FeedbackDefinition => check::<FeedbackDefinition>(self.as_str(), payload)?,
            Self::AppDefinition => check::<AppDefinition>(self.as_str(), payload)?,
        }
        if let Some(implementation) = payload.get("implementation") {
            check::<FunctionOrMethod>("implementation", implementation)?;
        }
        Ok(())
    }
}

pub fn is_payload_column(column: &str) -> bool {
    column.contains("json")
}

fn check<T: DeserializeOwned>(shape: &'static str, payload: &Value) -> Result<(), ContractError> {
    T::deserialize(payload)
        .map(|_| ())
        .map_err(|err| ContractError::PayloadShape {
            shape,
            reason: err.to_string(),
        })
}
