use serde_json::{Map, Value};
use tracing::debug;

type ValueFn<'a> = Box<dyn Fn(Value) -> Value + 'a>;
type KeyFn<'a> = Box<dyn Fn(String) -> String + 'a>;
type KeyValueFn<'a> = Box<dyn Fn(String, Value) -> (String, Value) + 'a>;

/// Recursive rewriter over payload trees.
///
/// Mapping keys go through `on_key`, every node (children first, then the
/// node rebuilt from them) goes through `on_value` exactly once, and each
/// mapping entry then goes through `on_key_value`. Hooks left unset are the
/// identity. Mappers chained with [`PayloadMapper::then`] run in order.
#[derive(Default)]
pub struct PayloadMapper<'a> {
    on_value: Option<ValueFn<'a>>,
    on_key: Option<KeyFn<'a>>,
    on_key_value: Option<KeyValueFn<'a>>,
    next: Option<Box<PayloadMapper<'a>>>,
}

impl<'a> PayloadMapper<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_value(mut self, f: impl Fn(Value) -> Value + 'a) -> Self {
        self.on_value = Some(Box::new(f));
        self
    }

    pub fn on_key(mut self, f: impl Fn(String) -> String + 'a) -> Self {
        self.on_key = Some(Box::new(f));
        self
    }

    pub fn on_key_value(mut self, f: impl Fn(String, Value) -> (String, Value) + 'a) -> Self {
        self.on_key_value = Some(Box::new(f));
        self
    }

    pub fn then(mut self, next: PayloadMapper<'a>) -> Self {
        self.next = Some(Box::new(match self.next.take() {
            Some(existing) => existing.then(next),
            None => next,
        }));
        self
    }

    pub fn apply(&self, node: Value) -> Value {
        let mapped = self.walk(node);
        match &self.next {
            Some(next) => next.apply(mapped),
            None => mapped,
        }
    }

    fn walk(&self, node: Value) -> Value {
        let rebuilt = match node {
            Value::Object(entries) => {
                let mut out = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = match &self.on_key {
                        Some(f) => f(key),
                        None => key,
                    };
                    let value = self.walk(value);
                    let (key, value) = match &self.on_key_value {
                        Some(f) => f(key, value),
                        None => (key, value),
                    };
                    out.insert(key, value);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.into_iter().map(|item| self.walk(item)).collect()),
            scalar => scalar,
        };
        match &self.on_value {
            Some(f) => f(rebuilt),
            None => rebuilt,
        }
    }
}

pub fn rename_key(old: impl Into<String>, new: impl Into<String>) -> PayloadMapper<'static> {
    let old = old.into();
    let new = new.into();
    PayloadMapper::new().on_key(move |key| {
        if key == old {
            debug!(from = %old, to = %new, "renamed payload key");
            new.clone()
        } else {
            key
        }
    })
}

pub fn rename_value(old: Value, new: Value) -> PayloadMapper<'static> {
    PayloadMapper::new().on_value(move |value| {
        if value == old {
            debug!(from = %old, to = %new, "renamed payload value");
            new.clone()
        } else {
            value
        }
    })
}

/// Renames a direct key of `entries` in place, keeping its position.
pub fn rename_field(entries: &mut Map<String, Value>, old: &str, new: &str) -> bool {
    if !entries.contains_key(old) {
        return false;
    }
    if old == new {
        return true;
    }
    let renamed = std::mem::take(entries)
        .into_iter()
        .filter(|(key, _)| key != new)
        .map(|(key, value)| if key == old { (new.to_string(), value) } else { (key, value) })
        .collect();
    *entries = renamed;
    true
}

/// Removes a direct key of `entries`, keeping the order of the others.
pub fn take_field(entries: &mut Map<String, Value>, key: &str) -> Option<Value> {
    entries.shift_remove(key)
}

/// Inserts `default` under `key` unless the key is already present.
pub fn ensure_field(entries: &mut Map<String, Value>, key: &str, default: Value) -> bool {
    if entries.contains_key(key) {
        return false;
    }
    debug!(key, "added missing payload field");
    entries.insert(key.to_string(), default);
    true
}
