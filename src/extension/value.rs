//! Host-side representation of script return values
//!
//! Everything a script hands back is unwrapped exactly once, at the runtime
//! boundary, into [`DynamicValue`]. Nothing downstream of the runtime sees
//! interpreter-native values.

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum DynamicValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Vec<DynamicValue>),
    Mapping(BTreeMap<String, DynamicValue>),
}

impl DynamicValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DynamicValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynamicValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[DynamicValue]> {
        match self {
            DynamicValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, DynamicValue>> {
        match self {
            DynamicValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Field lookup on a mapping; `None` for every other shape
    pub fn get(&self, key: &str) -> Option<&DynamicValue> {
        self.as_mapping().and_then(|map| map.get(key))
    }

    /// String form of a primitive, following the script engine's own
    /// `toString` for numbers (`2024` rather than `2024.0`).
    ///
    /// Composites and null have no scalar form.
    pub fn coerce_string(&self) -> Option<String> {
        match self {
            DynamicValue::Null | DynamicValue::Sequence(_) | DynamicValue::Mapping(_) => None,
            DynamicValue::Bool(b) => Some(b.to_string()),
            DynamicValue::Number(n) => Some(format_number(*n)),
            DynamicValue::String(s) => Some(s.clone()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            DynamicValue::Null => Value::Null,
            DynamicValue::Bool(b) => Value::Bool(*b),
            DynamicValue::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            DynamicValue::String(s) => Value::String(s.clone()),
            DynamicValue::Sequence(items) => Value::Array(items.iter().map(DynamicValue::to_json).collect()),
            DynamicValue::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl From<Value> for DynamicValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => DynamicValue::Null,
            Value::Bool(b) => DynamicValue::Bool(b),
            Value::Number(n) => DynamicValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => DynamicValue::String(s),
            Value::Array(items) => DynamicValue::Sequence(items.into_iter().map(DynamicValue::from).collect()),
            Value::Object(map) => DynamicValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, DynamicValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for DynamicValue {
    fn from(s: &str) -> Self {
        DynamicValue::String(s.to_string())
    }
}

impl From<String> for DynamicValue {
    fn from(s: String) -> Self {
        DynamicValue::String(s)
    }
}

impl From<u32> for DynamicValue {
    fn from(n: u32) -> Self {
        DynamicValue::Number(n as f64)
    }
}

impl<T: Into<DynamicValue>> From<Option<T>> for DynamicValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(DynamicValue::Null)
    }
}
