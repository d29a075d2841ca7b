//! Payload values carried in a log event.
//!
//! `Value` is an explicit tagged variant so that errors, non-finite floats
//! and "undefined" survive serialization in a predictable way:
//!
//! | Value                 | Wire JSON                              |
//! |-----------------------|----------------------------------------|
//! | `Error(record)`       | `{"message", "stack", ...extra}`       |
//! | `Float(NaN)`          | `"NaN"`                                |
//! | `Float(±inf)`         | `"Infinity"` / `"-Infinity"`           |
//! | `Undefined`           | `"undefined"`                          |
//!
//! Decoding turns any object holding a string `message` and a `stack` key
//! back into an [`ErrorRecord`]. The string sentinels stay strings.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Number, Value as Json};

/// Structured representation of an error attached to an event
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub message: String,
    pub stack: Option<String>,
    /// Additional fields carried alongside message and stack
    pub extra: BTreeMap<String, Value>,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Capture a Rust error. The source chain becomes the stack text.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = format!("Error: {}", err);
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push_str(&format!("\n    caused by: {}", cause));
            source = cause.source();
        }
        Self::new(err.to_string()).with_stack(stack)
    }
}

/// A single payload value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Error(ErrorRecord),
}

impl Value {
    /// Encode into wire JSON, applying the sentinel rules.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Undefined => Json::String("undefined".to_string()),
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(f) => match Number::from_f64(*f) {
                Some(n) => Json::Number(n),
                None => Json::String(float_sentinel(*f).to_string()),
            },
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Error(record) => {
                let mut map = Map::new();
                for (k, v) in &record.extra {
                    map.insert(k.clone(), v.to_json());
                }
                map.insert("message".to_string(), Json::String(record.message.clone()));
                map.insert(
                    "stack".to_string(),
                    record
                        .stack
                        .as_ref()
                        .map(|s| Json::String(s.clone()))
                        .unwrap_or(Json::Null),
                );
                Json::Object(map)
            }
        }
    }

    /// Decode wire JSON. Objects shaped like an error become `Value::Error`.
    pub fn from_json(json: Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            Json::Object(mut map) => {
                let is_error = matches!(map.get("message"), Some(Json::String(_)))
                    && matches!(map.get("stack"), Some(Json::String(_)) | Some(Json::Null));
                if !is_error {
                    return Value::Object(
                        map.into_iter()
                            .map(|(k, v)| (k, Value::from_json(v)))
                            .collect(),
                    );
                }
                let message = match map.remove("message") {
                    Some(Json::String(m)) => m,
                    _ => String::new(),
                };
                let stack = match map.remove("stack") {
                    Some(Json::String(s)) => Some(s),
                    _ => None,
                };
                Value::Error(ErrorRecord {
                    message,
                    stack,
                    extra: map
                        .into_iter()
                        .map(|(k, v)| (k, Value::from_json(v)))
                        .collect(),
                })
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

fn float_sentinel(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_negative() {
        "-Infinity"
    } else {
        "Infinity"
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Undefined => f.write_str("undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) if x.is_finite() => write!(f, "{}", x),
            Value::Float(x) => f.write_str(float_sentinel(*x)),
            Value::String(s) => f.write_str(s),
            Value::Error(record) => match &record.stack {
                Some(stack) => f.write_str(stack),
                None => write!(f, "Error: {}", record.message),
            },
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i.into())
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        i64::try_from(i)
            .map(Value::Int)
            .unwrap_or(Value::Float(i as f64))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<ErrorRecord> for Value {
    fn from(record: ErrorRecord) -> Self {
        Value::Error(record)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::from_json(json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Undefined)
    }
}
