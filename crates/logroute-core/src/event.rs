//! The log event record and its wire form.
//!
//! A [`LogEvent`] is created once per log call and handed to appenders by
//! shared reference. The only fields written after creation are the
//! transport fields (`remote_address`, `remote_port`) attached by the
//! forwarding receiver.
//!
//! ## Wire shape
//!
//! ```text
//! {
//!   "startTime": "2026-01-21T14:30:45.123Z",
//!   "categoryName": "app.db",
//!   "level": { "level": 20000, "levelStr": "INFO", "colour": "green" },
//!   "data": [ ... ],
//!   "context": { ... },
//!   "pid": 4242,
//!   "cluster": { "workerId": 1, "worker": 4242 },      (optional)
//!   "fileName": "src/main.rs", "lineNumber": 10, ...   (optional)
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::level::{Colour, Level, LevelRegistry, ERROR};
use crate::value::{ErrorRecord, Value};

/// Category used for events the runtime synthesizes about itself
pub const INTERNAL_CATEGORY: &str = "log4js";

/// Origin of a worker event in cluster mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    #[serde(rename = "workerId")]
    pub worker_id: u32,
    /// Process id of the worker
    pub worker: u32,
}

/// Where a log call was made
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallSite {
    pub function_name: Option<String>,
    pub file_name: String,
    pub line_number: u32,
    pub column_number: u32,
    /// Captured stack text, if any
    pub call_stack: Option<String>,
}

/// A single log event
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub start_time: DateTime<Utc>,
    pub category_name: String,
    pub level: Level,
    pub data: Vec<Value>,
    /// Snapshot of the logger context at creation time
    pub context: BTreeMap<String, Value>,
    pub pid: u32,
    pub location: Option<CallSite>,
    pub cluster: Option<ClusterInfo>,
    /// Set by the forwarding receiver
    pub remote_address: Option<String>,
    /// Set by the forwarding receiver
    pub remote_port: Option<u16>,
}

impl LogEvent {
    /// Create an event stamped with the current time and process id.
    pub fn new(
        category_name: impl Into<String>,
        level: Level,
        data: Vec<Value>,
        context: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            start_time: Utc::now(),
            category_name: category_name.into(),
            level,
            data,
            context,
            pid: std::process::id(),
            location: None,
            cluster: None,
            remote_address: None,
            remote_port: None,
        }
    }

    pub fn with_location(mut self, location: CallSite) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterInfo) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Data values joined with spaces, the way simple layouts print them
    pub fn message(&self) -> String {
        self.data
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Encode to the JSON wire form
    pub fn serialise(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireEvent::from(self))
    }

    /// Strict decode. Fails if the text is not JSON or lacks the event shape.
    pub fn try_deserialise(text: &str, levels: &LevelRegistry) -> Result<Self, serde_json::Error> {
        let wire: WireEvent = serde_json::from_str(text)?;
        wire.into_event(levels)
    }

    /// Lenient decode: malformed input becomes an ERROR event in the
    /// internal category that carries the raw text and the parse error.
    pub fn deserialise(text: &str, levels: &LevelRegistry) -> Self {
        match Self::try_deserialise(text, levels) {
            Ok(event) => event,
            Err(e) => Self::unparseable(text, &e, levels),
        }
    }

    fn unparseable(raw: &str, err: &serde_json::Error, levels: &LevelRegistry) -> Self {
        let fallback = Level::new(ERROR, 40000, Colour::Red);
        let level = levels.get_or(ERROR, &fallback).clone();
        Self::new(
            INTERNAL_CATEGORY,
            level,
            vec![
                Value::from("Unable to parse log:"),
                Value::from(raw),
                Value::from("because: "),
                Value::Error(ErrorRecord::from_error(err)),
            ],
            BTreeMap::new(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireLevel {
    level: i64,
    #[serde(rename = "levelStr")]
    level_str: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    colour: Option<Colour>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    start_time: String,
    category_name: String,
    level: WireLevel,
    #[serde(default)]
    data: Vec<Json>,
    #[serde(default)]
    context: Map<String, Json>,
    #[serde(default)]
    pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cluster: Option<ClusterInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    column_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call_stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_port: Option<u16>,
}

impl From<&LogEvent> for WireEvent {
    fn from(event: &LogEvent) -> Self {
        let location = event.location.as_ref();
        Self {
            start_time: event
                .start_time
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            category_name: event.category_name.clone(),
            level: WireLevel {
                level: event.level.value(),
                level_str: event.level.name().to_string(),
                colour: Some(event.level.colour()),
            },
            data: event.data.iter().map(Value::to_json).collect(),
            context: event
                .context
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
            pid: event.pid,
            cluster: event.cluster.clone(),
            function_name: location.and_then(|l| l.function_name.clone()),
            file_name: location.map(|l| l.file_name.clone()),
            line_number: location.map(|l| l.line_number),
            column_number: location.map(|l| l.column_number),
            call_stack: location.and_then(|l| l.call_stack.clone()),
            remote_address: event.remote_address.clone(),
            remote_port: event.remote_port,
        }
    }
}

impl WireEvent {
    fn into_event(self, levels: &LevelRegistry) -> Result<LogEvent, serde_json::Error> {
        let start_time = DateTime::parse_from_rfc3339(&self.start_time)
            .map_err(|e| {
                <serde_json::Error as serde::de::Error>::custom(format!(
                    "invalid startTime {:?}: {}",
                    self.start_time, e
                ))
            })?
            .with_timezone(&Utc);

        // Known names resolve through the registry; unknown ones keep the
        // sender's definition.
        let level = match levels.get(&self.level.level_str) {
            Some(level) => level.clone(),
            None => Level::new(
                &self.level.level_str,
                self.level.level,
                self.level.colour.unwrap_or(Colour::Grey),
            ),
        };

        let location = self.file_name.map(|file_name| CallSite {
            function_name: self.function_name,
            file_name,
            line_number: self.line_number.unwrap_or_default(),
            column_number: self.column_number.unwrap_or_default(),
            call_stack: self.call_stack,
        });

        Ok(LogEvent {
            start_time,
            category_name: self.category_name,
            level,
            data: self.data.into_iter().map(Value::from_json).collect(),
            context: self
                .context
                .into_iter()
                .map(|(k, v)| (k, Value::from_json(v)))
                .collect(),
            pid: self.pid,
            location,
            cluster: self.cluster,
            remote_address: self.remote_address,
            remote_port: self.remote_port,
        })
    }
}
