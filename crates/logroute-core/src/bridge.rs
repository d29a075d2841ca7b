//! `tracing` integration.
//!
//! [`RouteLayer`] turns `tracing` events into logroute events so libraries
//! instrumented with `tracing` are routed by the same category table:
//!
//! ```ignore
//! use tracing_subscriber::prelude::*;
//!
//! let runtime = logroute_core::Runtime::new();
//! tracing_subscriber::registry()
//!     .with(logroute_core::RouteLayer::new(runtime.clone()))
//!     .init();
//! ```
//!
//! The event target becomes the category (`my_app::db` → `my_app.db`). The
//! message is the first data value; remaining fields follow as one object.
//! Targets starting with `logroute` are skipped, since the runtime reports
//! its own failures through `tracing`.

use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::event::{CallSite, LogEvent};
use crate::level::{DEBUG, ERROR, INFO, TRACE, WARN};
use crate::runtime::Runtime;
use crate::value::Value;

/// A tracing Layer that dispatches into a [`Runtime`]
pub struct RouteLayer {
    runtime: Runtime,
}

impl RouteLayer {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }
}

/// Category for a tracing target
pub fn category_for_target(target: &str) -> String {
    target.replace("::", ".")
}

fn level_name(level: &tracing::Level) -> &'static str {
    match *level {
        tracing::Level::TRACE => TRACE,
        tracing::Level::DEBUG => DEBUG,
        tracing::Level::INFO => INFO,
        tracing::Level::WARN => WARN,
        tracing::Level::ERROR => ERROR,
    }
}

impl<S> Layer<S> for RouteLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with("logroute") {
            return;
        }

        let category = category_for_target(metadata.target());
        let levels = self.runtime.levels();
        let Some(level) = levels.get(level_name(metadata.level())).cloned() else {
            return;
        };
        if !level.is_greater_than_or_equal_to(&self.runtime.level_for(&category)) {
            return;
        }

        let mut visitor = ValueVisitor::default();
        event.record(&mut visitor);

        let mut data = vec![Value::from(visitor.message.unwrap_or_default())];
        if !visitor.fields.is_empty() {
            data.push(Value::Object(visitor.fields));
        }

        let mut context = BTreeMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<String> = scope.from_root().map(|span| span.name().to_string()).collect();
            if !spans.is_empty() {
                context.insert("span".to_string(), Value::from(spans.join(" > ")));
            }
        }

        let mut log_event = LogEvent::new(category.clone(), level, data, context);
        if self.runtime.call_stack_enabled_for(&category) {
            if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
                log_event = log_event.with_location(CallSite {
                    function_name: metadata.module_path().map(str::to_string),
                    file_name: file.to_string(),
                    line_number: line,
                    column_number: 0,
                    call_stack: None,
                });
            }
        }

        self.runtime.dispatch(&log_event);
    }
}

/// Collects tracing fields as logroute values
#[derive(Default)]
struct ValueVisitor {
    message: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl Visit for ValueVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);

        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.fields.insert(field.name().to_string(), Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::Int(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let value = i64::try_from(value)
            .map(Value::Int)
            .unwrap_or(Value::Float(value as f64));
        self.fields.insert(field.name().to_string(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::Float(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields.insert(
            field.name().to_string(),
            Value::Error(crate::value::ErrorRecord::from_error(value)),
        );
    }
}
