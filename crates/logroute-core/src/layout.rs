//! Minimal layout registry.
//!
//! A layout turns an event into text. Only a handful of fixed layouts are
//! provided; appenders pick one through their `layout: { type }` key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::SecondsFormat;
use serde_json::Value as Json;

use crate::error::{ConfigError, ConfigResult};
use crate::event::LogEvent;

/// Event → text
pub type Layout = Arc<dyn Fn(&LogEvent) -> String + Send + Sync>;

/// Builds a layout from its config object
pub type LayoutBuilder = Arc<dyn Fn(&Json) -> ConfigResult<Layout> + Send + Sync>;

/// `[time] [LEVEL] category - message`
pub fn basic(event: &LogEvent) -> String {
    format!(
        "[{}] [{}] {} - {}",
        event.start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        event.level,
        event.category_name,
        event.message()
    )
}

/// Only the message
pub fn message_pass_through(event: &LogEvent) -> String {
    event.message()
}

/// Wire JSON of the event
pub fn json(event: &LogEvent) -> String {
    event
        .serialise()
        .unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

/// Layouts by type name
#[derive(Clone)]
pub struct Layouts {
    builders: HashMap<String, LayoutBuilder>,
}

impl Default for Layouts {
    fn default() -> Self {
        let mut layouts = Self {
            builders: HashMap::new(),
        };
        layouts.register_fn("basic", basic);
        layouts.register_fn("messagePassThrough", message_pass_through);
        layouts.register_fn("json", json);
        layouts
    }
}

impl Layouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layout type that needs its config
    pub fn register(&mut self, name: impl Into<String>, builder: LayoutBuilder) {
        self.builders.insert(name.into(), builder);
    }

    /// Register a config-less layout
    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        layout: impl Fn(&LogEvent) -> String + Send + Sync + 'static,
    ) {
        let layout: Layout = Arc::new(layout);
        self.register(name, Arc::new(move |_| Ok(layout.clone())));
    }

    /// Resolve a `layout` config value. `None` means the basic layout.
    pub fn layout(&self, config: Option<&Json>) -> ConfigResult<Layout> {
        let Some(config) = config else {
            return Ok(Arc::new(basic));
        };
        let type_name = config
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| ConfigError::invalid("layout must be an object with property \"type\""))?;
        let builder = self
            .builders
            .get(type_name)
            .ok_or_else(|| ConfigError::invalid(format!("layout \"{}\" could not be found", type_name)))?;
        builder(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LevelRegistry;
    use crate::value::Value;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn event() -> LogEvent {
        let levels = LevelRegistry::new();
        LogEvent::new(
            "app.web",
            levels.get("WARN").unwrap().clone(),
            vec![Value::from("slow request"), Value::Int(350)],
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_basic_layout() {
        let text = basic(&event());
        assert!(text.contains("[WARN] app.web - slow request 350"));
    }

    #[test]
    fn test_registry_lookup() {
        let layouts = Layouts::new();
        let layout = layouts
            .layout(Some(&json!({ "type": "messagePassThrough" })))
            .unwrap();
        assert_eq!(layout(&event()), "slow request 350");

        let default = layouts.layout(None).unwrap();
        assert!(default(&event()).starts_with('['));
    }

    #[test]
    fn test_unknown_layout() {
        let layouts = Layouts::new();
        let err = match layouts.layout(Some(&json!({ "type": "pattern" }))) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.to_string().contains("layout \"pattern\" could not be found"));
    }
}
