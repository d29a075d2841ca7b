//! Appender plugin seam and the built-in appender types.
//!
//! An appender is the opaque sink at the end of the pipeline. Appender
//! types are looked up by name in an [`AppenderRegistry`]: factories
//! registered by the embedding program first, then the built-ins.
//!
//! | type              | module                    |
//! |-------------------|---------------------------|
//! | `stdout`/`stderr` | [`console`]               |
//! | `recording`       | [`recording`]             |
//! | `logLevelFilter`  | [`filter`]                |
//! | `categoryFilter`  | [`filter`]                |
//! | `tcp`             | [`crate::forward::client`]|
//! | `tcp-server`      | [`crate::forward::server`]|

pub mod console;
pub mod filter;
pub mod recording;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value as Json};

use crate::error::{ConfigError, ConfigResult};
use crate::event::LogEvent;
use crate::resolver::AppenderContext;

pub use console::{ConsoleAppender, ConsoleFactory, ConsoleStream};
pub use filter::{CategoryFilterFactory, LevelFilterFactory};
pub use recording::{Recording, RecordingFactory};

/// Output sink for log events
pub trait Appender: Send + Sync {
    /// Handle one event. Errors are reported by the runtime and never reach
    /// the log call site.
    fn append(&self, event: &LogEvent) -> anyhow::Result<()>;

    /// Release resources. Must tolerate being called more than once.
    fn shutdown(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

struct FnAppender<F>(F);

impl<F> Appender for FnAppender<F>
where
    F: Fn(&LogEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn append(&self, event: &LogEvent) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

/// Wrap a closure as an appender without a shutdown hook
pub fn appender_fn<F>(f: F) -> Arc<dyn Appender>
where
    F: Fn(&LogEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnAppender(f))
}

/// One entry of the `appenders` config section
#[derive(Debug, Clone, PartialEq)]
pub struct AppenderConfig {
    /// Key under `appenders`
    pub name: String,
    /// The `type` field
    pub type_name: String,
    /// Every field, including `type`
    pub fields: Map<String, Json>,
}

impl AppenderConfig {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let mut fields = Map::new();
        fields.insert("type".to_string(), Json::String(type_name.clone()));
        Self {
            name: name.into(),
            type_name,
            fields,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Json) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.fields.get(key)
    }

    /// Optional string field; present but not a string is an error
    pub fn str_field(&self, key: &str) -> ConfigResult<Option<&str>> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Json::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.invalid(format!("{} must be a string", key))),
        }
    }

    /// Optional non-negative integer field
    pub fn u64_field(&self, key: &str) -> ConfigResult<Option<u64>> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("{} must be a non-negative integer", key))),
        }
    }

    /// Error naming this appender
    pub fn invalid(&self, detail: impl AsRef<str>) -> ConfigError {
        ConfigError::invalid(format!(
            "appender \"{}\" is not valid ({})",
            self.name,
            detail.as_ref()
        ))
    }
}

/// Builds appenders of one type
pub trait AppenderFactory: Send + Sync {
    /// Names of other appenders this one will request while building.
    /// Used to reject dependency loops before anything is instantiated.
    fn dependencies(&self, _config: &AppenderConfig) -> Vec<String> {
        Vec::new()
    }

    /// Instantiated even when no category references it
    fn always_on(&self) -> bool {
        false
    }

    fn build(
        &self,
        config: &AppenderConfig,
        ctx: &mut AppenderContext<'_, '_>,
    ) -> anyhow::Result<Arc<dyn Appender>>;
}

/// Appender type name → factory
#[derive(Clone, Default)]
pub struct AppenderRegistry {
    custom: HashMap<String, Arc<dyn AppenderFactory>>,
    builtin: HashMap<String, Arc<dyn AppenderFactory>>,
}

impl AppenderRegistry {
    /// Registry holding every built-in type. `recording` appenders write
    /// into the given store.
    pub fn with_builtins(recording: Recording) -> Self {
        let mut builtin: HashMap<String, Arc<dyn AppenderFactory>> = HashMap::new();
        builtin.insert("stdout".into(), Arc::new(ConsoleFactory(ConsoleStream::Stdout)));
        builtin.insert("stderr".into(), Arc::new(ConsoleFactory(ConsoleStream::Stderr)));
        builtin.insert("recording".into(), Arc::new(RecordingFactory::new(recording)));
        builtin.insert("logLevelFilter".into(), Arc::new(LevelFilterFactory));
        builtin.insert("categoryFilter".into(), Arc::new(CategoryFilterFactory));
        builtin.insert("tcp".into(), Arc::new(crate::forward::TcpAppenderFactory));
        builtin.insert("tcp-server".into(), Arc::new(crate::forward::TcpServerFactory));
        Self {
            custom: HashMap::new(),
            builtin,
        }
    }

    /// Register a factory. Takes precedence over a built-in of the same name.
    pub fn register(&mut self, type_name: impl Into<String>, factory: Arc<dyn AppenderFactory>) {
        self.custom.insert(type_name.into(), factory);
    }

    pub fn lookup(&self, type_name: &str) -> Option<Arc<dyn AppenderFactory>> {
        self.custom
            .get(type_name)
            .or_else(|| self.builtin.get(type_name))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Nothing;

    impl AppenderFactory for Nothing {
        fn build(
            &self,
            _config: &AppenderConfig,
            _ctx: &mut AppenderContext<'_, '_>,
        ) -> anyhow::Result<Arc<dyn Appender>> {
            Ok(appender_fn(|_| Ok(())))
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = AppenderRegistry::with_builtins(Recording::default());
        for name in [
            "stdout",
            "stderr",
            "recording",
            "logLevelFilter",
            "categoryFilter",
            "tcp",
            "tcp-server",
        ] {
            assert!(registry.lookup(name).is_some(), "missing {}", name);
        }
        assert!(registry.lookup("smtp").is_none());
    }

    #[test]
    fn test_custom_factory_shadows_builtin() {
        let mut registry = AppenderRegistry::with_builtins(Recording::default());
        registry.register("stdout", Arc::new(Nothing));
        let factory = registry.lookup("stdout").unwrap();
        assert!(!factory.always_on());
        assert!(factory
            .dependencies(&AppenderConfig::new("x", "stdout"))
            .is_empty());
    }

    #[test]
    fn test_config_field_helpers() {
        let config = AppenderConfig::new("net", "tcp")
            .with_field("host", json!("example.org"))
            .with_field("port", json!(7000))
            .with_field("endMsg", json!(5));

        assert_eq!(config.str_field("host").unwrap(), Some("example.org"));
        assert_eq!(config.u64_field("port").unwrap(), Some(7000));
        assert_eq!(config.u64_field("missing").unwrap(), None);
        let err = config.str_field("endMsg").unwrap_err();
        assert!(err
            .to_string()
            .contains("appender \"net\" is not valid (endMsg must be a string)"));
    }
}
