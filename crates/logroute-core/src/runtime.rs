//! The logging runtime.
//!
//! A [`Runtime`] owns everything that would otherwise be process-wide
//! state: the level registry, the current [`Generation`], the appender and
//! layout registries, and the optional cluster role. It is cheap to clone;
//! every clone (and every [`Logger`]) sees the same generation.
//!
//! ## Generations
//!
//! `configure()` validates and resolves a configuration off to the side,
//! then swaps the result in with a single pointer write. Readers clone the
//! `Arc<Generation>` and never observe a half-built table. The replaced
//! generation's appenders are shut down in the background.
//!
//! ## Dispatch
//!
//! ```text
//! Logger::log ──level gate──► Runtime::dispatch
//!                                 │
//!                   writes off? ──┴─► drop
//!                   cluster worker? ─► ClusterHost::send
//!                   otherwise ───────► every appender of the category
//! ```
//!
//! An appender that returns `Err` or panics is reported on the
//! `logroute::diagnostics` tracing target and the remaining appenders still
//! run.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value as Json;
use tracing::{debug, error, info, warn};

use crate::appenders::{
    Appender, AppenderFactory, AppenderRegistry, ConsoleAppender, ConsoleStream, Recording,
};
use crate::categories::{AppenderRef, CategoryTable, ResolvedCategory};
use crate::cluster::{ClusterHost, ClusterMessage, Clustering};
use crate::config;
use crate::error::{ConfigError, ConfigResult, ShutdownError};
use crate::event::LogEvent;
use crate::layout::{self, LayoutBuilder, Layouts};
use crate::level::{Colour, Level, LevelRegistry, SharedLevels, OFF};
use crate::logger::Logger;
use crate::resolver::{self, BuildInputs, Generation};

/// Tracing target for failures inside the logging pipeline itself
pub const DIAGNOSTICS: &str = "logroute::diagnostics";

struct RuntimeInner {
    levels: SharedLevels,
    generation: RwLock<Arc<Generation>>,
    enabled: AtomicBool,
    registry: RwLock<AppenderRegistry>,
    layouts: RwLock<Layouts>,
    recording: Recording,
    cluster: Option<Clustering>,
}

/// Handle to a logging runtime
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime in the boot configuration: one `stdout` appender named `out`,
    /// category `default` at `OFF`.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Runtime that takes its master/worker role from `host`
    pub fn clustered(host: Arc<dyn ClusterHost>) -> Self {
        Self::build(Some(Clustering::new(host)))
    }

    fn build(cluster: Option<Clustering>) -> Self {
        let recording = Recording::new();
        Self {
            inner: Arc::new(RuntimeInner {
                levels: SharedLevels::new(LevelRegistry::new()),
                generation: RwLock::new(Arc::new(boot_generation())),
                enabled: AtomicBool::new(true),
                registry: RwLock::new(AppenderRegistry::with_builtins(recording.clone())),
                layouts: RwLock::new(Layouts::default()),
                recording,
                cluster,
            }),
        }
    }

    /// Validate and apply a configuration.
    ///
    /// Nothing is committed unless every step succeeds: on error the
    /// previous generation and level registry stay active.
    pub fn configure(&self, config: &Json) -> ConfigResult<()> {
        let registry = self.inner.registry.read().clone();
        let layouts = self.inner.layouts.read().clone();
        let validated = config::validate(config, &self.inner.levels.current(), &registry)?;

        let is_master = validated.disable_clustering
            || self.inner.cluster.as_ref().map_or(true, Clustering::is_master);

        let mut abandoned = Vec::new();
        let inputs = BuildInputs {
            registry: &registry,
            layouts: &layouts,
            shared_levels: self.inner.levels.clone(),
            dispatcher: self.dispatcher(),
            instantiate: is_master,
        };
        let generation = match resolver::build_generation(&validated, inputs, &mut abandoned) {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "configuration rejected");
                shutdown_in_background(abandoned);
                return Err(e);
            }
        };

        let appender_count = generation.appenders.len();
        let category_count = generation.categories.names().len();
        self.inner.levels.replace(validated.levels);
        let previous = std::mem::replace(&mut *self.inner.generation.write(), Arc::new(generation));
        self.inner.enabled.store(true, Ordering::SeqCst);

        info!(
            appenders = appender_count,
            categories = category_count,
            is_master,
            "logging configured"
        );
        shutdown_in_background(previous.appenders.clone());
        Ok(())
    }

    /// Stop writing and shut down every appender of the current generation.
    ///
    /// Appenders shut down concurrently. Calling this again is harmless;
    /// `configure()` turns writes back on.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        self.inner.enabled.store(false, Ordering::SeqCst);
        let generation = self.generation();
        debug!(appenders = generation.appenders.len(), "shutting down");
        shutdown_all(&generation.appenders).await
    }

    /// Whether dispatch currently reaches appenders
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Logger for `category`; an empty name means `default`
    pub fn get_logger(&self, category: &str) -> Logger {
        let name = if category.is_empty() {
            config::DEFAULT_CATEGORY
        } else {
            category
        };
        Logger::new(name, self.clone())
    }

    /// Current level registry snapshot
    pub fn levels(&self) -> Arc<LevelRegistry> {
        self.inner.levels.current()
    }

    /// Register (or overwrite) a level outside of `configure()`
    pub fn register_level(&self, name: &str, value: i64, colour: Colour) -> ConfigResult<Level> {
        let mut next = (*self.inner.levels.current()).clone();
        let level = next.register(name, value, colour)?;
        self.inner.levels.replace(next);
        Ok(level)
    }

    /// Threshold level of `category`, re-resolved through the registry
    pub fn level_for(&self, category: &str) -> Level {
        let generation = self.generation();
        let levels = self.levels();
        let name = generation.categories.level_name_for(category);
        levels
            .get(name)
            .cloned()
            .unwrap_or_else(|| Level::new(OFF, i64::MAX, Colour::Grey))
    }

    /// Appenders `category` routes to
    pub fn appenders_for(&self, category: &str) -> Vec<AppenderRef> {
        self.generation().categories.appenders_for(category).to_vec()
    }

    /// Categories with their own entry, `default` included
    pub fn category_names(&self) -> Vec<String> {
        self.generation()
            .categories
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn call_stack_enabled_for(&self, category: &str) -> bool {
        self.generation().categories.call_stack_enabled_for(category)
    }

    /// Set the level of one category. An unconfigured category gets its own
    /// entry with its nearest ancestor's appenders.
    pub fn set_level(&self, category: &str, level: &str) -> ConfigResult<()> {
        let levels = self.levels();
        let level = levels.get(level).ok_or_else(|| {
            ConfigError::invalid(format!(
                "level \"{}\" not recognised; valid levels are {}",
                level,
                levels.names()
            ))
        })?;
        let name = level.name().to_string();
        self.publish(|table| table.with_level(category, &name));
        Ok(())
    }

    pub fn set_enable_call_stack(&self, category: &str, enabled: bool) {
        self.publish(|table| table.with_call_stack(category, enabled));
    }

    fn publish(&self, update: impl FnOnce(&CategoryTable) -> CategoryTable) {
        let mut slot = self.inner.generation.write();
        let next = Generation {
            categories: update(&slot.categories),
            ..(**slot).clone()
        };
        *slot = Arc::new(next);
    }

    /// Route an event without applying the level gate.
    ///
    /// This is the entry point for events that were already accepted
    /// elsewhere, such as events received from workers.
    pub fn dispatch(&self, event: &LogEvent) {
        if !self.is_enabled() {
            return;
        }

        let generation = self.generation();
        if let Some(cluster) = &self.inner.cluster {
            if !cluster.is_master() && !generation.disable_clustering {
                if let Err(e) = cluster.send(event) {
                    error!(target: DIAGNOSTICS, error = %e, "failed to send event to cluster master");
                }
                return;
            }
        }

        fan_out(&generation, event);
    }

    /// Handle a message from a cluster worker. Other topics are ignored.
    pub fn receive_cluster_message(&self, message: &ClusterMessage) {
        if !message.is_log() {
            debug!(topic = %message.topic, "ignoring cluster message");
            return;
        }
        if !self.is_enabled() {
            return;
        }
        let event = LogEvent::deserialise(&message.data, &self.levels());
        fan_out(&self.generation(), &event);
    }

    /// Store shared by every `recording` appender of this runtime
    pub fn recording(&self) -> Recording {
        self.inner.recording.clone()
    }

    /// Register an appender type for future `configure()` calls
    pub fn register_appender_type(
        &self,
        type_name: impl Into<String>,
        factory: Arc<dyn AppenderFactory>,
    ) {
        self.inner.registry.write().register(type_name, factory);
    }

    /// Register a layout type for future `configure()` calls
    pub fn register_layout(&self, name: impl Into<String>, builder: LayoutBuilder) {
        self.inner.layouts.write().register(name, builder);
    }

    /// Weak handle for appenders that feed events back into this runtime
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn generation(&self) -> Arc<Generation> {
        self.inner.generation.read().clone()
    }
}

/// Non-owning dispatch handle.
///
/// Held by receiving appenders so the generation that owns them does not
/// keep the runtime alive. Once the runtime is dropped, dispatch is a no-op.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Weak<RuntimeInner>,
}

impl Dispatcher {
    pub fn dispatch(&self, event: &LogEvent) {
        if let Some(inner) = self.inner.upgrade() {
            Runtime { inner }.dispatch(event);
        }
    }

    /// Registry used to decode received events
    pub fn levels(&self) -> Arc<LevelRegistry> {
        self.inner
            .upgrade()
            .map(|inner| inner.levels.current())
            .unwrap_or_default()
    }
}

fn boot_generation() -> Generation {
    let out: Arc<dyn Appender> = Arc::new(ConsoleAppender::new(
        ConsoleStream::Stdout,
        Arc::new(layout::basic),
    ));
    let default = ResolvedCategory {
        appenders: vec![AppenderRef {
            name: "out".to_string(),
            sink: out.clone(),
        }],
        level: OFF.to_string(),
        enable_call_stack: false,
    };
    Generation {
        categories: CategoryTable::new(default, HashMap::new()),
        appenders: vec![("out".to_string(), out)],
        disable_clustering: false,
    }
}

fn fan_out(generation: &Generation, event: &LogEvent) {
    for appender in generation.categories.appenders_for(&event.category_name) {
        match panic::catch_unwind(AssertUnwindSafe(|| appender.sink.append(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(target: DIAGNOSTICS, appender = %appender.name, error = %e, "appender failed");
            }
            Err(payload) => {
                error!(
                    target: DIAGNOSTICS,
                    appender = %appender.name,
                    panic = %panic_message(payload.as_ref()),
                    "appender panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn shutdown_all(appenders: &[(String, Arc<dyn Appender>)]) -> Result<(), ShutdownError> {
    let results = join_all(appenders.iter().map(|(_, appender)| appender.shutdown())).await;

    let mut failed = 0;
    let mut first = None;
    for ((name, _), result) in appenders.iter().zip(results) {
        if let Err(e) = result {
            error!(target: DIAGNOSTICS, appender = %name, error = %e, "appender shutdown failed");
            failed += 1;
            first.get_or_insert(e);
        }
    }

    match first {
        Some(first) => Err(ShutdownError { failed, first }),
        None => Ok(()),
    }
}

fn shutdown_in_background(appenders: Vec<(String, Arc<dyn Appender>)>) {
    if appenders.is_empty() {
        return;
    }
    let task = async move {
        // Failures are already reported per appender
        let _ = shutdown_all(&appenders).await;
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => futures::executor::block_on(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appenders::appender_fn;
    use crate::resolver::AppenderContext;
    use crate::appenders::AppenderConfig;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn recorded(runtime: &Runtime) -> Vec<String> {
        runtime
            .recording()
            .replay()
            .iter()
            .map(|e| format!("{} {}", e.category_name, e.message()))
            .collect()
    }

    fn recording_config(level: &str) -> Json {
        json!({
            "appenders": { "mem": { "type": "recording" } },
            "categories": { "default": { "appenders": ["mem"], "level": level } }
        })
    }

    #[test]
    fn test_boot_configuration() {
        let runtime = Runtime::new();
        assert_eq!(runtime.level_for("anything").name(), "OFF");
        let names: Vec<String> = runtime
            .appenders_for("default")
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["out"]);
    }

    #[test]
    fn test_configure_then_log() {
        let runtime = Runtime::new();
        runtime.configure(&recording_config("info")).unwrap();

        let logger = runtime.get_logger("app");
        logger.info("kept");
        logger.debug("dropped");

        assert_eq!(recorded(&runtime), vec!["app kept"]);
    }

    #[test]
    fn test_failed_configure_keeps_previous_generation() {
        let runtime = Runtime::new();
        runtime.configure(&recording_config("info")).unwrap();

        let err = runtime
            .configure(&json!({ "appenders": {}, "categories": {} }))
            .unwrap_err();
        assert!(err.to_string().contains("must define at least one appender."));

        runtime.get_logger("app").info("still routed");
        assert_eq!(recorded(&runtime), vec!["app still routed"]);
    }

    #[test]
    fn test_failed_configure_does_not_commit_levels() {
        let runtime = Runtime::new();
        let err = runtime.configure(&json!({
            "levels": { "notice": { "value": 25000, "colour": "cyan" } },
            "appenders": { "mem": { "type": "recording" } },
            "categories": { "default": { "appenders": ["missing"], "level": "notice" } }
        }));
        assert!(err.is_err());
        assert!(runtime.levels().get("notice").is_none());
    }

    #[test]
    fn test_failing_appender_does_not_stop_fan_out() {
        let runtime = Runtime::new();
        struct Broken;
        impl AppenderFactory for Broken {
            fn build(
                &self,
                _config: &AppenderConfig,
                _ctx: &mut AppenderContext<'_, '_>,
            ) -> anyhow::Result<Arc<dyn Appender>> {
                Ok(appender_fn(|_| anyhow::bail!("disk full")))
            }
        }
        struct Panicky;
        impl AppenderFactory for Panicky {
            fn build(
                &self,
                _config: &AppenderConfig,
                _ctx: &mut AppenderContext<'_, '_>,
            ) -> anyhow::Result<Arc<dyn Appender>> {
                Ok(appender_fn(|_| panic!("boom")))
            }
        }
        runtime.register_appender_type("broken", Arc::new(Broken));
        runtime.register_appender_type("panicky", Arc::new(Panicky));
        runtime
            .configure(&json!({
                "appenders": {
                    "a": { "type": "broken" },
                    "b": { "type": "panicky" },
                    "mem": { "type": "recording" }
                },
                "categories": { "default": { "appenders": ["a", "b", "mem"], "level": "all" } }
            }))
            .unwrap();

        runtime.get_logger("x").error("survives");
        assert_eq!(recorded(&runtime), vec!["x survives"]);
    }

    #[tokio::test]
    async fn test_shutdown_twice_and_no_writes_after() {
        let runtime = Runtime::new();
        runtime.configure(&recording_config("info")).unwrap();

        runtime.shutdown().await.unwrap();
        runtime.get_logger("app").info("after shutdown");
        runtime.shutdown().await.unwrap();

        assert!(runtime.recording().is_empty());
        assert!(!runtime.is_enabled());

        runtime.configure(&recording_config("info")).unwrap();
        runtime.get_logger("app").info("back");
        assert_eq!(recorded(&runtime), vec!["app back"]);
    }

    #[tokio::test]
    async fn test_shutdown_error_aggregates_failures() {
        struct FailsOnShutdown;
        impl Appender for FailsOnShutdown {
            fn append(&self, _event: &LogEvent) -> anyhow::Result<()> {
                Ok(())
            }
            fn shutdown(&self) -> BoxFuture<'_, anyhow::Result<()>> {
                Box::pin(async { anyhow::bail!("flush failed") })
            }
        }
        struct Factory;
        impl AppenderFactory for Factory {
            fn build(
                &self,
                _config: &AppenderConfig,
                _ctx: &mut AppenderContext<'_, '_>,
            ) -> anyhow::Result<Arc<dyn Appender>> {
                Ok(Arc::new(FailsOnShutdown))
            }
        }

        let runtime = Runtime::new();
        runtime.register_appender_type("fails", Arc::new(Factory));
        runtime
            .configure(&json!({
                "appenders": { "a": { "type": "fails" }, "b": { "type": "fails" } },
                "categories": { "default": { "appenders": ["a", "b"], "level": "info" } }
            }))
            .unwrap();

        let err = runtime.shutdown().await.unwrap_err();
        assert_eq!(err.failed, 2);
        assert!(err.first.to_string().contains("flush failed"));
    }

    #[test]
    fn test_set_level_publishes_new_generation() {
        let runtime = Runtime::new();
        runtime.configure(&recording_config("warn")).unwrap();

        runtime.set_level("db", "debug").unwrap();
        assert_eq!(runtime.level_for("db.pool").name(), "DEBUG");
        assert_eq!(runtime.level_for("web").name(), "WARN");
        assert!(runtime.category_names().contains(&"db".to_string()));

        let err = runtime.set_level("db", "chatty").unwrap_err();
        assert!(err.to_string().contains("level \"chatty\" not recognised"));
    }

    #[test]
    fn test_reregistered_level_is_seen_by_categories() {
        let runtime = Runtime::new();
        runtime
            .configure(&json!({
                "levels": { "notice": { "value": 25000, "colour": "cyan" } },
                "appenders": { "mem": { "type": "recording" } },
                "categories": { "default": { "appenders": ["mem"], "level": "notice" } }
            }))
            .unwrap();
        let logger = runtime.get_logger("app");
        assert!(!logger.is_info_enabled());

        runtime.register_level("NOTICE", 15000, Colour::Cyan).unwrap();
        assert!(logger.is_info_enabled());
        assert!(!logger.is_debug_enabled());
    }

    #[test]
    fn test_reconfigure_shuts_down_previous_appenders() {
        let closed = Arc::new(AtomicUsize::new(0));

        struct Tracked(Arc<AtomicUsize>);
        impl Appender for Tracked {
            fn append(&self, _event: &LogEvent) -> anyhow::Result<()> {
                Ok(())
            }
            fn shutdown(&self) -> BoxFuture<'_, anyhow::Result<()>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            }
        }
        struct Factory(Arc<AtomicUsize>);
        impl AppenderFactory for Factory {
            fn build(
                &self,
                _config: &AppenderConfig,
                _ctx: &mut AppenderContext<'_, '_>,
            ) -> anyhow::Result<Arc<dyn Appender>> {
                Ok(Arc::new(Tracked(self.0.clone())))
            }
        }

        let runtime = Runtime::new();
        runtime.register_appender_type("tracked", Arc::new(Factory(closed.clone())));
        let config = json!({
            "appenders": { "t": { "type": "tracked" } },
            "categories": { "default": { "appenders": ["t"], "level": "info" } }
        });
        runtime.configure(&config).unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        runtime.configure(&config).unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatcher_outlives_runtime_quietly() {
        let runtime = Runtime::new();
        runtime.configure(&recording_config("info")).unwrap();
        let dispatcher = runtime.dispatcher();
        let recording = runtime.recording();
        drop(runtime);

        let event = LogEvent::new(
            "late",
            Level::new("INFO", 20000, Colour::Green),
            vec!["ignored".into()],
            Default::default(),
        );
        dispatcher.dispatch(&event);
        assert!(recording.is_empty());
        assert!(dispatcher.levels().get("INFO").is_some());
    }
}
