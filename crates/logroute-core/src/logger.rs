//! Category-bound logging handle.

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ConfigResult;
use crate::event::{CallSite, LogEvent};
use crate::level::{is_valid_level_name, Level, DEBUG, ERROR, FATAL, INFO, MARK, TRACE, WARN};
use crate::runtime::Runtime;
use crate::value::Value;

/// Post-processes the captured call site. Returning `None` drops it.
pub type CallStackParser = Arc<dyn Fn(&CallSite) -> Option<CallSite> + Send + Sync>;

/// Logs into one category of a [`Runtime`].
///
/// The logger holds a handle to the runtime, not a copy of its state, so
/// it always sees the current generation.
pub struct Logger {
    category: String,
    runtime: Runtime,
    context: Mutex<BTreeMap<String, Value>>,
    parser: Mutex<Option<CallStackParser>>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("category", &self.category)
            .finish()
    }
}

impl Logger {
    pub(crate) fn new(category: impl Into<String>, runtime: Runtime) -> Self {
        Self {
            category: category.into(),
            runtime,
            context: Mutex::new(BTreeMap::new()),
            parser: Mutex::new(None),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Log `data` at the level named `level`.
    ///
    /// An unknown level name does not fail: a valid identifier is reported
    /// with a WARN event and the data is logged at INFO prefixed with
    /// `[name]`; anything else is logged at INFO with the name as the first
    /// value.
    #[track_caller]
    pub fn log(&self, level: impl AsRef<str>, data: Vec<Value>) {
        let name = level.as_ref();
        let levels = self.runtime.levels();
        match levels.get(name) {
            Some(level) => self.emit(level.clone(), data, Location::caller()),
            None => self.log_unknown_level(name, data),
        }
    }

    #[track_caller]
    fn log_unknown_level(&self, name: &str, data: Vec<Value>) {
        let levels = self.runtime.levels();
        let (Some(warn), Some(info)) = (levels.get(WARN).cloned(), levels.get(INFO).cloned()) else {
            return;
        };
        let caller = Location::caller();

        if is_valid_level_name(name) && !data.is_empty() {
            self.emit(
                warn,
                vec![
                    "logroute: Logger::log called with an unregistered level name:".into(),
                    name.into(),
                ],
                caller,
            );
            let mut prefixed = Vec::with_capacity(data.len() + 1);
            prefixed.push(Value::from(format!("[{}]", name)));
            prefixed.extend(data);
            self.emit(info, prefixed, caller);
        } else {
            let mut all = Vec::with_capacity(data.len() + 1);
            all.push(Value::from(name));
            all.extend(data);
            self.emit(info, all, caller);
        }
    }

    fn emit(&self, level: Level, data: Vec<Value>, caller: &'static Location<'static>) {
        if !self.is_level_enabled(&level) {
            return;
        }

        let context = self.context.lock().clone();
        let mut event = LogEvent::new(self.category.clone(), level, data, context);
        if self.runtime.call_stack_enabled_for(&self.category) {
            if let Some(site) = self.call_site(caller) {
                event = event.with_location(site);
            }
        }
        self.runtime.dispatch(&event);
    }

    fn call_site(&self, caller: &'static Location<'static>) -> Option<CallSite> {
        let site = CallSite {
            function_name: None,
            file_name: caller.file().to_string(),
            line_number: caller.line(),
            column_number: caller.column(),
            call_stack: Some(Backtrace::force_capture().to_string()),
        };
        match self.parser.lock().as_ref() {
            Some(parse) => parse(&site),
            None => Some(site),
        }
    }

    /// Whether an event at `level` would pass this category's threshold
    pub fn is_level_enabled(&self, level: &Level) -> bool {
        let levels = self.runtime.levels();
        let level = levels.get(level.name()).unwrap_or(level);
        level.is_greater_than_or_equal_to(&self.runtime.level_for(&self.category))
    }

    fn is_named_enabled(&self, name: &str) -> bool {
        self.runtime
            .levels()
            .get(name)
            .map(|level| self.is_level_enabled(level))
            .unwrap_or(false)
    }

    pub fn is_trace_enabled(&self) -> bool {
        self.is_named_enabled(TRACE)
    }

    pub fn is_debug_enabled(&self) -> bool {
        self.is_named_enabled(DEBUG)
    }

    pub fn is_info_enabled(&self) -> bool {
        self.is_named_enabled(INFO)
    }

    pub fn is_warn_enabled(&self) -> bool {
        self.is_named_enabled(WARN)
    }

    pub fn is_error_enabled(&self) -> bool {
        self.is_named_enabled(ERROR)
    }

    pub fn is_fatal_enabled(&self) -> bool {
        self.is_named_enabled(FATAL)
    }

    #[track_caller]
    pub fn trace(&self, message: impl Into<Value>) {
        self.log(TRACE, vec![message.into()]);
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<Value>) {
        self.log(DEBUG, vec![message.into()]);
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<Value>) {
        self.log(INFO, vec![message.into()]);
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<Value>) {
        self.log(WARN, vec![message.into()]);
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<Value>) {
        self.log(ERROR, vec![message.into()]);
    }

    #[track_caller]
    pub fn fatal(&self, message: impl Into<Value>) {
        self.log(FATAL, vec![message.into()]);
    }

    #[track_caller]
    pub fn mark(&self, message: impl Into<Value>) {
        self.log(MARK, vec![message.into()]);
    }

    /// Threshold of this logger's category
    pub fn level(&self) -> Level {
        self.runtime.level_for(&self.category)
    }

    /// Set the level of this logger's category (and, through inheritance
    /// lookup, of unconfigured children).
    pub fn set_level(&self, level: &str) -> ConfigResult<()> {
        self.runtime.set_level(&self.category, level)
    }

    pub fn use_call_stack(&self) -> bool {
        self.runtime.call_stack_enabled_for(&self.category)
    }

    pub fn set_use_call_stack(&self, enabled: bool) {
        self.runtime.set_enable_call_stack(&self.category, enabled);
    }

    /// Add a key copied into every subsequent event of this logger
    pub fn add_context(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.lock().insert(key.into(), value.into());
    }

    pub fn remove_context(&self, key: &str) {
        self.context.lock().remove(key);
    }

    pub fn clear_context(&self) {
        self.context.lock().clear();
    }

    /// Replace the call-site post-processor. `None` restores the default.
    pub fn set_parse_call_stack_fn(&self, parser: Option<CallStackParser>) {
        *self.parser.lock() = parser;
    }
}
