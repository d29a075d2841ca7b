//! In-memory appender.
//!
//! Every `recording` appender of a runtime writes into the same
//! [`Recording`], which the embedding program can replay. Mostly useful in
//! tests and for inspecting what a configuration actually routes.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::appenders::{Appender, AppenderConfig, AppenderFactory};
use crate::event::LogEvent;
use crate::resolver::AppenderContext;

/// Shared store of recorded events
#[derive(Clone, Default)]
pub struct Recording {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: LogEvent) {
        self.events.lock().push(event);
    }

    /// Snapshot of every event recorded so far, oldest first
    pub fn replay(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Forget everything recorded
    pub fn reset(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct RecordingAppender {
    store: Recording,
}

impl Appender for RecordingAppender {
    fn append(&self, event: &LogEvent) -> anyhow::Result<()> {
        self.store.record(event.clone());
        Ok(())
    }
}

pub struct RecordingFactory {
    store: Recording,
}

impl RecordingFactory {
    pub fn new(store: Recording) -> Self {
        Self { store }
    }
}

impl AppenderFactory for RecordingFactory {
    fn build(
        &self,
        _config: &AppenderConfig,
        _ctx: &mut AppenderContext<'_, '_>,
    ) -> anyhow::Result<Arc<dyn Appender>> {
        Ok(Arc::new(RecordingAppender {
            store: self.store.clone(),
        }))
    }
}
