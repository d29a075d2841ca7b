//! `stdout` and `stderr` appenders.

use std::io::Write;
use std::sync::Arc;

use crate::appenders::{Appender, AppenderConfig, AppenderFactory};
use crate::event::LogEvent;
use crate::layout::Layout;
use crate::resolver::AppenderContext;

/// Which standard stream to write to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

/// Writes one layout-rendered line per event
pub struct ConsoleAppender {
    stream: ConsoleStream,
    layout: Layout,
}

impl ConsoleAppender {
    pub fn new(stream: ConsoleStream, layout: Layout) -> Self {
        Self { stream, layout }
    }
}

impl Appender for ConsoleAppender {
    fn append(&self, event: &LogEvent) -> anyhow::Result<()> {
        let line = (self.layout)(event);
        match self.stream {
            ConsoleStream::Stdout => writeln!(std::io::stdout().lock(), "{}", line)?,
            ConsoleStream::Stderr => writeln!(std::io::stderr().lock(), "{}", line)?,
        }
        Ok(())
    }
}

pub struct ConsoleFactory(pub ConsoleStream);

impl AppenderFactory for ConsoleFactory {
    fn build(
        &self,
        config: &AppenderConfig,
        ctx: &mut AppenderContext<'_, '_>,
    ) -> anyhow::Result<Arc<dyn Appender>> {
        let layout = ctx.layouts().layout(config.get("layout"))?;
        Ok(Arc::new(ConsoleAppender::new(self.0, layout)))
    }
}
