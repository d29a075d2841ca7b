//! Appenders that wrap another appender by name.
//!
//! Both types declare the wrapped appender as a dependency, which is what
//! makes the appender graph (and loop detection) necessary at all.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::appenders::{Appender, AppenderConfig, AppenderFactory};
use crate::event::LogEvent;
use crate::level::{SharedLevels, FATAL};
use crate::resolver::AppenderContext;

fn wrapped_name(config: &AppenderConfig) -> Vec<String> {
    config
        .get("appender")
        .and_then(Json::as_str)
        .map(|name| vec![name.to_string()])
        .unwrap_or_default()
}

fn required_appender(config: &AppenderConfig) -> anyhow::Result<&str> {
    Ok(config
        .str_field("appender")?
        .ok_or_else(|| config.invalid("must name the appender to wrap in \"appender\""))?)
}

/// Passes events whose level lies within `[level, maxLevel]`
struct LevelFilter {
    inner: Arc<dyn Appender>,
    min: String,
    max: String,
    levels: SharedLevels,
}

impl Appender for LevelFilter {
    fn append(&self, event: &LogEvent) -> anyhow::Result<()> {
        let levels = self.levels.current();
        let level = levels.get(event.level.name()).unwrap_or(&event.level);
        let above_min = levels
            .get(&self.min)
            .map(|min| level.is_greater_than_or_equal_to(min))
            .unwrap_or(true);
        let below_max = levels
            .get(&self.max)
            .map(|max| level.is_less_than_or_equal_to(max))
            .unwrap_or(true);
        if above_min && below_max {
            self.inner.append(event)?;
        }
        Ok(())
    }
}

/// `logLevelFilter`: `{ appender, level, maxLevel? }`
pub struct LevelFilterFactory;

impl AppenderFactory for LevelFilterFactory {
    fn dependencies(&self, config: &AppenderConfig) -> Vec<String> {
        wrapped_name(config)
    }

    fn build(
        &self,
        config: &AppenderConfig,
        ctx: &mut AppenderContext<'_, '_>,
    ) -> anyhow::Result<Arc<dyn Appender>> {
        let target = required_appender(config)?;
        let min = config
            .str_field("level")?
            .ok_or_else(|| config.invalid("must have a \"level\""))?;
        let max = config.str_field("maxLevel")?.unwrap_or(FATAL);
        for name in [min, max] {
            if ctx.levels().get(name).is_none() {
                return Err(config
                    .invalid(format!("level \"{}\" not recognised", name))
                    .into());
            }
        }

        let inner = ctx.find_appender(target)?;
        Ok(Arc::new(LevelFilter {
            inner,
            min: min.to_string(),
            max: max.to_string(),
            levels: ctx.shared_levels(),
        }))
    }
}

/// Drops events from the excluded categories
struct CategoryFilter {
    inner: Arc<dyn Appender>,
    exclude: Vec<String>,
}

impl Appender for CategoryFilter {
    fn append(&self, event: &LogEvent) -> anyhow::Result<()> {
        if self.exclude.iter().any(|c| c == &event.category_name) {
            return Ok(());
        }
        self.inner.append(event)
    }
}

/// `categoryFilter`: `{ appender, exclude: string | [string] }`
pub struct CategoryFilterFactory;

impl AppenderFactory for CategoryFilterFactory {
    fn dependencies(&self, config: &AppenderConfig) -> Vec<String> {
        wrapped_name(config)
    }

    fn build(
        &self,
        config: &AppenderConfig,
        ctx: &mut AppenderContext<'_, '_>,
    ) -> anyhow::Result<Arc<dyn Appender>> {
        let target = required_appender(config)?;
        let exclude = match config.get("exclude") {
            None => Vec::new(),
            Some(Json::String(s)) => vec![s.clone()],
            Some(Json::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| config.invalid("exclude must be a string or array of strings"))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(config.invalid("exclude must be a string or array of strings").into()),
        };

        let inner = ctx.find_appender(target)?;
        Ok(Arc::new(CategoryFilter { inner, exclude }))
    }
}
