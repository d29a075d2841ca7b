//! Configuration validation.
//!
//! `validate` checks a JSON configuration object in a fixed order and turns
//! it into a [`ValidatedConfig`]. Every failure is a [`ConfigError`] naming
//! the offending key. Nothing here instantiates an appender.
//!
//! ```text
//! {
//!   "appenders":  { "<name>": { "type": "<type>", ... } },
//!   "categories": { "default": { "appenders": ["<name>"], "level": "info" },
//!                   "a.b":     { "level": "debug", "inherit": true,
//!                                "enableCallStack": false } },
//!   "levels":     { "<NAME>": { "value": 25000, "colour": "cyan" } },   (optional)
//!   "disableClustering": false                                          (optional)
//! }
//! ```

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::appenders::{AppenderConfig, AppenderRegistry};
use crate::error::{ConfigError, ConfigResult};
use crate::level::LevelRegistry;

/// Name of the category every lookup falls back to
pub const DEFAULT_CATEGORY: &str = "default";

/// A category entry as written in the configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CategoryConfig {
    pub appenders: Vec<String>,
    pub level: Option<String>,
    pub enable_call_stack: Option<bool>,
    pub inherit: bool,
}

/// Output of validation, input of resolution
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub appenders: BTreeMap<String, AppenderConfig>,
    pub categories: BTreeMap<String, CategoryConfig>,
    /// Base registry plus the configured custom levels
    pub levels: LevelRegistry,
    pub disable_clustering: bool,
}

fn category_error(name: &str, detail: impl AsRef<str>) -> ConfigError {
    ConfigError::invalid(format!(
        "category \"{}\" is not valid ({})",
        name,
        detail.as_ref()
    ))
}

/// Validate a configuration object.
pub fn validate(
    config: &Json,
    base_levels: &LevelRegistry,
    registry: &AppenderRegistry,
) -> ConfigResult<ValidatedConfig> {
    let root = config
        .as_object()
        .ok_or_else(|| ConfigError::invalid("must be an object."))?;

    // Appenders
    let appenders_json = root
        .get("appenders")
        .and_then(Json::as_object)
        .ok_or_else(|| ConfigError::invalid("must have a property \"appenders\" of type object."))?;
    if appenders_json.is_empty() {
        return Err(ConfigError::invalid("must define at least one appender."));
    }

    let mut appenders = BTreeMap::new();
    for (name, entry) in appenders_json {
        let fields = entry.as_object().ok_or_else(|| {
            ConfigError::invalid(format!(
                "appender \"{}\" is not valid (must be an object with property \"type\")",
                name
            ))
        })?;
        let type_name = fields.get("type").and_then(Json::as_str).ok_or_else(|| {
            ConfigError::invalid(format!(
                "appender \"{}\" is not valid (must be an object with property \"type\")",
                name
            ))
        })?;
        if registry.lookup(type_name).is_none() {
            return Err(ConfigError::invalid(format!(
                "appender \"{}\" is not valid (type \"{}\" could not be found)",
                name, type_name
            )));
        }
        appenders.insert(
            name.clone(),
            AppenderConfig {
                name: name.clone(),
                type_name: type_name.to_string(),
                fields: fields.clone(),
            },
        );
    }

    // Levels
    let mut levels = base_levels.clone();
    if let Some(custom) = root.get("levels") {
        levels.apply_config(custom)?;
    }

    // Categories
    let categories_json = root
        .get("categories")
        .and_then(Json::as_object)
        .ok_or_else(|| ConfigError::invalid("must have a property \"categories\" of type object."))?;
    if categories_json.is_empty() {
        return Err(ConfigError::invalid("must define at least one category."));
    }
    if !categories_json.contains_key(DEFAULT_CATEGORY) {
        return Err(ConfigError::invalid("must define a \"default\" category."));
    }

    let mut categories = BTreeMap::new();
    for (name, entry) in categories_json {
        let category = validate_category(name, entry, &appenders, &levels)?;
        categories.insert(name.clone(), category);
    }

    let disable_clustering = match root.get("disableClustering") {
        None => false,
        Some(Json::Bool(b)) => *b,
        Some(_) => return Err(ConfigError::invalid("disableClustering must be boolean type")),
    };

    Ok(ValidatedConfig {
        appenders,
        categories,
        levels,
        disable_clustering,
    })
}

fn validate_category(
    name: &str,
    entry: &Json,
    appenders: &BTreeMap<String, AppenderConfig>,
    levels: &LevelRegistry,
) -> ConfigResult<CategoryConfig> {
    let fields = entry.as_object().ok_or_else(|| {
        category_error(name, "must be an object with properties \"appenders\" and \"level\"")
    })?;

    let mut category = CategoryConfig {
        inherit: true,
        ..Default::default()
    };

    if let Some(list) = fields.get("appenders") {
        let list = list
            .as_array()
            .ok_or_else(|| category_error(name, "appenders must be an array of appender names"))?;
        if list.is_empty() {
            return Err(category_error(
                name,
                "appenders must contain at least one appender name",
            ));
        }
        for item in list {
            let appender = item
                .as_str()
                .ok_or_else(|| category_error(name, "appenders must be an array of appender names"))?;
            if !appenders.contains_key(appender) {
                return Err(category_error(
                    name,
                    format!("appender \"{}\" is not defined", appender),
                ));
            }
            if !category.appenders.iter().any(|a| a == appender) {
                category.appenders.push(appender.to_string());
            }
        }
    }

    if let Some(level) = fields.get("level") {
        let known = level.as_str().and_then(|l| levels.get(l));
        match known {
            Some(level) => category.level = Some(level.name().to_string()),
            None => {
                return Err(category_error(
                    name,
                    format!(
                        "level \"{}\" not recognised; valid levels are {}",
                        level.as_str().map(str::to_string).unwrap_or_else(|| level.to_string()),
                        levels.names()
                    ),
                ))
            }
        }
    }

    match fields.get("enableCallStack") {
        None => {}
        Some(Json::Bool(b)) => category.enable_call_stack = Some(*b),
        Some(_) => return Err(category_error(name, "enableCallStack must be boolean type")),
    }

    match fields.get("inherit") {
        None => {}
        Some(Json::Bool(b)) => category.inherit = *b,
        Some(_) => return Err(category_error(name, "inherit must be boolean type")),
    }

    if name == DEFAULT_CATEGORY && (category.appenders.is_empty() || category.level.is_none()) {
        return Err(category_error(
            name,
            "must be an object with properties \"appenders\" and \"level\"",
        ));
    }

    Ok(category)
}
