//! Severity levels and the level registry.
//!
//! Levels are totally ordered by their numeric value. The registry maps an
//! upper-cased name to a [`Level`]; registering an existing name replaces it.
//! Filtering decisions always look levels up by name at decision time, so a
//! re-registration is visible to every category and logger immediately.
//!
//! ```text
//! ALL < TRACE < DEBUG < INFO < WARN < ERROR < FATAL < MARK < OFF
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{ConfigError, ConfigResult};

/// Display colour associated with a level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colour {
    White,
    Grey,
    Black,
    Blue,
    Cyan,
    Green,
    Magenta,
    Red,
    Yellow,
}

impl Colour {
    /// Every accepted colour, in the order used for error messages
    pub const ALL: [Colour; 9] = [
        Colour::White,
        Colour::Grey,
        Colour::Black,
        Colour::Blue,
        Colour::Cyan,
        Colour::Green,
        Colour::Magenta,
        Colour::Red,
        Colour::Yellow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Colour::White => "white",
            Colour::Grey => "grey",
            Colour::Black => "black",
            Colour::Blue => "blue",
            Colour::Cyan => "cyan",
            Colour::Green => "green",
            Colour::Magenta => "magenta",
            Colour::Red => "red",
            Colour::Yellow => "yellow",
        }
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Colour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Colour::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown colour {}", s))
    }
}

/// A named severity with a numeric value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Level {
    name: String,
    value: i64,
    colour: Colour,
}

impl Level {
    /// Create a level. The name is stored upper-cased.
    pub fn new(name: impl AsRef<str>, value: i64, colour: Colour) -> Self {
        Self {
            name: name.as_ref().to_uppercase(),
            value,
            colour,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn colour(&self) -> Colour {
        self.colour
    }

    /// Compare by value only
    pub fn compare(&self, other: &Level) -> Ordering {
        self.value.cmp(&other.value)
    }

    pub fn is_less_than_or_equal_to(&self, other: &Level) -> bool {
        self.value <= other.value
    }

    pub fn is_greater_than_or_equal_to(&self, other: &Level) -> bool {
        self.value >= other.value
    }

    pub fn is_equal_to(&self, other: &Level) -> bool {
        self.value == other.value
    }
}

impl AsRef<str> for Level {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub const ALL: &str = "ALL";
pub const TRACE: &str = "TRACE";
pub const DEBUG: &str = "DEBUG";
pub const INFO: &str = "INFO";
pub const WARN: &str = "WARN";
pub const ERROR: &str = "ERROR";
pub const FATAL: &str = "FATAL";
pub const MARK: &str = "MARK";
pub const OFF: &str = "OFF";

/// Check the identifier rule for level names: a letter followed by
/// letters, digits or underscores.
pub fn is_valid_level_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Name → level table
#[derive(Debug, Clone)]
pub struct LevelRegistry {
    levels: HashMap<String, Level>,
}

impl Default for LevelRegistry {
    fn default() -> Self {
        let builtins = [
            (ALL, i64::MIN, Colour::Grey),
            (TRACE, 5000, Colour::Blue),
            (DEBUG, 10000, Colour::Cyan),
            (INFO, 20000, Colour::Green),
            (WARN, 30000, Colour::Yellow),
            (ERROR, 40000, Colour::Red),
            (FATAL, 50000, Colour::Magenta),
            (MARK, 9_007_199_254_740_992, Colour::Grey),
            (OFF, i64::MAX, Colour::Grey),
        ];
        let levels = builtins
            .into_iter()
            .map(|(name, value, colour)| (name.to_string(), Level::new(name, value, colour)))
            .collect();
        Self { levels }
    }
}

impl LevelRegistry {
    /// Registry holding the built-in levels
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<&Level> {
        self.levels.get(&name.to_uppercase())
    }

    /// Lookup with a fallback level name, mirroring how categories resolve
    /// a level that may have been removed from under them.
    pub fn get_or<'a>(&'a self, name: &str, fallback: &'a Level) -> &'a Level {
        self.get(name).unwrap_or(fallback)
    }

    /// Register (or overwrite) a level.
    pub fn register(&mut self, name: &str, value: i64, colour: Colour) -> ConfigResult<Level> {
        if !is_valid_level_name(name) {
            return Err(ConfigError::invalid(format!(
                "level name \"{}\" is not a valid identifier (must start with a letter, only contain A-Z,a-z,0-9,_)",
                name
            )));
        }
        let level = Level::new(name, value, colour);
        self.levels.insert(level.name.clone(), level.clone());
        Ok(level)
    }

    /// Compare two level names by value. `None` if either is unknown.
    pub fn compare(&self, a: &str, b: &str) -> Option<Ordering> {
        Some(self.get(a)?.compare(self.get(b)?))
    }

    /// All levels sorted by value
    pub fn all(&self) -> Vec<&Level> {
        let mut levels: Vec<&Level> = self.levels.values().collect();
        levels.sort_by(|a, b| a.compare(b).then_with(|| a.name.cmp(&b.name)));
        levels
    }

    /// Comma separated level names, sorted by value
    pub fn names(&self) -> String {
        self.all()
            .iter()
            .map(|l| l.name())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Validate and register the `levels` section of a configuration.
    ///
    /// Validation happens against a scratch copy; `self` is only touched
    /// when the whole section is valid.
    pub fn apply_config(&mut self, levels: &Json) -> ConfigResult<()> {
        let map = levels
            .as_object()
            .ok_or_else(|| ConfigError::invalid("levels must be an object"))?;

        let mut scratch = self.clone();
        for (name, definition) in map {
            if !is_valid_level_name(name) {
                return Err(ConfigError::invalid(format!(
                    "level name \"{}\" is not a valid identifier (must start with a letter, only contain A-Z,a-z,0-9,_)",
                    name
                )));
            }
            let definition = definition
                .as_object()
                .ok_or_else(|| ConfigError::invalid(format!("level \"{}\" must be an object", name)))?;
            let value = definition.get("value").ok_or_else(|| {
                ConfigError::invalid(format!("level \"{}\" must have a 'value' property", name))
            })?;
            let value = value.as_i64().ok_or_else(|| {
                ConfigError::invalid(format!("level \"{}\".value must have an integer value", name))
            })?;
            let colour = definition.get("colour").ok_or_else(|| {
                ConfigError::invalid(format!("level \"{}\" must have a 'colour' property", name))
            })?;
            let colour = colour
                .as_str()
                .and_then(|c| c.parse::<Colour>().ok())
                .ok_or_else(|| {
                    let names: Vec<&str> = Colour::ALL.iter().map(|c| c.as_str()).collect();
                    ConfigError::invalid(format!(
                        "level \"{}\".colour must be one of {}",
                        name,
                        names.join(", ")
                    ))
                })?;
            scratch.register(name, value, colour)?;
        }

        *self = scratch;
        Ok(())
    }
}

/// Live, swappable view of the registry shared by the runtime and the
/// appenders that compare levels at append time.
#[derive(Clone, Default)]
pub struct SharedLevels(Arc<RwLock<Arc<LevelRegistry>>>);

impl SharedLevels {
    pub fn new(registry: LevelRegistry) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(registry))))
    }

    /// Current registry snapshot
    pub fn current(&self) -> Arc<LevelRegistry> {
        self.0.read().clone()
    }

    /// Publish a new registry
    pub fn replace(&self, registry: LevelRegistry) {
        *self.0.write() = Arc::new(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_order() {
        let registry = LevelRegistry::new();
        let names: Vec<&str> = registry.all().iter().map(|l| l.name()).collect();
        assert_eq!(
            names,
            vec!["ALL", "TRACE", "DEBUG", "INFO", "WARN", "ERROR", "FATAL", "MARK", "OFF"]
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = LevelRegistry::new();
        assert_eq!(registry.get("info").unwrap().value(), 20000);
        assert_eq!(registry.get("Warn").unwrap().name(), "WARN");
        assert!(registry.get("verbose").is_none());
    }

    #[test]
    fn test_compare() {
        let registry = LevelRegistry::new();
        assert_eq!(registry.compare("DEBUG", "INFO"), Some(Ordering::Less));
        assert_eq!(registry.compare("error", "ERROR"), Some(Ordering::Equal));
        assert_eq!(registry.compare("OFF", "MARK"), Some(Ordering::Greater));
        assert_eq!(registry.compare("nope", "INFO"), None);
    }

    #[test]
    fn test_register_overwrites_by_name() {
        let mut registry = LevelRegistry::new();
        registry.register("info", 45000, Colour::Red).unwrap();
        assert_eq!(registry.compare("INFO", "ERROR"), Some(Ordering::Greater));
    }

    #[test]
    fn test_register_rejects_bad_identifier() {
        let mut registry = LevelRegistry::new();
        let err = registry.register("1bad", 1, Colour::Red).unwrap_err();
        assert!(err.to_string().contains("not a valid identifier"));
        assert!(registry.register("has-dash", 1, Colour::Red).is_err());
        assert!(registry.register("Good_1", 1, Colour::Red).is_ok());
    }

    #[test]
    fn test_apply_config_registers_levels() {
        let mut registry = LevelRegistry::new();
        registry
            .apply_config(&json!({ "notice": { "value": 25000, "colour": "cyan" } }))
            .unwrap();
        let notice = registry.get("NOTICE").unwrap();
        assert_eq!(notice.value(), 25000);
        assert_eq!(notice.colour(), Colour::Cyan);
    }

    #[test]
    fn test_apply_config_is_all_or_nothing() {
        let mut registry = LevelRegistry::new();
        let err = registry
            .apply_config(&json!({
                "good": { "value": 1, "colour": "red" },
                "bad": { "value": 2, "colour": "purple" }
            }))
            .unwrap_err();
        assert!(err.to_string().contains("level \"bad\".colour must be one of"));
        assert!(registry.get("GOOD").is_none());
    }

    #[test]
    fn test_shared_levels_publish() {
        let shared = SharedLevels::new(LevelRegistry::new());
        let before = shared.current();

        let mut next = (*before).clone();
        next.register("AUDIT", 35000, Colour::White).unwrap();
        shared.replace(next);

        assert!(before.get("AUDIT").is_none());
        assert_eq!(shared.current().get("audit").unwrap().value(), 35000);
    }

    #[test]
    fn test_apply_config_errors() {
        let mut registry = LevelRegistry::new();
        let cases = [
            (json!([]), "levels must be an object"),
            (json!({ "x": 1 }), "level \"x\" must be an object"),
            (json!({ "x": {} }), "must have a 'value' property"),
            (json!({ "x": { "value": "1" } }), "must have an integer value"),
            (json!({ "x": { "value": 1 } }), "must have a 'colour' property"),
        ];
        for (config, expected) in cases {
            let err = registry.apply_config(&config).unwrap_err();
            assert!(err.to_string().contains(expected), "{} vs {}", err, expected);
        }
    }
}
