//! Resolved category table.
//!
//! The table is immutable. Mutations (`with_level`, `with_call_stack`)
//! return a new table, which the runtime publishes as a new generation, so a
//! reader never sees a half-updated entry.
//!
//! Lookup for a name without its own entry walks towards the root:
//!
//! ```text
//! "a.b.c" → "a.b" → "a" → "default"
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::appenders::Appender;
use crate::config::DEFAULT_CATEGORY;

/// A named, instantiated appender
#[derive(Clone)]
pub struct AppenderRef {
    pub name: String,
    pub sink: Arc<dyn Appender>,
}

impl std::fmt::Debug for AppenderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppenderRef").field("name", &self.name).finish()
    }
}

/// Inheritance-applied settings for one category
#[derive(Debug, Clone)]
pub struct ResolvedCategory {
    pub appenders: Vec<AppenderRef>,
    /// Level name, dereferenced through the registry at decision time
    pub level: String,
    pub enable_call_stack: bool,
}

impl ResolvedCategory {
    pub fn appender_names(&self) -> Vec<&str> {
        self.appenders.iter().map(|a| a.name.as_str()).collect()
    }
}

/// Category name → resolved settings, with a guaranteed `default`
#[derive(Debug, Clone)]
pub struct CategoryTable {
    default: ResolvedCategory,
    entries: HashMap<String, ResolvedCategory>,
}

impl CategoryTable {
    /// Build a table from a default entry and the other entries. A
    /// `"default"` key in `entries` is ignored in favour of `default`.
    pub fn new(default: ResolvedCategory, mut entries: HashMap<String, ResolvedCategory>) -> Self {
        entries.remove(DEFAULT_CATEGORY);
        Self { default, entries }
    }

    /// Nearest configured entry for `name`
    pub fn resolve(&self, name: &str) -> &ResolvedCategory {
        let mut current = name;
        loop {
            if current == DEFAULT_CATEGORY {
                return &self.default;
            }
            if let Some(entry) = self.entries.get(current) {
                return entry;
            }
            match current.rfind('.') {
                Some(idx) if idx > 0 => current = &current[..idx],
                _ => return &self.default,
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        name == DEFAULT_CATEGORY || self.entries.contains_key(name)
    }

    /// Names with their own entry, `default` included
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.push(DEFAULT_CATEGORY);
        names.sort_unstable();
        names
    }

    pub fn appenders_for(&self, name: &str) -> &[AppenderRef] {
        &self.resolve(name).appenders
    }

    pub fn level_name_for(&self, name: &str) -> &str {
        &self.resolve(name).level
    }

    pub fn call_stack_enabled_for(&self, name: &str) -> bool {
        self.resolve(name).enable_call_stack
    }

    /// Copy of the table with `name` set to `level`. An unconfigured name
    /// gets its own entry, cloned from its nearest ancestor.
    pub fn with_level(&self, name: &str, level: &str) -> CategoryTable {
        self.with_entry(name, |entry| entry.level = level.to_string())
    }

    /// Copy of the table with the call-stack flag of `name` set.
    pub fn with_call_stack(&self, name: &str, enabled: bool) -> CategoryTable {
        self.with_entry(name, |entry| entry.enable_call_stack = enabled)
    }

    fn with_entry(&self, name: &str, update: impl FnOnce(&mut ResolvedCategory)) -> CategoryTable {
        let mut next = self.clone();
        if name == DEFAULT_CATEGORY {
            update(&mut next.default);
            return next;
        }
        let mut entry = self.resolve(name).clone();
        update(&mut entry);
        next.entries.insert(name.to_string(), entry);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appenders::appender_fn;

    fn sink(name: &str) -> AppenderRef {
        AppenderRef {
            name: name.to_string(),
            sink: appender_fn(|_| Ok(())),
        }
    }

    fn category(appenders: &[&str], level: &str) -> ResolvedCategory {
        ResolvedCategory {
            appenders: appenders.iter().map(|a| sink(a)).collect(),
            level: level.to_string(),
            enable_call_stack: false,
        }
    }

    fn table() -> CategoryTable {
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), category(&["x"], "INFO"));
        entries.insert("a.b".to_string(), category(&["y", "x"], "DEBUG"));
        CategoryTable::new(category(&["out"], "WARN"), entries)
    }

    #[test]
    fn test_prefix_lookup() {
        let table = table();
        assert_eq!(table.level_name_for("a.b.c.d"), "DEBUG");
        assert_eq!(table.level_name_for("a.z"), "INFO");
        assert_eq!(table.level_name_for("other"), "WARN");
        assert_eq!(table.level_name_for("other.thing"), "WARN");
        assert_eq!(table.level_name_for(".hidden"), "WARN");
        assert_eq!(table.resolve("a.b").appender_names(), vec!["y", "x"]);
    }

    #[test]
    fn test_with_level_on_unconfigured_clones_ancestor() {
        let original = table();
        let next = original.with_level("a.b.c", "TRACE");

        assert_eq!(next.level_name_for("a.b.c"), "TRACE");
        assert_eq!(next.resolve("a.b.c").appender_names(), vec!["y", "x"]);
        assert_eq!(next.level_name_for("a.b.c.d"), "TRACE");
        // The original generation is untouched
        assert_eq!(original.level_name_for("a.b.c"), "DEBUG");
        assert!(!original.contains("a.b.c"));
    }

    #[test]
    fn test_with_level_on_default() {
        let next = table().with_level("default", "ERROR");
        assert_eq!(next.level_name_for("unknown"), "ERROR");
        assert_eq!(next.level_name_for("a"), "INFO");
    }

    #[test]
    fn test_with_call_stack() {
        let next = table().with_call_stack("a", true);
        assert!(next.call_stack_enabled_for("a"));
        assert!(next.call_stack_enabled_for("a.q"));
        assert!(!next.call_stack_enabled_for("a.b"));
    }

    #[test]
    fn test_names_include_default() {
        assert_eq!(table().names(), vec!["a", "a.b", "default"]);
    }
}
