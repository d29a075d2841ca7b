//! Turns a validated configuration into a live generation.
//!
//! Two independent resolutions happen here:
//!
//! 1. **Category inheritance.** Each dotted category inherits from the name
//!    truncated at its last `.`, recursively, with missing parents
//!    synthesized and memoized. Level: own, else parent's. Appenders: own
//!    followed by the parent's resolved list, de-duplicated in first-seen
//!    order. `inherit: false` stops the walk at that category.
//!
//! 2. **Appender graph.** Only appenders referenced by a category (or of an
//!    always-on type) are instantiated. Declared dependencies are walked
//!    depth-first with a visiting stack before any factory runs, so a loop
//!    is rejected with nothing instantiated. Instantiation then proceeds
//!    lazily and memoizes each appender; a factory asking for an appender
//!    that is still being built gets the same loop error.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::appenders::{Appender, AppenderConfig, AppenderRegistry};
use crate::categories::{AppenderRef, CategoryTable, ResolvedCategory};
use crate::config::{CategoryConfig, ValidatedConfig, DEFAULT_CATEGORY};
use crate::error::{ConfigError, ConfigResult};
use crate::layout::Layouts;
use crate::level::{LevelRegistry, SharedLevels};
use crate::runtime::Dispatcher;

/// Category settings after inheritance, before appenders exist
#[derive(Debug, Clone, PartialEq)]
pub struct FlatCategory {
    pub appenders: Vec<String>,
    pub level: String,
    pub enable_call_stack: bool,
}

#[derive(Debug, Clone, Default)]
struct Partial {
    appenders: Vec<String>,
    level: Option<String>,
    enable_call_stack: Option<bool>,
}

fn inherit(
    name: &str,
    configs: &BTreeMap<String, CategoryConfig>,
    memo: &mut HashMap<String, Partial>,
) -> Partial {
    if let Some(done) = memo.get(name) {
        return done.clone();
    }

    let own = configs.get(name);
    let mut partial = Partial {
        appenders: own.map(|c| c.appenders.clone()).unwrap_or_default(),
        level: own.and_then(|c| c.level.clone()),
        enable_call_stack: own.and_then(|c| c.enable_call_stack),
    };
    let inherits = own.map(|c| c.inherit).unwrap_or(true);

    if inherits && name != DEFAULT_CATEGORY {
        if let Some(idx) = name.rfind('.').filter(|idx| *idx > 0) {
            let parent = inherit(&name[..idx], configs, memo);
            if partial.level.is_none() {
                partial.level = parent.level.clone();
            }
            if partial.enable_call_stack.is_none() {
                partial.enable_call_stack = parent.enable_call_stack;
            }
            let mut merged = parent.appenders;
            for appender in partial.appenders {
                if !merged.contains(&appender) {
                    merged.push(appender);
                }
            }
            partial.appenders = merged;
        }
    }

    memo.insert(name.to_string(), partial.clone());
    partial
}

/// Apply category inheritance.
///
/// The result holds every configured category plus every synthesized
/// ancestor that inherited a complete configuration. Top-level chains that
/// end without a level or appenders take the missing part from `default`.
pub fn resolve_categories(
    configs: &BTreeMap<String, CategoryConfig>,
) -> ConfigResult<BTreeMap<String, FlatCategory>> {
    let mut memo = HashMap::new();
    for name in configs.keys() {
        inherit(name, configs, &mut memo);
    }

    let default = memo.get(DEFAULT_CATEGORY).cloned().unwrap_or_default();
    let default_level = default
        .level
        .clone()
        .ok_or_else(|| ConfigError::invalid("must define a \"default\" category."))?;

    let mut resolved = BTreeMap::new();
    for (name, partial) in memo {
        let explicit = configs.get(&name);
        let complete = !partial.appenders.is_empty() && partial.level.is_some();

        let flat = match explicit {
            None if !complete => continue,
            Some(config) if !config.inherit && !complete => {
                return Err(ConfigError::invalid(format!(
                    "category \"{}\" is not valid (must be an object with properties \"appenders\" and \"level\")",
                    name
                )));
            }
            _ => {
                let mut appenders = partial.appenders;
                if appenders.is_empty() {
                    appenders = default.appenders.clone();
                }
                FlatCategory {
                    appenders,
                    level: partial.level.unwrap_or_else(|| default_level.clone()),
                    enable_call_stack: partial.enable_call_stack.unwrap_or(false),
                }
            }
        };
        resolved.insert(name, flat);
    }

    Ok(resolved)
}

/// Lazily instantiated appender graph for one configure attempt
pub struct AppenderGraph<'a> {
    configs: &'a BTreeMap<String, AppenderConfig>,
    registry: &'a AppenderRegistry,
    levels: &'a LevelRegistry,
    layouts: &'a Layouts,
    shared_levels: SharedLevels,
    dispatcher: Dispatcher,
    built: HashMap<String, Arc<dyn Appender>>,
    order: Vec<String>,
    visiting: Vec<String>,
}

impl<'a> AppenderGraph<'a> {
    pub fn new(
        configs: &'a BTreeMap<String, AppenderConfig>,
        registry: &'a AppenderRegistry,
        levels: &'a LevelRegistry,
        layouts: &'a Layouts,
        shared_levels: SharedLevels,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            configs,
            registry,
            levels,
            layouts,
            shared_levels,
            dispatcher,
            built: HashMap::new(),
            order: Vec::new(),
            visiting: Vec::new(),
        }
    }

    fn loop_error(stack: &[String], name: &str) -> ConfigError {
        let start = stack.iter().position(|n| n == name).unwrap_or(0);
        let mut path: Vec<String> = stack[start..].to_vec();
        path.push(name.to_string());
        ConfigError::DependencyLoop {
            name: name.to_string(),
            path,
        }
    }

    /// Depth-first walk over declared dependencies. Instantiates nothing.
    pub fn check_dependencies(&self, roots: &[String]) -> ConfigResult<()> {
        let mut done = HashSet::new();
        let mut stack = Vec::new();
        for root in roots {
            self.visit(root, &mut stack, &mut done)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> ConfigResult<()> {
        if done.contains(name) {
            return Ok(());
        }
        if stack.iter().any(|n| n == name) {
            return Err(Self::loop_error(stack, name));
        }
        let Some(config) = self.configs.get(name) else {
            return Ok(());
        };
        let Some(factory) = self.registry.lookup(&config.type_name) else {
            return Ok(());
        };

        stack.push(name.to_string());
        for dep in factory.dependencies(config) {
            if !self.configs.contains_key(&dep) {
                return Err(config.invalid(format!("appender \"{}\" is not defined", dep)));
            }
            self.visit(&dep, stack, done)?;
        }
        stack.pop();
        done.insert(name.to_string());
        Ok(())
    }

    /// Instantiate `name`, memoized
    pub fn resolve(&mut self, name: &str) -> ConfigResult<Arc<dyn Appender>> {
        if let Some(appender) = self.built.get(name) {
            return Ok(appender.clone());
        }
        if self.visiting.iter().any(|n| n == name) {
            return Err(Self::loop_error(&self.visiting, name));
        }

        let configs = self.configs;
        let config = configs
            .get(name)
            .ok_or_else(|| ConfigError::invalid(format!("appender \"{}\" is not defined", name)))?;
        let factory = self.registry.lookup(&config.type_name).ok_or_else(|| {
            config.invalid(format!("type \"{}\" could not be found", config.type_name))
        })?;

        self.visiting.push(name.to_string());
        let result = {
            let mut ctx = AppenderContext { graph: self };
            factory.build(config, &mut ctx)
        };
        self.visiting.pop();

        let appender = result.map_err(|e| match e.downcast::<ConfigError>() {
            Ok(config_error) => config_error,
            Err(other) => ConfigError::AppenderBuild {
                name: name.to_string(),
                source: other,
            },
        })?;

        debug!(appender = %name, kind = %config.type_name, "appender instantiated");
        self.built.insert(name.to_string(), appender.clone());
        self.order.push(name.to_string());
        Ok(appender)
    }

    /// Every appender built so far, in build order
    pub fn into_built(mut self) -> Vec<(String, Arc<dyn Appender>)> {
        self.order
            .iter()
            .filter_map(|name| self.built.remove(name).map(|a| (name.clone(), a)))
            .collect()
    }
}

/// What an [`AppenderFactory`](crate::appenders::AppenderFactory) can reach
/// while building.
pub struct AppenderContext<'g, 'a> {
    graph: &'g mut AppenderGraph<'a>,
}

impl AppenderContext<'_, '_> {
    /// Instantiate (or reuse) another appender by name
    pub fn find_appender(&mut self, name: &str) -> anyhow::Result<Arc<dyn Appender>> {
        Ok(self.graph.resolve(name)?)
    }

    /// Levels as they will be once this configuration is committed
    pub fn levels(&self) -> &LevelRegistry {
        self.graph.levels
    }

    /// Live registry handle, for appenders comparing levels at append time
    pub fn shared_levels(&self) -> SharedLevels {
        self.graph.shared_levels.clone()
    }

    pub fn layouts(&self) -> &Layouts {
        self.graph.layouts
    }

    /// Handle for appenders that feed received events back into the runtime
    pub fn dispatcher(&self) -> Dispatcher {
        self.graph.dispatcher.clone()
    }
}

/// One immutable snapshot of resolved configuration
#[derive(Clone)]
pub struct Generation {
    pub categories: CategoryTable,
    /// Instantiated appenders, in build order
    pub appenders: Vec<(String, Arc<dyn Appender>)>,
    pub disable_clustering: bool,
}

/// Everything `build_generation` needs besides the config itself
pub struct BuildInputs<'a> {
    pub registry: &'a AppenderRegistry,
    pub layouts: &'a Layouts,
    pub shared_levels: SharedLevels,
    pub dispatcher: Dispatcher,
    /// Whether this process may own appenders
    pub instantiate: bool,
}

/// Resolve categories and appenders into a generation.
///
/// On failure, appenders already built during this attempt are moved into
/// `abandoned` so the caller can shut them down.
pub fn build_generation(
    validated: &ValidatedConfig,
    inputs: BuildInputs<'_>,
    abandoned: &mut Vec<(String, Arc<dyn Appender>)>,
) -> ConfigResult<Generation> {
    let flat = resolve_categories(&validated.categories)?;

    let mut graph = AppenderGraph::new(
        &validated.appenders,
        inputs.registry,
        &validated.levels,
        inputs.layouts,
        inputs.shared_levels,
        inputs.dispatcher,
    );

    let mut used: Vec<String> = Vec::new();
    if inputs.instantiate {
        for category in flat.values() {
            for name in &category.appenders {
                if !used.contains(name) {
                    used.push(name.clone());
                }
            }
        }
        for (name, config) in &validated.appenders {
            let always_on = inputs
                .registry
                .lookup(&config.type_name)
                .map(|f| f.always_on())
                .unwrap_or(false);
            if always_on && !used.contains(name) {
                used.push(name.clone());
            }
        }
    }

    graph.check_dependencies(&used)?;

    for name in &used {
        if let Err(e) = graph.resolve(name) {
            abandoned.extend(graph.into_built());
            return Err(e);
        }
    }

    let built: HashMap<String, Arc<dyn Appender>> = graph.built.clone();
    let to_refs = |names: &[String]| -> Vec<AppenderRef> {
        names
            .iter()
            .filter_map(|name| {
                built.get(name).map(|sink| AppenderRef {
                    name: name.clone(),
                    sink: sink.clone(),
                })
            })
            .collect()
    };

    let mut default = None;
    let mut entries = HashMap::new();
    for (name, category) in &flat {
        let resolved = ResolvedCategory {
            appenders: to_refs(&category.appenders),
            level: category.level.clone(),
            enable_call_stack: category.enable_call_stack,
        };
        if name == DEFAULT_CATEGORY {
            default = Some(resolved);
        } else {
            entries.insert(name.clone(), resolved);
        }
    }
    let default =
        default.ok_or_else(|| ConfigError::invalid("must define a \"default\" category."))?;

    Ok(Generation {
        categories: CategoryTable::new(default, entries),
        appenders: graph.into_built(),
        disable_clustering: validated.disable_clustering,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(appenders: &[&str], level: Option<&str>) -> CategoryConfig {
        CategoryConfig {
            appenders: appenders.iter().map(|s| s.to_string()).collect(),
            level: level.map(str::to_string),
            enable_call_stack: None,
            inherit: true,
        }
    }

    fn configs(entries: Vec<(&str, CategoryConfig)>) -> BTreeMap<String, CategoryConfig> {
        entries
            .into_iter()
            .map(|(name, c)| (name.to_string(), c))
            .collect()
    }

    #[test]
    fn test_child_inherits_level_and_appenders() {
        let resolved = resolve_categories(&configs(vec![
            ("default", cat(&["out"], Some("WARN"))),
            ("a", cat(&["x"], Some("INFO"))),
            ("a.b", cat(&[], Some("DEBUG"))),
        ]))
        .unwrap();

        assert_eq!(resolved["a.b"].level, "DEBUG");
        assert_eq!(resolved["a.b"].appenders, vec!["x"]);
    }

    #[test]
    fn test_parent_appenders_come_first_without_duplicates() {
        let resolved = resolve_categories(&configs(vec![
            ("default", cat(&["out"], Some("WARN"))),
            ("a", cat(&["x", "y"], Some("INFO"))),
            ("a.b", cat(&["y", "z"], None)),
        ]))
        .unwrap();

        assert_eq!(resolved["a.b"].appenders, vec!["x", "y", "z"]);
        assert_eq!(resolved["a.b"].level, "INFO");
    }

    #[test]
    fn test_missing_parent_is_synthesized() {
        let resolved = resolve_categories(&configs(vec![
            ("default", cat(&["out"], Some("WARN"))),
            ("a", cat(&["x"], Some("INFO"))),
            ("a.b.c", cat(&["z"], None)),
        ]))
        .unwrap();

        assert_eq!(resolved["a.b.c"].appenders, vec!["x", "z"]);
        assert_eq!(resolved["a.b.c"].level, "INFO");
        // The synthesized middle inherited a complete config and is kept
        assert_eq!(resolved["a.b"].appenders, vec!["x"]);
        assert_eq!(resolved["a.b"].level, "INFO");
    }

    #[test]
    fn test_inherit_false_stops_the_walk() {
        let mut child = cat(&["z"], Some("ERROR"));
        child.inherit = false;
        let resolved = resolve_categories(&configs(vec![
            ("default", cat(&["out"], Some("WARN"))),
            ("a", cat(&["x"], Some("INFO"))),
            ("a.b", child),
            ("a.b.c", cat(&[], Some("TRACE"))),
        ]))
        .unwrap();

        assert_eq!(resolved["a.b"].appenders, vec!["z"]);
        assert_eq!(resolved["a.b.c"].appenders, vec!["z"]);
    }

    #[test]
    fn test_inherit_false_requires_complete_entry() {
        let mut child = cat(&[], Some("ERROR"));
        child.inherit = false;
        let err = resolve_categories(&configs(vec![
            ("default", cat(&["out"], Some("WARN"))),
            ("a.b", child),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("category \"a.b\" is not valid"));
    }

    #[test]
    fn test_top_level_falls_back_to_default() {
        let resolved = resolve_categories(&configs(vec![
            ("default", cat(&["out"], Some("WARN"))),
            ("solo", cat(&[], Some("DEBUG"))),
            ("x.y", cat(&["q"], None)),
        ]))
        .unwrap();

        assert_eq!(resolved["solo"].appenders, vec!["out"]);
        assert_eq!(resolved["x.y"].level, "WARN");
        assert_eq!(resolved["x.y"].appenders, vec!["q"]);
        assert!(!resolved.contains_key("x"));
    }

    #[test]
    fn test_call_stack_flag_inherits() {
        let mut parent = cat(&["x"], Some("INFO"));
        parent.enable_call_stack = Some(true);
        let resolved = resolve_categories(&configs(vec![
            ("default", cat(&["out"], Some("WARN"))),
            ("a", parent),
            ("a.b", cat(&[], None)),
        ]))
        .unwrap();
        assert!(resolved["a.b"].enable_call_stack);
        assert!(!resolved["default"].enable_call_stack);
    }
}
