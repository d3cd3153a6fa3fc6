//! Transformation plugins: spec, registry, and the resolved plugin list.
//!
//! A [`PluginSpec`] is the ordered `name → options | false` mapping from the
//! config file. [`build_plugin_list`] asks a [`TransformRegistry`] to
//! instantiate every enabled entry, exactly once, when the pipeline is built.
//! Entries the registry cannot provide are logged and skipped.
//!
//! ## Example
//!
//! ```ignore
//! use cascade_core::plugin::{Transform, TransformContext, TransformError};
//!
//! #[derive(Debug)]
//! struct Banner;
//!
//! impl Transform for Banner {
//!     fn name(&self) -> &str { "banner" }
//!
//!     fn transform(&self, css: &str, _ctx: &TransformContext<'_>) -> Result<String, TransformError> {
//!         Ok(format!("/* built by cascade */\n{css}"))
//!     }
//! }
//! ```

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::css::pxv::PxvTransform;
use crate::css::{AutoprefixerTransform, MinifyTransform};

/// Options of one spec entry.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginOptions {
    /// The `false` sentinel.
    Disabled,
    /// Options record handed to the registry (`{}` when `true` was given).
    Enabled(Value),
}

impl From<Value> for PluginOptions {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(false) | Value::Null => Self::Disabled,
            Value::Bool(true) => Self::Enabled(Value::Object(Map::new())),
            other => Self::Enabled(other),
        }
    }
}

impl From<PluginOptions> for Value {
    fn from(options: PluginOptions) -> Self {
        match options {
            PluginOptions::Disabled => Value::Bool(false),
            PluginOptions::Enabled(value) => value,
        }
    }
}

/// Ordered plugin name → options mapping.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct PluginSpec {
    entries: Vec<(String, PluginOptions)>,
}

impl From<Map<String, Value>> for PluginSpec {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(name, value)| (name, PluginOptions::from(value)))
                .collect(),
        }
    }
}

impl From<PluginSpec> for Map<String, Value> {
    fn from(spec: PluginSpec) -> Self {
        spec.entries
            .into_iter()
            .map(|(name, options)| (name, Value::from(options)))
            .collect()
    }
}

impl PluginSpec {
    /// Create an empty spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an enabled entry (builder style). A repeated name replaces the earlier options in place.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, options: Value) -> Self {
        self.insert(name.into(), PluginOptions::Enabled(options));
        self
    }

    /// Append a disabled entry (builder style).
    #[must_use]
    pub fn disabled(mut self, name: impl Into<String>) -> Self {
        self.insert(name.into(), PluginOptions::Disabled);
        self
    }

    fn insert(&mut self, name: String, options: PluginOptions) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = options;
        } else {
            self.entries.push((name, options));
        }
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PluginOptions)> {
        self.entries.iter().map(|(n, o)| (n.as_str(), o))
    }

    /// All declared names (enabled or not), in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The plugin set used when the config file has no `postcss.plugins`.
    #[must_use]
    pub fn default_set() -> Self {
        Self::new()
            .with(
                "postcss-pxv",
                serde_json::json!({ "siteMin": 0, "siteBasis": 375, "siteMax": 1440, "writeVars": false }),
            )
            .with("autoprefixer", serde_json::json!({}))
            .disabled("cssnano")
    }
}

/// Which build stage a transform runs in.
///
/// `Normal` transforms run in the transform stage, `Post` transforms in the
/// vendor-prefix stage. Declaration order is kept within each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Placement {
    Normal,
    Post,
}

/// Per-build information handed to transforms.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Entry file, for error messages.
    pub filename: &'a str,
    /// Production mode.
    pub production: bool,
}

/// Error from a transform.
#[derive(Debug, Error)]
#[error("[{plugin}] {message}")]
pub struct TransformError {
    /// Plugin name that caused the error.
    pub plugin: String,
    /// Error message.
    pub message: String,
}

impl TransformError {
    #[must_use]
    pub fn new(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// One CSS → CSS transformation step.
pub trait Transform: Send + Sync + std::fmt::Debug {
    /// Plugin name for logs and error messages.
    fn name(&self) -> &str;

    fn placement(&self) -> Placement {
        Placement::Normal
    }

    /// Transform a whole stylesheet.
    fn transform(&self, css: &str, ctx: &TransformContext<'_>) -> Result<String, TransformError>;
}

/// Why a plugin could not be instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no transformation named `{name}` is available")]
    NotFound { name: String },

    #[error("invalid options for `{name}`: {message}")]
    InvalidOptions { name: String, message: String },
}

/// Capability lookup: name + options → transform.
pub trait TransformRegistry {
    fn resolve(&self, name: &str, options: &Value) -> Result<Box<dyn Transform>, ResolveError>;
}

type Factory = Box<dyn Fn(&Value) -> Result<Box<dyn Transform>, ResolveError> + Send + Sync>;

/// Name-keyed registry of transform factories.
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    /// A registry with no entries.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The built-in transforms: `postcss-pxv` (alias `pxv`), `autoprefixer`, `cssnano`.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("postcss-pxv", |options| {
            Ok(Box::new(PxvTransform::from_options(options)?))
        });
        registry.register("pxv", |options| {
            Ok(Box::new(PxvTransform::from_options(options)?))
        });
        registry.register("autoprefixer", |options| {
            Ok(Box::new(AutoprefixerTransform::from_options(options)?))
        });
        registry.register("cssnano", |options| {
            Ok(Box::new(MinifyTransform::from_options(options)?))
        });
        registry
    }

    /// Register (or replace) a factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Transform>, ResolveError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("factories", &names).finish()
    }
}

impl TransformRegistry for Registry {
    fn resolve(&self, name: &str, options: &Value) -> Result<Box<dyn Transform>, ResolveError> {
        match self.factories.get(name) {
            Some(factory) => factory(options),
            None => Err(ResolveError::NotFound {
                name: name.to_string(),
            }),
        }
    }
}

/// A spec entry that was enabled but could not be instantiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPlugin {
    pub name: String,
    pub reason: ResolveError,
}

/// Active transforms for one pipeline, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPluginList {
    transforms: Vec<Arc<dyn Transform>>,
    skipped: Vec<SkippedPlugin>,
}

impl ResolvedPluginList {
    /// An empty list (no transformations).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a list directly from transforms, bypassing the registry.
    #[must_use]
    pub fn from_transforms(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self {
            transforms: transforms.into_iter().map(Arc::from).collect(),
            skipped: Vec::new(),
        }
    }

    /// Names of active transforms, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Entries that were enabled but unavailable.
    #[must_use]
    pub fn skipped(&self) -> &[SkippedPlugin] {
        &self.skipped
    }

    /// Transforms for one stage, in order.
    pub fn stage(&self, placement: Placement) -> impl Iterator<Item = &Arc<dyn Transform>> {
        self.transforms
            .iter()
            .filter(move |t| t.placement() == placement)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.transforms.iter().any(|t| t.name() == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

/// Instantiate every enabled entry of `spec`, skipping unavailable ones.
pub fn build_plugin_list(spec: &PluginSpec, registry: &dyn TransformRegistry) -> ResolvedPluginList {
    let mut list = ResolvedPluginList::default();

    for (name, options) in spec.iter() {
        let PluginOptions::Enabled(options) = options else {
            debug!(plugin = name, "Plugin disabled");
            continue;
        };

        match registry.resolve(name, options) {
            Ok(transform) => {
                debug!(plugin = name, "Plugin enabled");
                list.transforms.push(Arc::from(transform));
            }
            Err(reason) => {
                warn!(plugin = name, %reason, "Skipping unavailable plugin");
                list.skipped.push(SkippedPlugin {
                    name: name.to_string(),
                    reason,
                });
            }
        }
    }

    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Append(&'static str);

    impl Transform for Append {
        fn name(&self) -> &str {
            self.0
        }

        fn transform(&self, css: &str, _ctx: &TransformContext<'_>) -> Result<String, TransformError> {
            Ok(format!("{css}/*{}*/", self.0))
        }
    }

    fn test_registry() -> Registry {
        let mut registry = Registry::empty();
        registry.register("one", |_| Ok(Box::new(Append("one"))));
        registry.register("two", |_| Ok(Box::new(Append("two"))));
        registry.register("three", |_| Ok(Box::new(Append("three"))));
        registry.register("picky", |options| {
            if options.get("ok").and_then(Value::as_bool) == Some(true) {
                Ok(Box::new(Append("picky")))
            } else {
                Err(ResolveError::InvalidOptions {
                    name: "picky".to_string(),
                    message: "`ok` must be true".to_string(),
                })
            }
        });
        registry
    }

    #[test]
    fn test_preserves_declaration_order() {
        let spec = PluginSpec::new()
            .with("three", json!({}))
            .with("one", json!({}))
            .with("two", json!({}));
        let list = build_plugin_list(&spec, &test_registry());
        assert_eq!(list.names(), vec!["three", "one", "two"]);
    }

    #[test]
    fn test_disabled_entries_are_dropped() {
        let spec = PluginSpec::new()
            .with("one", json!({}))
            .disabled("two")
            .with("three", json!({}));
        let list = build_plugin_list(&spec, &test_registry());
        assert_eq!(list.names(), vec!["one", "three"]);
        assert!(list.skipped().is_empty());
    }

    #[test]
    fn test_missing_plugin_is_skipped_not_fatal() {
        let spec = PluginSpec::new()
            .with("one", json!({}))
            .with("postcss-does-not-exist", json!({}))
            .with("two", json!({}));
        let list = build_plugin_list(&spec, &test_registry());
        assert_eq!(list.names(), vec!["one", "two"]);
        assert_eq!(list.skipped().len(), 1);
        assert_eq!(list.skipped()[0].name, "postcss-does-not-exist");
        assert!(matches!(
            list.skipped()[0].reason,
            ResolveError::NotFound { .. }
        ));
    }

    #[test]
    fn test_invalid_options_are_skipped() {
        let spec = PluginSpec::new()
            .with("picky", json!({ "ok": false }))
            .with("one", json!({}));
        let list = build_plugin_list(&spec, &test_registry());
        assert_eq!(list.names(), vec!["one"]);
        assert!(matches!(
            list.skipped()[0].reason,
            ResolveError::InvalidOptions { .. }
        ));
    }

    #[test]
    fn test_deterministic() {
        let spec = PluginSpec::new()
            .with("two", json!({}))
            .with("nope", json!({}))
            .with("one", json!({}));
        let registry = test_registry();
        let a = build_plugin_list(&spec, &registry);
        let b = build_plugin_list(&spec, &registry);
        assert_eq!(a.names(), b.names());
        assert_eq!(a.skipped(), b.skipped());
    }

    #[test]
    fn test_spec_from_json_keeps_order_and_sentinels() {
        let spec: PluginSpec = serde_json::from_str(
            r#"{ "zeta": {}, "alpha": false, "mid": true, "off": null }"#,
        )
        .unwrap();
        assert_eq!(spec.names(), vec!["zeta", "alpha", "mid", "off"]);
        let options: Vec<&PluginOptions> = spec.iter().map(|(_, o)| o).collect();
        assert_eq!(options[1], &PluginOptions::Disabled);
        assert_eq!(options[2], &PluginOptions::Enabled(json!({})));
        assert_eq!(options[3], &PluginOptions::Disabled);
    }

    #[test]
    fn test_spec_serializes_back_in_order() {
        let spec = PluginSpec::new().with("b", json!({"x": 1})).disabled("a");
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"b":{"x":1},"a":false}"#);
    }

    #[test]
    fn test_stage_partition_keeps_order() {
        let list = build_plugin_list(&PluginSpec::default_set(), &Registry::builtin());
        assert_eq!(list.names(), vec!["postcss-pxv", "autoprefixer"]);
        let normal: Vec<&str> = list.stage(Placement::Normal).map(|t| t.name()).collect();
        let post: Vec<&str> = list.stage(Placement::Post).map(|t| t.name()).collect();
        assert_eq!(normal, vec!["postcss-pxv"]);
        assert_eq!(post, vec!["autoprefixer"]);
    }

    #[test]
    fn test_builtin_registry_names() {
        let registry = Registry::builtin();
        for name in ["postcss-pxv", "pxv", "autoprefixer", "cssnano"] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert!(!registry.contains("postcss-preset-env"));
    }
}
