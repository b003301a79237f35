//! Plugin registry mapping top-level namespaces to plugins.
//!
//! The registry is built once from configuration and never changes
//! afterwards. Each namespace keeps the plugin instance together with the
//! method table it declared, so resolving a dotted path is a map lookup and
//! never reaches anything the plugin did not list.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use apidaemon_rpc::PATH_SEPARATOR;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::PluginConfig;
use crate::notify::SharedNotifier;
use crate::plugin::{Handler, MethodTable, Plugin, PluginContext};
use crate::plugins;
use crate::{Error, Result};

/// Builds a plugin from its config entry.
pub type PluginFactory = Arc<dyn Fn(PluginContext) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Factories keyed by the `type` field of a plugin entry.
#[derive(Clone, Default)]
pub struct FactorySet {
    factories: HashMap<String, PluginFactory>,
}

impl FactorySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A set pre-populated with the built-in plugin kinds.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut set = Self::new();
        set.register(plugins::math::KIND, plugins::math::factory);
        set.register(plugins::system::KIND, plugins::system::factory);
        set.register(plugins::alerts::KIND, plugins::alerts::factory);
        set
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(PluginContext) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds in sorted order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    fn get(&self, kind: &str) -> Option<&PluginFactory> {
        self.factories.get(kind)
    }
}

impl fmt::Debug for FactorySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorySet")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Why a dotted method path did not lead to a callable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no such namespace: '{0}'")]
    NoSuchNamespace(String),

    #[error("no method given for namespace '{0}'")]
    MissingMethod(String),

    #[error("no such method: '{namespace}.{path}'")]
    NoSuchMethod { namespace: String, path: String },
}

struct Namespace {
    plugin: Arc<dyn Plugin>,
    methods: MethodTable,
}

/// Immutable map from namespace name to plugin and its method table.
#[derive(Default)]
pub struct PluginRegistry {
    namespaces: HashMap<String, Namespace>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the `plugins` config section.
    ///
    /// Disabled entries are skipped and absent from the result. Entries with
    /// `use_notify` receive `notifier` when one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error when an entry names an unknown kind, its factory
    /// fails, or its method table is malformed.
    pub fn build(
        entries: &BTreeMap<String, PluginConfig>,
        factories: &FactorySet,
        notifier: Option<&SharedNotifier>,
        runtime: &Handle,
    ) -> Result<Self> {
        let mut registry = Self::new();

        for (name, entry) in entries {
            if !entry.enabled {
                debug!("Skipping disabled plugin: {}", name);
                continue;
            }

            let kind = entry.kind_or(name);
            let factory = factories
                .get(kind)
                .ok_or_else(|| Error::UnknownPluginKind {
                    name: name.clone(),
                    kind: kind.to_string(),
                })?;

            let mut ctx =
                PluginContext::new(name.clone(), runtime.clone()).with_params(entry.params.clone());
            if entry.use_notify {
                match notifier {
                    Some(n) => ctx = ctx.with_notifier(n.clone()),
                    None => debug!("[{}] use_notify set but no notifier configured", name),
                }
            }

            let plugin = factory(ctx)?;
            registry.insert(name.clone(), plugin)?;
        }

        info!(
            "Plugin registry ready: {} namespace(s) [{}]",
            registry.len(),
            registry.namespaces().join(", ")
        );

        Ok(registry)
    }

    /// Build a registry from already constructed plugins.
    ///
    /// # Errors
    ///
    /// Returns an error on a duplicate namespace or a malformed method table.
    pub fn from_plugins<I>(plugins: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn Plugin>)>,
    {
        let mut registry = Self::new();
        for (name, plugin) in plugins {
            registry.insert(name, plugin)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, name: String, plugin: Arc<dyn Plugin>) -> Result<()> {
        if self.namespaces.contains_key(&name) {
            return Err(Error::Config(format!("duplicate namespace: '{name}'")));
        }

        let methods = Arc::clone(&plugin).methods();
        methods.check().map_err(|message| Error::Plugin {
            name: name.clone(),
            message,
        })?;

        debug!("Registering plugin {} with {} method(s)", name, methods.len());
        self.namespaces.insert(name, Namespace { plugin, methods });
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.namespaces.get(name).map(|ns| &ns.plugin)
    }

    #[must_use]
    pub fn methods(&self, name: &str) -> Option<&MethodTable> {
        self.namespaces.get(name).map(|ns| &ns.methods)
    }

    /// Resolve `namespace.sub.path` segments to a handler.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] for an unknown namespace, a bare namespace
    /// without a method, or a path the plugin does not expose.
    pub fn resolve(&self, segments: &[&str]) -> std::result::Result<&Handler, ResolveError> {
        let Some((namespace, rest)) = segments.split_first() else {
            return Err(ResolveError::NoSuchNamespace(String::new()));
        };

        let ns = self
            .namespaces
            .get(*namespace)
            .ok_or_else(|| ResolveError::NoSuchNamespace((*namespace).to_string()))?;

        if rest.is_empty() {
            return Err(ResolveError::MissingMethod((*namespace).to_string()));
        }

        let path = rest.join(&PATH_SEPARATOR.to_string());
        ns.methods
            .get(&path)
            .ok_or_else(|| ResolveError::NoSuchMethod {
                namespace: (*namespace).to_string(),
                path,
            })
    }

    /// Namespace names in sorted order.
    #[must_use]
    pub fn namespaces(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.namespaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("namespaces", &self.namespaces())
            .finish()
    }
}
