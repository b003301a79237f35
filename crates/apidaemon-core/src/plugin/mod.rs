//! Plugin API.
//!
//! A plugin is any value that can describe its public methods as a
//! [`MethodTable`]. Only the paths in that table are reachable from a
//! request; nothing else on the plugin object is exposed.

mod method;
mod params;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::runtime::Handle;

use crate::notify::SharedNotifier;
use crate::{Error, Result};

pub use method::{AsyncMethod, Handler, MethodError, MethodResult, MethodTable, SyncMethod};
pub use params::Params;

/// A configured object registered under a namespace.
pub trait Plugin: Send + Sync + 'static {
    /// The plugin's declared public API.
    fn methods(self: Arc<Self>) -> MethodTable;
}

/// Everything a plugin factory receives when the registry is built.
#[derive(Clone)]
pub struct PluginContext {
    /// Namespace the plugin will be registered under.
    pub name: String,
    /// Runtime the server runs on, for plugins that spawn background work.
    pub runtime: Handle,
    /// Set only for entries with `use_notify: true` when a notifier exists.
    pub notifier: Option<SharedNotifier>,
    /// Plugin-specific keys from the config entry, passed through verbatim.
    pub params: Map<String, Value>,
}

impl PluginContext {
    #[must_use]
    pub fn new(name: impl Into<String>, runtime: Handle) -> Self {
        Self {
            name: name.into(),
            runtime,
            notifier: None,
            params: Map::new(),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Decode the plugin-specific config keys into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Plugin`] when the keys do not match `T`.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.params.clone())).map_err(|e| Error::Plugin {
            name: self.name.clone(),
            message: format!("invalid parameters: {e}"),
        })
    }

    /// The notifier, or an error naming the plugin when it was not granted
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Plugin`] if the entry did not opt into `use_notify`
    /// or no notifier is configured.
    pub fn require_notifier(&self) -> Result<SharedNotifier> {
        self.notifier.clone().ok_or_else(|| Error::Plugin {
            name: self.name.clone(),
            message: "requires use_notify and an enabled notificator".to_string(),
        })
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("notifier", &self.notifier.is_some())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
