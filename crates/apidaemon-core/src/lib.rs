//! Plugin model, registry, notifiers and configuration for apidaemon.
//!
//! The daemon crate owns the network side; everything here is usable
//! without a socket, which is what the registry and plugin tests rely on.

pub mod config;
pub mod notify;
pub mod plugin;
pub mod plugins;
pub mod registry;

mod error;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use registry::{FactorySet, PluginRegistry, ResolveError};
