use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use apidaemon_rpc::{PATH_SEPARATOR, validate_method_path};
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::Params;

/// Failure raised by a plugin method. The `Display` text becomes the
/// `error` field of the response envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MethodError {
    #[error("missing required argument: '{0}'")]
    MissingArgument(String),

    #[error("unexpected keyword argument: '{0}'")]
    UnexpectedArgument(String),

    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl MethodError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type MethodResult = Result<Value, MethodError>;
pub type SyncMethod = dyn Fn(Params) -> MethodResult + Send + Sync;
pub type AsyncMethod = dyn Fn(Params) -> BoxFuture<'static, MethodResult> + Send + Sync;

/// A callable entry in a [`MethodTable`].
#[derive(Clone)]
pub enum Handler {
    Sync(Arc<SyncMethod>),
    Async(Arc<AsyncMethod>),
}

impl Handler {
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Handler::Sync"),
            Self::Async(_) => f.write_str("Handler::Async"),
        }
    }
}

/// Allow-list of the methods a plugin exposes, keyed by dotted sub-path
/// relative to the plugin's namespace (`"add"`, `"info.version"`).
///
/// Building is infallible so tables can be written as one chained
/// expression; malformed or duplicate paths are recorded and reported by
/// [`MethodTable::check`] when the registry is built.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: BTreeMap<String, Handler>,
    problems: Vec<String>,
}

impl MethodTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous method.
    #[must_use]
    pub fn sync<F>(self, path: &str, method: F) -> Self
    where
        F: Fn(Params) -> MethodResult + Send + Sync + 'static,
    {
        self.insert(path, Handler::Sync(Arc::new(method)))
    }

    /// Register an asynchronous method.
    #[must_use]
    pub fn asynchronous<F, Fut>(self, path: &str, method: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let boxed = move |params: Params| -> BoxFuture<'static, MethodResult> {
            Box::pin(method(params))
        };
        self.insert(path, Handler::Async(Arc::new(boxed)))
    }

    /// Mount every method of `table` under `prefix`.
    #[must_use]
    pub fn nest(mut self, prefix: &str, table: MethodTable) -> Self {
        self.problems.extend(table.problems);
        for (path, handler) in table.methods {
            let full = format!("{prefix}{PATH_SEPARATOR}{path}");
            self = self.insert(&full, handler);
        }
        self
    }

    fn insert(mut self, path: &str, handler: Handler) -> Self {
        if let Err(e) = validate_method_path(path) {
            self.problems.push(e.to_string());
        } else if self.methods.insert(path.to_string(), handler).is_some() {
            self.problems.push(format!("duplicate method path: '{path}'"));
        }
        self
    }

    /// Report the first construction problem, if any.
    ///
    /// # Errors
    ///
    /// Returns a description of a malformed or duplicate path.
    pub fn check(&self) -> Result<(), String> {
        match self.problems.first() {
            Some(problem) => Err(problem.clone()),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Handler> {
        self.methods.get(path)
    }

    /// Method paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
