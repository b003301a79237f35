//! Wire types for the apidaemon request/response protocol.
//!
//! A connection carries exactly one [`Request`] from the client and exactly one
//! [`Response`] back. Both are plain JSON objects with no version tag or id:
//!
//! ```text
//! -> {"method": "math.add", "parameters": {"a": 2, "b": 3}}
//! <- {"error": null, "data": 5}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Largest request or response body accepted on a connection (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Separator between the segments of a dotted method path.
pub const PATH_SEPARATOR: char = '.';

/// A single RPC call: a dotted method path plus keyword parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Request {
    #[must_use]
    pub fn new(method: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            method: method.into(),
            parameters,
        }
    }

    /// Split the method path into its segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.method.split(PATH_SEPARATOR)
    }

    /// Check the structural invariants of the request.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] if the method path is empty or malformed, or
    /// if a parameter name is not a valid identifier.
    pub fn validate(&self) -> Result<(), RequestError> {
        validate_method_path(&self.method)?;

        if let Some(name) = self.parameters.keys().find(|k| !is_identifier(k)) {
            return Err(RequestError::InvalidParameterName(name.clone()));
        }

        Ok(())
    }
}

/// Validate a dotted method path without building a request.
///
/// # Errors
///
/// Returns [`RequestError::EmptyMethod`] for an empty path and
/// [`RequestError::MalformedPath`] when any segment is empty (leading,
/// trailing or doubled dots).
pub fn validate_method_path(path: &str) -> Result<(), RequestError> {
    if path.is_empty() {
        return Err(RequestError::EmptyMethod);
    }
    if path.split(PATH_SEPARATOR).any(str::is_empty) {
        return Err(RequestError::MalformedPath(path.to_string()));
    }
    Ok(())
}

/// Whether `name` is usable as a keyword argument name.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Structural problems with an otherwise well-formed JSON request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("method must not be empty")]
    EmptyMethod,

    #[error("malformed method path: '{0}'")]
    MalformedPath(String),

    #[error("invalid parameter name: '{0}'")]
    InvalidParameterName(String),
}

/// The response envelope. Success and failure are told apart only by
/// whether `error` is null.
///
/// Both keys are always serialized, so every response has exactly the shape
/// `{"error": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub error: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Response {
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self { error: None, data }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            data: Value::Null,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Convert the envelope into a `Result`, yielding `data` on success and
    /// the error string otherwise.
    ///
    /// # Errors
    ///
    /// Returns the remote error message when `error` is set.
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            None => Ok(self.data),
            Some(error) => Err(error),
        }
    }
}
