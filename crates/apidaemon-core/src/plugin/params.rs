use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::MethodError;

/// Keyword parameters passed to a plugin method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    #[must_use]
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Fetch and decode a required argument.
    ///
    /// # Errors
    ///
    /// Returns [`MethodError::MissingArgument`] if `name` is absent and
    /// [`MethodError::InvalidArgument`] if it does not decode as `T`.
    pub fn required<T: DeserializeOwned>(&self, name: &str) -> Result<T, MethodError> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| MethodError::MissingArgument(name.to_string()))?;
        decode(name, value.clone())
    }

    /// Fetch and decode an optional argument. An explicit `null` counts as
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`MethodError::InvalidArgument`] if the value does not decode
    /// as `T`.
    pub fn optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, MethodError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(name, value.clone()).map(Some),
        }
    }

    /// Reject any argument not listed in `allowed`.
    ///
    /// # Errors
    ///
    /// Returns [`MethodError::UnexpectedArgument`] naming the first unknown
    /// argument.
    pub fn deny_unknown(&self, allowed: &[&str]) -> Result<(), MethodError> {
        match self.0.keys().find(|key| !allowed.contains(&key.as_str())) {
            Some(key) => Err(MethodError::UnexpectedArgument(key.clone())),
            None => Ok(()),
        }
    }

    /// Decode all arguments at once into a struct.
    ///
    /// # Errors
    ///
    /// Returns [`MethodError::InvalidArgument`] when the map does not match
    /// `T`.
    pub fn into_struct<T: DeserializeOwned>(self) -> Result<T, MethodError> {
        serde_json::from_value(Value::Object(self.0)).map_err(|e| MethodError::InvalidArgument {
            name: "parameters".to_string(),
            reason: e.to_string(),
        })
    }

    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: Value) -> Result<T, MethodError> {
    serde_json::from_value(value).map_err(|e| MethodError::InvalidArgument {
        name: name.to_string(),
        reason: e.to_string(),
    })
}
