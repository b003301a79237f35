//! Error types for the apidaemon server.

use std::time::Duration;

use apidaemon_core::ResolveError;
use apidaemon_core::plugin::MethodError;
use apidaemon_rpc::{CodecError, RequestError};

/// Errors that stop the server or a single connection.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error (config, registry construction, notifier setup)
    #[error("Core error: {0}")]
    Core(#[from] apidaemon_core::Error),

    /// Codec error while writing the response
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Failed to bind the listening socket
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Server constructed outside a tokio runtime
    #[error("No tokio runtime available")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Where in the request lifecycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reading,
    Parsing,
    Resolving,
    Invoking,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Reading => "reading",
            Self::Parsing => "parsing",
            Self::Resolving => "resolving",
            Self::Invoking => "invoking",
        };
        f.write_str(name)
    }
}

/// A request that could not be answered with data. The `Display` text is
/// what the client sees in the `error` field.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to read request: {0}")]
    Read(#[source] std::io::Error),

    #[error("request is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("malformed request: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("empty request")]
    EmptyRequest,

    #[error("{0}")]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    Invocation(#[from] MethodError),

    #[error("method panicked: {0}")]
    Panicked(String),

    #[error("request timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
}

impl DispatchError {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Read(_) | Self::PayloadTooLarge { .. } | Self::EmptyRequest => Stage::Reading,
            Self::InvalidUtf8(_) | Self::MalformedJson(_) | Self::InvalidRequest(_) => {
                Stage::Parsing
            }
            Self::Resolve(_) => Stage::Resolving,
            Self::Invocation(_) | Self::Panicked(_) => Stage::Invoking,
            Self::Timeout { stage, .. } => *stage,
        }
    }
}

impl From<CodecError> for DispatchError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Read(e),
            CodecError::Json(e) => Self::MalformedJson(e),
            CodecError::MessageTooLarge { size, max } => Self::PayloadTooLarge { size, max },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err = DaemonError::Io(io_err);
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("port taken"));
    }

    #[test]
    fn test_daemon_error_display_bind() {
        let err = DaemonError::Bind {
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "Failed to bind 127.0.0.1:1: denied");
    }

    #[test]
    fn test_daemon_error_from_core() {
        let err: DaemonError = apidaemon_core::Error::Config("bad".to_string()).into();
        assert!(matches!(err, DaemonError::Core(_)));
    }

    #[test]
    fn test_dispatch_error_from_codec() {
        let err: DispatchError = CodecError::MessageTooLarge { size: 10, max: 5 }.into();
        assert_eq!(err.to_string(), "payload too large: 10 bytes (max: 5)");
        assert_eq!(err.stage(), Stage::Reading);
    }

    #[test]
    fn test_dispatch_error_messages_pass_through() {
        let err = DispatchError::Invocation(MethodError::failed("division by zero"));
        assert_eq!(err.to_string(), "division by zero");

        let err = DispatchError::Resolve(ResolveError::NoSuchNamespace("nope".to_string()));
        assert_eq!(err.to_string(), "no such namespace: 'nope'");
        assert_eq!(err.stage(), Stage::Resolving);
    }

    #[test]
    fn test_dispatch_error_stages() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(DispatchError::MalformedJson(json_err).stage(), Stage::Parsing);
        assert_eq!(DispatchError::EmptyRequest.stage(), Stage::Reading);
        assert_eq!(
            DispatchError::Panicked("x".to_string()).stage(),
            Stage::Invoking
        );
        let timeout = DispatchError::Timeout {
            stage: Stage::Reading,
            after: Duration::from_millis(1500),
        };
        assert_eq!(timeout.stage(), Stage::Reading);
        assert_eq!(timeout.to_string(), "request timed out after 1.5s");
        assert_eq!(Stage::Resolving.to_string(), "resolving");
    }
}
