//! Client for the apidaemon wire protocol.
//!
//! Every call opens a fresh TCP connection, writes one request, half-closes
//! and reads the response envelope until the server closes the connection.
//! [`MethodPath`] offers a fluent way to build the dotted method name:
//!
//! ```no_run
//! use apidaemon_rpc::ApiClient;
//!
//! # async fn example() -> Result<(), apidaemon_rpc::ClientError> {
//! let client = ApiClient::new("127.0.0.1:8760");
//! let sum = client.namespace("math").method("add").arg("a", 2).arg("b", 3).call().await?;
//! assert_eq!(sum, 5);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::trace;

use crate::protocol::{PATH_SEPARATOR, Request, Response};
use crate::transport::{CodecError, PayloadCodec};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur with the API client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,
}

/// Connection-per-call client for an apidaemon server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    addr: String,
    timeout: Duration,
}

impl ApiClient {
    /// Create a client for the server at `addr` (`host:port`).
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound each whole call (connect, write, read) by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `request` and return the raw response envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, the call times out, or the
    /// server closes the connection without a well-formed envelope.
    pub async fn call_raw(&self, request: &Request) -> Result<Response, ClientError> {
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    async fn exchange(&self, request: &Request) -> Result<Response, ClientError> {
        trace!("Calling {} on {}", request.method, self.addr);

        let stream = TcpStream::connect(&self.addr).await?;
        let mut framed = Framed::new(stream, PayloadCodec::new());

        framed.send(request).await?;
        framed.get_mut().shutdown().await?;

        let payload = framed
            .next()
            .await
            .ok_or(ClientError::ConnectionClosed)??;

        Ok(serde_json::from_slice(&payload)?)
    }

    /// Call `method` with `parameters` and return the `data` of a successful
    /// response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] when the server answers with an error
    /// envelope, or a transport error as for [`ApiClient::call_raw`].
    pub async fn call(
        &self,
        method: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let request = Request::new(method, parameters);
        self.call_raw(&request)
            .await?
            .into_result()
            .map_err(ClientError::Remote)
    }

    /// Start a fluent method path at the top-level `namespace`.
    #[must_use]
    pub fn namespace(&self, namespace: impl Into<String>) -> MethodPath<'_> {
        MethodPath {
            client: self,
            segments: vec![namespace.into()],
            parameters: Map::new(),
        }
    }
}

/// Fluent builder for a dotted method call.
///
/// Segments are accumulated in order; nothing is sent until
/// [`MethodPath::call`] or [`MethodPath::call_raw`].
#[derive(Debug, Clone)]
pub struct MethodPath<'a> {
    client: &'a ApiClient,
    segments: Vec<String>,
    parameters: Map<String, Value>,
}

impl MethodPath<'_> {
    /// Append one path segment.
    #[must_use]
    pub fn method(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Add one keyword parameter. Values that fail to serialize become null.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.parameters.insert(name.into(), value);
        self
    }

    /// Merge a whole parameter map, overriding earlier values.
    #[must_use]
    pub fn args(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// The dotted method path built so far.
    #[must_use]
    pub fn path(&self) -> String {
        self.segments.join(&PATH_SEPARATOR.to_string())
    }

    #[must_use]
    pub fn to_request(&self) -> Request {
        Request::new(self.path(), self.parameters.clone())
    }

    /// Send the call and return the response envelope as-is.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call_raw`].
    pub async fn call_raw(self) -> Result<Response, ClientError> {
        self.client.call_raw(&self.to_request()).await
    }

    /// Send the call and return the response data.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn call(self) -> Result<Value, ClientError> {
        self.call_raw()
            .await?
            .into_result()
            .map_err(ClientError::Remote)
    }
}
