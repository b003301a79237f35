//! Per-connection handling: one request in, one response out, then close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use apidaemon_rpc::{CodecError, PayloadCodec, Response};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{Instrument, debug, debug_span, warn};

use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, Result, Stage};

/// Unique id for a connection, used in log spans and failure reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Bounds reading the request, and separately invoking the method.
    pub request_timeout: Duration,
    pub max_payload_size: usize,
}

/// Serve a single request on `stream`.
///
/// A response is written on every path where the socket is still usable,
/// and the write half is always shut down afterwards.
///
/// # Errors
///
/// Returns an error only for socket-level failures while writing the
/// response or closing the connection.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    limits: ConnectionLimits,
) -> Result<()> {
    let id = ConnectionId::new();
    let span = debug_span!("conn", id = %id, %peer);

    async move {
        debug!("Connection opened");
        let mut framed = Framed::new(stream, PayloadCodec::with_max_size(limits.max_payload_size));

        let read = read_request(&mut framed, limits.request_timeout).await;
        let response = dispatcher.dispatch(read, &id, Some(peer)).await;
        let result = write_response(&mut framed, response).await;

        let closed = framed.get_mut().shutdown().await;
        debug!("Connection closed");

        result?;
        closed?;
        Ok(())
    }
    .instrument(span)
    .await
}

async fn read_request(
    framed: &mut Framed<TcpStream, PayloadCodec>,
    timeout: Duration,
) -> std::result::Result<Bytes, DispatchError> {
    match tokio::time::timeout(timeout, framed.next()).await {
        Err(_) => Err(DispatchError::Timeout {
            stage: Stage::Reading,
            after: timeout,
        }),
        Ok(None) => Err(DispatchError::EmptyRequest),
        Ok(Some(result)) => Ok(result?),
    }
}

async fn write_response(
    framed: &mut Framed<TcpStream, PayloadCodec>,
    response: Response,
) -> Result<()> {
    match framed.send(&response).await {
        Err(CodecError::MessageTooLarge { size, max }) => {
            warn!("Response of {} bytes exceeds limit of {}", size, max);
            let fallback = Response::failure(format!(
                "response too large: {size} bytes (max: {max})"
            ));
            framed.send(&fallback).await?;
            Ok(())
        }
        other => Ok(other?),
    }
}
