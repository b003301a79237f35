//! Wire protocol definitions for apidaemon.
//!
//! This crate provides the request/response types, the payload codec and a
//! client for talking to an apidaemon server over TCP.
//!
//! # Architecture
//!
//! - [`protocol`]: `Request` and `Response` envelope types
//! - [`transport`]: one-shot payload codec (EOF or complete-JSON framing)
//! - [`client`]: connection-per-call client with a fluent method builder
//!
//! # Example
//!
//! ```no_run
//! use apidaemon_rpc::ApiClient;
//! use serde_json::Map;
//!
//! # async fn example() -> Result<(), apidaemon_rpc::ClientError> {
//! let client = ApiClient::new("127.0.0.1:8760");
//! let pong = client.call("system.ping", Map::new()).await?;
//! println!("{pong}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{ApiClient, ClientError, MethodPath};
pub use protocol::{
    MAX_PAYLOAD_SIZE, PATH_SEPARATOR, Request, RequestError, Response, is_identifier,
    validate_method_path,
};
pub use transport::{CodecError, PayloadCodec};
