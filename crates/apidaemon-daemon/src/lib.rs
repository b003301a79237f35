//! apidaemon server library.
//!
//! Accepts TCP connections, reads one JSON request per connection, resolves
//! its dotted method path against the plugin registry and writes back a
//! single `{"error", "data"}` envelope before closing.

pub mod dispatch;
pub mod error;
pub mod handler;
pub mod server;

pub use dispatch::Dispatcher;
pub use error::{DaemonError, DispatchError, Result, Stage};
pub use handler::{ConnectionId, ConnectionLimits, handle_connection};
pub use server::{Server, ServerConfig, ServerHandle, run};
