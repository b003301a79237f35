//! TCP server lifecycle: bind, accept, spawn a task per connection, and
//! drain in-flight connections on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use apidaemon_core::config::Config;
use apidaemon_core::notify::{SharedNotifier, build_notifier};
use apidaemon_core::{FactorySet, PluginRegistry};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::Dispatcher;
use crate::error::{DaemonError, Result};
use crate::handler::{ConnectionLimits, handle_connection};

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Network settings for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to bind; port 0 picks a free port.
    pub addr: String,
    pub request_timeout: Duration,
    pub drain_timeout: Duration,
    pub max_payload_size: usize,
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            addr: config.addr(),
            request_timeout: config.request_timeout(),
            drain_timeout: config.drain_timeout(),
            max_payload_size: config.max_payload_size,
        }
    }
}

/// A configured but not yet listening server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    #[must_use]
    pub fn new(
        config: ServerConfig,
        registry: Arc<PluginRegistry>,
        notifier: Option<SharedNotifier>,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry, notifier, config.request_timeout);
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Build the notifier and plugin registry described by `config`.
    ///
    /// Must be called from within a tokio runtime; plugins receive a handle
    /// to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the notifier or any enabled plugin cannot be built.
    pub fn from_config(config: &Config, factories: &FactorySet) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| DaemonError::NoRuntime)?;
        let notifier = build_notifier(config.notificator.as_ref())?;
        let registry =
            PluginRegistry::build(&config.plugins, factories, notifier.as_ref(), &runtime)?;

        Ok(Self::new(config.into(), Arc::new(registry), notifier))
    }

    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        self.dispatcher.registry()
    }

    /// Bind the listener and start accepting connections in the background.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Bind`] if the address cannot be bound.
    pub async fn start(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(&self.config.addr)
            .await
            .map_err(|source| DaemonError::Bind {
                addr: self.config.addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let abort = CancellationToken::new();
        let tracker = TaskTracker::new();
        let limits = ConnectionLimits {
            request_timeout: self.config.request_timeout,
            max_payload_size: self.config.max_payload_size,
        };

        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.dispatcher,
            limits,
            shutdown.clone(),
            abort.clone(),
            tracker.clone(),
        ));

        Ok(ServerHandle {
            local_addr,
            shutdown,
            abort,
            tracker,
            accept_task,
            drain_timeout: self.config.drain_timeout,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    limits: ConnectionLimits,
    shutdown: CancellationToken,
    abort: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!("Accepted connection from {}", peer);
                    let dispatcher = Arc::clone(&dispatcher);
                    let abort = abort.clone();
                    tracker.spawn(async move {
                        tokio::select! {
                            result = handle_connection(stream, peer, dispatcher, limits) => {
                                if let Err(e) = result {
                                    warn!("Connection error from {}: {}", peer, e);
                                }
                            }
                            () = abort.cancelled() => {
                                debug!("Connection from {} aborted during shutdown", peer);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Handle to a running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    abort: CancellationToken,
    tracker: TaskTracker,
    accept_task: JoinHandle<()>,
    drain_timeout: Duration,
}

impl ServerHandle {
    /// The bound address, with the real port when port 0 was requested.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops the accept loop when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of connections currently being served.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting, then wait for in-flight connections.
    ///
    /// Returns `true` if every connection finished within the drain timeout.
    /// Connections still running after that are aborted.
    pub async fn stop(self) -> bool {
        self.shutdown.cancel();
        self.wait().await
    }

    /// Wait until the shutdown token is cancelled, then drain like
    /// [`ServerHandle::stop`].
    pub async fn wait(self) -> bool {
        if let Err(e) = self.accept_task.await {
            error!("Accept loop ended abnormally: {}", e);
        }

        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!("Waiting for {} connection(s) to finish", pending);
        }

        if tokio::time::timeout(self.drain_timeout, self.tracker.wait())
            .await
            .is_ok()
        {
            info!("Server stopped");
            return true;
        }

        warn!(
            "{} connection(s) still running after {:?}, aborting",
            self.tracker.len(),
            self.drain_timeout
        );
        self.abort.cancel();
        self.tracker.wait().await;
        false
    }
}

/// Run the server described by `config` until interrupted.
///
/// # Errors
///
/// Returns an error if the server cannot be built or bound, or the signal
/// handler cannot be installed.
pub async fn run(config: &Config) -> Result<()> {
    let server = Server::from_config(config, &FactorySet::with_builtins())?;
    let handle = server.start().await?;
    info!("Ready to accept connections");

    shutdown_signal().await?;
    info!("Shutdown signal received, stopping server");

    handle.stop().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
