//! Proxy server lifecycle
//!
//! [`ProxyServer`] owns the listener, the accept loop and the pool
//! maintenance task. Each accepted connection runs in its own task; a
//! failure there is logged and never reaches the listener.

use crate::client::PooledHttpClient;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::pool::ConnectionPool;
use crate::relay::{handle_connection, RelayContext};
use crate::transport::{build_resolver, Connector, SocksConnector};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Handles of a running server
struct Running {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<bool>,
    accept_task: JoinHandle<()>,
    maintenance_task: JoinHandle<()>,
}

/// Decrements the active connection count when a connection task ends
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(count)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// HTTP(S) forward proxy server
pub struct ProxyServer<C: Connector> {
    /// Server configuration
    config: ProxyConfig,
    /// State shared by connection tasks
    context: Arc<RelayContext<C>>,
    /// Present while the server is running
    running: Mutex<Option<Running>>,
    /// Connection tasks in flight
    active: Arc<AtomicUsize>,
}

impl ProxyServer<SocksConnector> {
    /// Create a server relaying through the configured SOCKS endpoint
    pub fn from_config(config: ProxyConfig) -> Self {
        let resolver = build_resolver(&config.dns);
        let connector = SocksConnector::new(&config.upstream, resolver);
        ProxyServer::with_connector(config, Arc::new(connector))
    }
}

impl<C: Connector> ProxyServer<C> {
    /// Create a server with a custom connector
    pub fn with_connector(config: ProxyConfig, connector: Arc<C>) -> Self {
        let pool = ConnectionPool::new(config.pool.clone(), connector);
        let idle_timeout = config.upstream.idle_timeout();
        let client = PooledHttpClient::new(pool, config.server.max_head_size, idle_timeout);
        let context = Arc::new(RelayContext::new(
            client,
            config.server.proxy_agent.clone(),
            config.server.max_head_size,
            idle_timeout,
        ));

        ProxyServer {
            config,
            context,
            running: Mutex::new(None),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// State shared by connection tasks
    pub fn context(&self) -> &Arc<RelayContext<C>> {
        &self.context
    }

    /// Number of client connections being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Whether the server is accepting connections
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Bind the listener and start accepting connections
    ///
    /// Returns the bound address once the listener is ready. Calling this on
    /// a running server returns the current address.
    pub async fn start(&self) -> Result<SocketAddr, ProxyError> {
        let mut running = self.running.lock().await;
        if let Some(state) = running.as_ref() {
            debug!("Server already running on {}", state.local_addr);
            return Ok(state.local_addr);
        }

        let bind_addr = self.config.server.bind_addr();
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let maintenance_task = self
            .context
            .client()
            .pool()
            .spawn_maintenance(shutdown_tx.subscribe());
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.context.clone(),
            self.active.clone(),
            shutdown_tx.subscribe(),
        ));

        info!("Kneesocks listening on {}", local_addr);
        info!(
            "Relaying through SOCKS endpoint {}:{}",
            self.config.upstream.host, self.config.upstream.port
        );

        *running = Some(Running {
            local_addr,
            shutdown_tx,
            accept_task,
            maintenance_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting connections
    ///
    /// The listener is closed before this returns. Connections already being
    /// served finish on their own. Calling this on a stopped server does
    /// nothing.
    pub async fn stop(&self) -> Result<(), ProxyError> {
        let state = match self.running.lock().await.take() {
            Some(state) => state,
            None => return Ok(()),
        };

        let _ = state.shutdown_tx.send(true);
        if let Err(e) = state.accept_task.await {
            error!("Accept loop failed: {}", e);
        }
        if let Err(e) = state.maintenance_task.await {
            error!("Pool maintenance failed: {}", e);
        }

        info!(
            "Kneesocks stopped listening on {} ({} connections still active)",
            state.local_addr,
            self.active_connections()
        );
        Ok(())
    }
}

/// Accept connections until shutdown; the listener is dropped on return
async fn accept_loop<C: Connector>(
    listener: TcpListener,
    context: Arc<RelayContext<C>>,
    active: Arc<AtomicUsize>,
    mut shutdown_rx: broadcast::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Listener shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                }

                let context = context.clone();
                let guard = ActiveGuard::new(active.clone());
                tokio::spawn(async move {
                    let _guard = guard;
                    debug!("Accepted connection from {}", peer);
                    match handle_connection(stream, context).await {
                        Ok(()) => debug!("Connection from {} closed", peer),
                        Err(ProxyError::ClientIo(e)) => {
                            debug!("Connection from {} dropped: {}", peer, e)
                        }
                        Err(e) => warn!("Connection from {} failed: {}", peer, e),
                    }
                });
            }
        }
    }
}
