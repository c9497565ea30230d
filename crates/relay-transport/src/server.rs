//! TCP transport server.
//!
//! Binds the listening socket, runs the accept loop, enforces the
//! connection limit and hands each accepted stream to the chat logic.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use relay_protocol::Messages;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::client::ClientConnection;

/// Trait implemented by the chat server to drive one connection.
/// The transport calls this once per accepted connection, on its own task.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Run the connection to completion. `shutdown` fires when the server
    /// is stopping; the handler should wind the connection down promptly.
    fn handle_connection<S>(
        &self,
        conn: ClientConnection<S>,
        shutdown: CancellationToken,
    ) -> impl std::future::Future<Output = ()> + Send
    where
        S: AsyncRead + AsyncWrite + Send + 'static;
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Longest accepted inbound line, in bytes
    pub max_line_length: usize,
    /// Log every accepted connection at info instead of debug
    pub verbose_logging: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 12345,
            hostname: "0.0.0.0".into(),
            max_connections: Some(64),
            max_line_length: 4096,
            verbose_logging: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// State shared between the accept loop and connection tasks.
struct AcceptState<H: ConnectionHandler> {
    handler: Arc<H>,
    config: TransportConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    /// Connected client count
    client_count: Arc<AtomicUsize>,
}

/// Holds one slot of the connection limit until dropped.
struct ConnectionSlot {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The transport server. Owns the listener and every connection task.
pub struct TransportServer {
    shutdown: CancellationToken,
    tracker: TaskTracker,
    /// Accept loop task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    client_count: Arc<AtomicUsize>,
    /// Actual bound address
    local_addr: SocketAddr,
}

impl TransportServer {
    /// Start the transport server with the given connection handler.
    pub async fn start<H: ConnectionHandler>(
        config: TransportConfig,
        handler: H,
    ) -> Result<Self, TransportError> {
        Self::start_with_handler(config, Arc::new(handler)).await
    }

    /// Start the transport server with a shared handler, so the caller can
    /// keep its own reference (e.g. to inspect chat state).
    pub async fn start_with_handler<H: ConnectionHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> Result<Self, TransportError> {
        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port)
            .parse()
            .map_err(|_| TransportError::InvalidAddress(format!("{}:{}", config.hostname, config.port)))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!("Chat relay listening on {local_addr}");

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let client_count = Arc::new(AtomicUsize::new(0));

        let state = Arc::new(AcceptState {
            handler,
            config,
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
            client_count: client_count.clone(),
        });

        let handle = tokio::spawn(accept_loop(listener, state));

        Ok(Self {
            shutdown,
            tracker,
            handle: Some(handle),
            client_count,
            local_addr,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently holding a slot.
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::SeqCst)
    }

    /// Stop accepting, signal every live connection and wait for them to finish.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.tracker.close();
        self.tracker.wait().await;
        info!("Chat relay transport stopped");
    }
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accept loop
// ─────────────────────────────────────────────────────────────────────────────

async fn accept_loop<H: ConnectionHandler>(listener: TcpListener, state: Arc<AcceptState<H>>) {
    loop {
        let accepted = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => admit(stream, addr, &state),
            Err(e) => {
                // Usually fd exhaustion; back off instead of spinning.
                warn!("Accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    debug!("Accept loop exited");
}

fn admit<H: ConnectionHandler>(stream: TcpStream, addr: SocketAddr, state: &Arc<AcceptState<H>>) {
    let current = state.client_count.fetch_add(1, Ordering::SeqCst);
    let slot = ConnectionSlot {
        counter: state.client_count.clone(),
    };

    if let Some(max) = state.config.max_connections {
        if current >= max {
            warn!("Connection from {addr} rejected: max connections reached ({max})");
            state.tracker.spawn(reject(stream, slot));
            return;
        }
    }

    let conn = ClientConnection::new(stream, addr.to_string(), state.config.max_line_length);
    if state.config.verbose_logging {
        info!("Client connected: {} from {addr}", conn.id);
    } else {
        debug!("Client connected: {} from {addr}", conn.id);
    }

    let handler = state.handler.clone();
    let shutdown = state.shutdown.child_token();
    let client_count = state.client_count.clone();
    state.tracker.spawn(async move {
        let id = conn.id.clone();
        handler.handle_connection(conn, shutdown).await;
        drop(slot);
        debug!(
            "Client disconnected: {id} (total: {})",
            client_count.load(Ordering::SeqCst)
        );
    });
}

async fn reject(mut stream: TcpStream, slot: ConnectionSlot) {
    let line = format!("{}\n", Messages::SERVER_FULL);
    let _ = stream.write_all(line.as_bytes()).await;
    let _ = stream.shutdown().await;
    drop(slot);
}
