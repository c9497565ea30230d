//! ChatServer plugs sessions into the transport.

use std::sync::Arc;

use relay_transport::{ClientConnection, ConnectionHandler};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::registry::Registry;
use crate::session::{ConnectionSession, SessionConfig};

/// Runs one [`ConnectionSession`] per accepted connection over a shared
/// [`Registry`].
#[derive(Debug, Clone, Default)]
pub struct ChatServer {
    registry: Arc<Registry>,
    config: SessionConfig,
}

impl ChatServer {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl ConnectionHandler for ChatServer {
    fn handle_connection<S>(
        &self,
        conn: ClientConnection<S>,
        shutdown: CancellationToken,
    ) -> impl std::future::Future<Output = ()> + Send
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut session = ConnectionSession::new(self.registry.clone(), self.config.clone(), &conn);
        async move { session.run(conn, shutdown).await }
    }
}
