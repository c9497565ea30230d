//! ConnectionSession — drives one client from connect to disconnect.
//!
//! States: `Connecting → Negotiating → Active → Closed`. A session that never
//! gets a name goes straight from `Negotiating` to `Closed` without touching
//! the registry. Once a name is registered, leaving `Active` by any path
//! (end of stream, transport error, eviction, server shutdown, task abort)
//! unregisters the name and announces the departure exactly once.

use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use relay_protocol::{ChatError, ChatResult, Directive, Messages};
use relay_transport::{ClientConnection, LineReader, LineWriter};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{OutboundSink, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Negotiating,
    Active,
    Closed,
}

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lines that may wait for this client before it is disconnected
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { outbound_buffer: 256 }
    }
}

/// A name held in the registry for as long as this value lives.
///
/// Dropping it releases the name (unless the registry already evicted it)
/// and tells everyone still online.
struct Registration {
    registry: Arc<Registry>,
    name: String,
    sink: OutboundSink,
}

impl Registration {
    fn acquire(registry: &Arc<Registry>, name: String, sink: OutboundSink) -> ChatResult<Self> {
        registry.try_register(&name, sink.clone())?;
        Ok(Self {
            registry: registry.clone(),
            name,
            sink,
        })
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.name, &self.sink);
        let notified = self.registry.broadcast(&Messages::left(&self.name), None);
        debug!("Announced departure of {} to {notified} clients", self.name);
    }
}

pub struct ConnectionSession {
    registry: Arc<Registry>,
    config: SessionConfig,
    client_id: String,
    peer: String,
    connected_at: Instant,
    state: SessionState,
    name: Option<String>,
}

impl ConnectionSession {
    pub fn new<S>(registry: Arc<Registry>, config: SessionConfig, conn: &ClientConnection<S>) -> Self {
        Self {
            registry,
            config,
            client_id: conn.id.clone(),
            peer: conn.peer.clone(),
            connected_at: conn.connected_at,
            state: SessionState::Connecting,
            name: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The display name, once one has been registered.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Run the session until the client leaves or `shutdown` fires.
    /// Errors never escape: they end this session only.
    pub async fn run<S>(&mut self, conn: ClientConnection<S>, shutdown: CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = conn.into_parts();

        let candidate = tokio::select! {
            _ = shutdown.cancelled() => None,
            candidate = negotiate_name(&mut reader, &mut writer) => candidate,
        };
        let Some(candidate) = candidate else {
            debug!("Client {} ({}) left before choosing a name", self.client_id, self.peer);
            self.close(&mut writer).await;
            return;
        };
        self.transition(SessionState::Negotiating);

        let (sink, mut outbound) = OutboundSink::channel(self.config.outbound_buffer);
        let evicted = sink.evicted();
        let registration = match Registration::acquire(&self.registry, candidate, sink) {
            Ok(registration) => registration,
            Err(e) => {
                info!("Client {} ({}) rejected: {e}", self.client_id, self.peer);
                if let Some(reply) = e.reply() {
                    send_best_effort(&mut writer, reply).await;
                }
                self.close(&mut writer).await;
                return;
            }
        };

        let name = registration.name.clone();
        self.name = Some(name.clone());
        self.transition(SessionState::Active);
        info!("{name} has connected.");
        self.registry.broadcast(&Messages::joined(&name), Some(name.as_str()));

        let result = self
            .message_loop(&name, &mut reader, &mut writer, &mut outbound, &evicted, &shutdown)
            .await;
        let connected_for = self.connected_at.elapsed();
        match result {
            Ok(()) => info!("{name} has disconnected. (connected {connected_for:.1?})"),
            Err(ChatError::SlowConsumer) => {
                warn!("{name} disconnected for falling behind (connected {connected_for:.1?})");
                // The client is not reading; flushing or closing could wait forever.
                drop(registration);
                self.transition(SessionState::Closed);
                return;
            }
            Err(e) => {
                warn!("{name} disconnected unexpectedly: {e} (connected {connected_for:.1?})");
                if let Some(reply) = e.reply() {
                    send_best_effort(&mut writer, reply).await;
                }
            }
        }

        drop(registration);
        self.close(&mut writer).await;
    }

    async fn message_loop<S>(
        &self,
        name: &str,
        reader: &mut LineReader<S>,
        writer: &mut LineWriter<S>,
        outbound: &mut mpsc::Receiver<String>,
        evicted: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> ChatResult<()>
    where
        S: AsyncRead + AsyncWrite,
    {
        loop {
            tokio::select! {
                biased;

                _ = evicted.cancelled() => return Err(ChatError::SlowConsumer),

                _ = shutdown.cancelled() => {
                    debug!("{name}: server shutting down");
                    return Ok(());
                }

                // Lines other sessions queued for this client
                Some(line) = outbound.recv() => {
                    tokio::select! {
                        biased;
                        _ = evicted.cancelled() => return Err(ChatError::SlowConsumer),
                        sent = writer.send(line) => sent.map_err(codec_error)?,
                    }
                }

                inbound = reader.next() => match inbound {
                    Some(Ok(line)) => {
                        if let Err(e) = self.route(name, &line) {
                            if e.is_disconnect() {
                                return Err(e);
                            }
                            debug!("{name}: {e}");
                            if let Some(reply) = e.reply() {
                                writer.send(reply).await.map_err(codec_error)?;
                            }
                        }
                    }
                    Some(Err(e)) => return Err(codec_error(e)),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Route one inbound line through the registry.
    fn route(&self, name: &str, line: &str) -> ChatResult<()> {
        match Directive::parse(line) {
            Directive::Broadcast(text) => {
                let count = self.registry.broadcast(&Messages::broadcast(name, text), Some(name));
                debug!("{name}: broadcast to {count} clients");
                Ok(())
            }
            Directive::Private { target, text } => {
                self.registry.send_private(name, target, text)?;
                debug!("{name}: private message to {target}");
                Ok(())
            }
            Directive::MalformedPrivate => Err(ChatError::MalformedPrivate),
        }
    }

    async fn close<S>(&mut self, writer: &mut LineWriter<S>)
    where
        S: AsyncWrite,
    {
        if let Err(e) = SinkExt::<String>::close(writer).await {
            debug!("Client {}: close failed: {e}", self.client_id);
        }
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Client {}: {:?} -> {:?}", self.client_id, self.state, next);
        self.state = next;
    }
}

/// Prompt for a name and read one line. `None` if the client went away.
async fn negotiate_name<S>(reader: &mut LineReader<S>, writer: &mut LineWriter<S>) -> Option<String>
where
    S: AsyncRead + AsyncWrite,
{
    if let Err(e) = writer.send(Messages::NAME_PROMPT).await {
        debug!("Failed to send name prompt: {e}");
        return None;
    }
    match reader.next().await {
        Some(Ok(line)) => Some(line),
        Some(Err(e)) => {
            debug!("Failed to read name: {e}");
            None
        }
        None => None,
    }
}

/// Write a parting line; the session is ending either way.
async fn send_best_effort<S>(writer: &mut LineWriter<S>, line: String)
where
    S: AsyncWrite,
{
    if let Err(e) = writer.send(line).await {
        debug!("Failed to send final line: {e}");
    }
}

fn codec_error(err: LinesCodecError) -> ChatError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => ChatError::LineTooLong,
        LinesCodecError::Io(e) => ChatError::Transport(e),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use super::*;

    struct TestClient {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        write: WriteHalf<DuplexStream>,
    }

    impl TestClient {
        async fn send(&mut self, line: &str) {
            self.write.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Option<String> {
            timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("Timeout waiting for line")
                .unwrap()
        }
    }

    fn spawn_session(
        registry: &Arc<Registry>,
        shutdown: &CancellationToken,
    ) -> (TestClient, JoinHandle<ConnectionSession>) {
        let (server_side, client_side) = tokio::io::duplex(4096);
        let conn = ClientConnection::new(server_side, "test", 64);
        let mut session = ConnectionSession::new(registry.clone(), SessionConfig::default(), &conn);
        assert_eq!(session.state(), SessionState::Connecting);

        let shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            session.run(conn, shutdown).await;
            session
        });

        let (read, write) = tokio::io::split(client_side);
        let client = TestClient {
            lines: BufReader::new(read).lines(),
            write,
        };
        (client, handle)
    }

    #[tokio::test]
    async fn rejected_name_closes_without_registering() {
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();

        let (mut client, handle) = spawn_session(&registry, &shutdown);
        assert_eq!(client.recv().await.as_deref(), Some(Messages::NAME_PROMPT));
        client.send("").await;
        assert_eq!(client.recv().await.as_deref(), Some(Messages::NAME_REJECTED));
        assert_eq!(client.recv().await, None);

        let session = handle.await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.name(), None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn eof_during_active_runs_cleanup_once() {
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();
        let (watcher, mut watcher_rx) = OutboundSink::channel(8);
        registry.try_register("watcher", watcher).unwrap();

        let (mut client, handle) = spawn_session(&registry, &shutdown);
        client.recv().await;
        client.send("bob").await;
        assert_eq!(watcher_rx.recv().await.as_deref(), Some("Server: bob has joined the chat."));
        assert!(registry.contains("bob"));

        drop(client);
        let session = handle.await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.name(), Some("bob"));
        assert!(!registry.contains("bob"));
        assert_eq!(watcher_rx.recv().await.as_deref(), Some("Server: bob has left the chat."));
        assert!(watcher_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_ends_active_session_with_cleanup() {
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();

        let (mut client, handle) = spawn_session(&registry, &shutdown);
        client.recv().await;
        client.send("alice").await;
        while !registry.contains("alice") {
            tokio::task::yield_now().await;
        }

        shutdown.cancel();
        let session = handle.await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.is_empty());
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn overlong_line_disconnects_with_notice() {
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();

        let (mut client, handle) = spawn_session(&registry, &shutdown);
        client.recv().await;
        client.send("alice").await;
        client.send(&"x".repeat(200)).await;
        assert_eq!(client.recv().await.as_deref(), Some(Messages::LINE_TOO_LONG));

        handle.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn rejection_to_vanished_client_still_closes() {
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();
        let (taken, _taken_rx) = OutboundSink::channel(8);
        registry.try_register("alice", taken).unwrap();

        let (mut client, handle) = spawn_session(&registry, &shutdown);
        client.recv().await;
        client.send("alice").await;
        drop(client);

        let session = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(registry.names(), vec!["alice"]);
    }

    #[tokio::test]
    async fn aborted_session_still_unregisters() {
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();

        let (mut client, handle) = spawn_session(&registry, &shutdown);
        client.recv().await;
        client.send("carol").await;
        while !registry.contains("carol") {
            tokio::task::yield_now().await;
        }

        handle.abort();
        let _ = handle.await;
        assert!(!registry.contains("carol"));
    }
}
