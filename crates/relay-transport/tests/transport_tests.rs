//! Transport tests — accept loop, connection limit, shutdown drain.

use std::time::Duration;

use relay_protocol::Messages;
use relay_transport::{ClientConnection, ConnectionHandler, TransportConfig, TransportServer};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Echoes every line back until EOF or shutdown.
struct Echo;

impl ConnectionHandler for Echo {
    async fn handle_connection<S>(&self, mut conn: ClientConnection<S>, shutdown: CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = conn.send_line("bye").await;
                    break;
                }
                line = conn.next_line() => match line {
                    Ok(Some(line)) => {
                        if conn.send_line(&line).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                },
            }
        }
    }
}

fn test_config(max_connections: Option<usize>) -> TransportConfig {
    TransportConfig {
        port: 0,
        hostname: "127.0.0.1".into(),
        max_connections,
        ..TransportConfig::default()
    }
}

async fn connect(port: u16) -> (Lines<BufReader<OwnedReadHalf>>, tokio::net::tcp::OwnedWriteHalf) {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.expect("Failed to connect");
    let (read, write) = stream.into_split();
    (BufReader::new(read).lines(), write)
}

async fn next_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Option<String> {
    timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("Timeout waiting for line")
        .expect("Read error")
}

#[tokio::test]
async fn echoes_lines_over_tcp() {
    let mut server = TransportServer::start(test_config(None), Echo).await.unwrap();
    let (mut lines, mut write) = connect(server.port()).await;

    write.write_all(b"ping\n").await.unwrap();
    assert_eq!(next_line(&mut lines).await.as_deref(), Some("ping"));

    server.stop().await;
}

#[tokio::test]
async fn refuses_connections_over_the_limit() {
    let mut server = TransportServer::start(test_config(Some(1)), Echo).await.unwrap();

    let (mut first_lines, mut first_write) = connect(server.port()).await;
    first_write.write_all(b"one\n").await.unwrap();
    assert_eq!(next_line(&mut first_lines).await.as_deref(), Some("one"));

    let (mut second_lines, _second_write) = connect(server.port()).await;
    assert_eq!(next_line(&mut second_lines).await.as_deref(), Some(Messages::SERVER_FULL));
    assert_eq!(next_line(&mut second_lines).await, None);

    server.stop().await;
}

#[tokio::test]
async fn stop_signals_live_connections_and_drains() {
    let mut server = TransportServer::start(test_config(None), Echo).await.unwrap();
    let (mut lines, mut write) = connect(server.port()).await;
    write.write_all(b"hi\n").await.unwrap();
    assert_eq!(next_line(&mut lines).await.as_deref(), Some("hi"));
    assert_eq!(server.client_count(), 1);

    timeout(Duration::from_secs(5), server.stop()).await.expect("stop did not drain");
    assert_eq!(next_line(&mut lines).await.as_deref(), Some("bye"));
    assert_eq!(server.client_count(), 0);
}

#[tokio::test]
async fn invalid_hostname_is_an_error() {
    let config = TransportConfig {
        hostname: "not an address".into(),
        ..test_config(None)
    };
    assert!(TransportServer::start(config, Echo).await.is_err());
}
