//! Accepted client connection with newline framing.

use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// Inbound half: yields one `String` per newline-terminated line.
pub type LineReader<S> = FramedRead<ReadHalf<S>, LinesCodec>;

/// Outbound half: accepts one `String` per line and appends the newline.
pub type LineWriter<S> = FramedWrite<WriteHalf<S>, LinesCodec>;

/// A connected client, split into framed read and write halves.
///
/// Generic over the byte stream so the chat logic can be driven over
/// in-memory pipes as well as TCP sockets.
#[derive(Debug)]
pub struct ClientConnection<S = TcpStream> {
    /// Unique client ID
    pub id: String,
    /// Remote address (or a label for non-socket streams)
    pub peer: String,
    /// When the client connected
    pub connected_at: Instant,
    reader: LineReader<S>,
    writer: LineWriter<S>,
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, peer: impl Into<String>, max_line_length: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            peer: peer.into(),
            connected_at: Instant::now(),
            reader: FramedRead::new(read_half, LinesCodec::new_with_max_length(max_line_length)),
            writer: FramedWrite::new(write_half, LinesCodec::new()),
        }
    }

    /// Read the next line. `Ok(None)` means the client closed the stream.
    pub async fn next_line(&mut self) -> Result<Option<String>, LinesCodecError> {
        self.reader.next().await.transpose()
    }

    /// Write one line and flush it.
    pub async fn send_line(&mut self, line: &str) -> Result<(), LinesCodecError> {
        self.writer.send(line).await
    }

    pub fn into_parts(self) -> (LineReader<S>, LineWriter<S>) {
        (self.reader, self.writer)
    }
}
