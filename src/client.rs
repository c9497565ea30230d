//! Interactive terminal client: server lines to stdout, stdin lines to the server.

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::debug;

pub async fn run(host: &str, port: u16) -> anyhow::Result<()> {
    let stream = match TcpStream::connect((host, port)).await {
        Ok(stream) => stream,
        Err(e) => {
            println!("Unable to connect to the server.");
            return Err(e).with_context(|| format!("connecting to {host}:{port}"));
        }
    };
    let (read, write) = stream.into_split();
    let mut from_server = FramedRead::new(read, LinesCodec::new());
    let mut to_server = FramedWrite::new(write, LinesCodec::new());

    let mut printer = tokio::spawn(async move {
        while let Some(line) = from_server.next().await {
            match line {
                Ok(line) => println!("{line}"),
                Err(e) => {
                    debug!("Read from server failed: {e}");
                    break;
                }
            }
        }
        println!("Disconnected from the server.");
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => match line.context("reading stdin")? {
                Some(line) => {
                    if to_server.send(line).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut printer => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = SinkExt::<String>::close(&mut to_server).await;
    printer.abort();
    Ok(())
}
