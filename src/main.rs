//! Chat Relay — line-oriented multi-client chat server
//!
//! Clients connect over TCP, pick a display name and exchange broadcast or
//! private (`@name text`) lines relayed through the server.
//!
//! Usage:
//!   chat-relay serve                          # Listen on 0.0.0.0:12345
//!   chat-relay serve --port 8080 --verbose    # Custom port, debug logging
//!   chat-relay connect --host example.org     # Interactive client

mod client;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use relay_server::{ChatServer, SessionConfig};
use relay_transport::{TransportConfig, TransportServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chat-relay", about = "Chat Relay — multi-client line chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the chat server
    Serve(ServeArgs),
    /// Connect to a chat server from this terminal
    Connect {
        /// Server host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Server port
        #[arg(long, default_value = "12345")]
        port: u16,
    },
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "12345")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "0.0.0.0")]
    hostname: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "64")]
    max_connections: usize,

    /// Longest accepted line, in bytes
    #[arg(long, default_value = "4096")]
    max_line_length: usize,

    /// Lines queued per client before it is disconnected for falling behind
    #[arg(long, default_value = "256")]
    outbound_buffer: usize,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(args: &ServeArgs) -> anyhow::Result<()> {
    let default = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (&args.log_file, args.log_format) {
        (Some(path), format) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let builder = builder.with_writer(std::sync::Mutex::new(file)).with_ansi(false);
            match format {
                LogFormat::Text => builder.init(),
                LogFormat::Json => builder.json().init(),
            }
            eprintln!("Logging to {}", path.display());
        }
        (None, LogFormat::Text) => builder.init(),
        (None, LogFormat::Json) => builder.json().init(),
    }
    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    init_tracing(&args)?;

    let transport_config = TransportConfig {
        port: args.port,
        hostname: args.hostname.clone(),
        max_connections: Some(args.max_connections),
        max_line_length: args.max_line_length,
        verbose_logging: args.verbose,
    };
    let chat = Arc::new(ChatServer::new(SessionConfig {
        outbound_buffer: args.outbound_buffer,
    }));

    let mut transport = TransportServer::start_with_handler(transport_config, chat.clone())
        .await
        .context("starting transport")?;
    info!("Server started and listening on port {}", transport.port());

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;

    info!("Shutting down ({} clients online)", chat.registry().len());
    transport.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Connect { host, port } => client::run(&host, port).await,
    }
}
