//! Entry point for `rdt`.
//!
//! Parses CLI arguments and dispatches into either **listen** or **send**
//! mode.  All actual protocol work is delegated to the library; `main.rs`
//! owns only process setup (logging, argument parsing, stdin/stdout).

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use rdt_over_udp::{Connection, TimerConfig, UdpTransport, MAX_PAYLOAD};

/// Reliable byte stream over UDP (stop-and-wait).
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    timers: TimerArgs,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for a peer and copy everything it sends to stdout.
    Listen {
        /// Local UDP port to listen on.
        #[arg(short, long, default_value_t = 9000)]
        port: u16,
    },
    /// Connect to a listener and send stdin to it.
    Send {
        /// Remote host name or address.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Remote UDP port.
        #[arg(short, long, default_value_t = 9000)]
        port: u16,
    },
}

#[derive(Args)]
struct TimerArgs {
    /// Silence the active closer waits for before releasing its socket.
    #[arg(long, global = true, default_value_t = 4000)]
    close_wait_ms: u64,
    /// Lower bound on the retransmission timeout.
    #[arg(long, global = true, default_value_t = 10)]
    min_timeout_ms: u64,
}

impl TimerArgs {
    fn config(&self) -> TimerConfig {
        TimerConfig {
            close_wait: Duration::from_millis(self.close_wait_ms),
            min_timeout: Duration::from_millis(self.min_timeout_ms),
            ..TimerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.timers.config();

    match cli.mode {
        Mode::Listen { port } => listen(port, config).await,
        Mode::Send { host, port } => send(&host, port, config).await,
    }
}

async fn listen(port: u16, config: TimerConfig) -> Result<()> {
    log::info!("Listening on UDP port {port}");
    let transport = UdpTransport::bind(port)
        .await
        .with_context(|| format!("binding port {port}"))?;
    let mut conn = Connection::with_config(transport, config);
    conn.accept().await.context("handshake failed")?;

    let mut stdout = tokio::io::stdout();
    let mut total = 0usize;
    while let Some(chunk) = conn.receive().await? {
        total += chunk.len();
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;

    conn.close().await?;
    log::info!(
        "Received {total} bytes; estimated RTT {} ms",
        conn.estimated_rtt()
    );
    Ok(())
}

async fn send(host: &str, port: u16, config: TimerConfig) -> Result<()> {
    log::info!("Connecting to {host}:{port}");
    let transport = UdpTransport::connect(host, port)
        .await
        .with_context(|| format!("resolving {host}:{port}"))?;
    let mut conn = Connection::with_config(transport, config);
    conn.open().await.context("handshake failed")?;

    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; MAX_PAYLOAD];
    let mut total = 0usize;
    loop {
        let n = stdin.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        conn.send(&buf[..n]).await?;
        total += n;
    }

    conn.close().await?;
    let stats = conn.stats();
    log::info!(
        "Sent {total} bytes in {} segments ({} retransmitted); estimated RTT {} ms",
        stats.segments_sent,
        stats.retransmissions,
        conn.estimated_rtt()
    );
    Ok(())
}
