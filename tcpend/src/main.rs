//! Entry point for `tcpend`.
//!
//! Parses CLI arguments and runs either the **sender** (when a remote address
//! is given) or the **receiver**.  All protocol work is delegated to library
//! modules; `main.rs` owns only process setup (logging, argument parsing,
//! opening the file, binding the socket).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use tcpend::config::EndpointConfig;
use tcpend::receiver::Receiver;
use tcpend::sender::Sender;
use tcpend::socket::Socket;

/// Reliable file transfer over UDP.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Local UDP port to bind.
    #[arg(short = 'p', long)]
    port: u16,

    /// Receiver IP address; selects sender mode.
    #[arg(short = 's', long = "remote-ip", requires = "remote_port")]
    remote_ip: Option<IpAddr>,

    /// Receiver UDP port.
    #[arg(short = 'a', long = "remote-port", requires = "remote_ip")]
    remote_port: Option<u16>,

    /// File to send, or path to write the received file to.
    #[arg(short = 'f', long)]
    file: PathBuf,

    /// Maximum payload bytes per segment.
    #[arg(short = 'm', long)]
    mtu: usize,

    /// Sliding window size, in segments.
    #[arg(short = 'c', long = "sws")]
    sws: usize,

    /// Suppress per-segment trace lines.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = EndpointConfig::new(cli.mtu, cli.sws)?.with_trace(!cli.quiet);
    let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port);
    let socket = Socket::bind(local)
        .await
        .with_context(|| format!("failed to bind UDP port {}", cli.port))?;

    let stats = match (cli.remote_ip, cli.remote_port) {
        (Some(ip), Some(port)) => {
            let peer = SocketAddr::new(ip, port);
            let file = tokio::fs::File::open(&cli.file)
                .await
                .with_context(|| format!("failed to open {}", cli.file.display()))?;
            let len = file
                .metadata()
                .await
                .with_context(|| format!("failed to stat {}", cli.file.display()))?
                .len();
            log::info!("Sending {} ({len} bytes) to {peer}", cli.file.display());
            Sender::new(socket, peer, file, len, config)?
                .run()
                .await
                .context("transfer failed")?
        }
        _ => {
            let file = tokio::fs::File::create(&cli.file)
                .await
                .with_context(|| format!("failed to create {}", cli.file.display()))?;
            log::info!("Receiving into {}", cli.file.display());
            Receiver::new(socket, file, config)
                .run()
                .await
                .context("transfer failed")?
        }
    };

    println!("{stats}");
    Ok(())
}
