//! Entry point for `rdt-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode of the file transfer.  All protocol work is delegated to library
//! modules; `main.rs` owns only process setup (logging, argument parsing).

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use rdt_over_udp::{transfer, Connection};

const CLIENT_PORT: u16 = 10100;
const SERVER_PORT: u16 = 10200;

/// Reliable file transfer over a simulated lossy UDP channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Probability that an outbound packet is dropped.
    #[arg(long = "drop", global = true, default_value_t = 0.0)]
    drop_rate: f64,

    /// Probability that an outbound packet is corrupted.
    #[arg(long = "error", global = true, default_value_t = 0.0)]
    error_rate: f64,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a waiting server.
    Client {
        /// Server IP address.
        #[arg(short, long)]
        server: IpAddr,
        /// File to send.
        #[arg(short, long)]
        file: PathBuf,
        /// Local port.
        #[arg(long, default_value_t = CLIENT_PORT)]
        port: u16,
        /// Server port.
        #[arg(long, default_value_t = SERVER_PORT)]
        server_port: u16,
    },
    /// Receive one file from a client.
    Server {
        /// Client IP address.
        #[arg(short, long)]
        client: IpAddr,
        /// Directory the received file is stored in; must exist.
        #[arg(long, default_value = "./Store")]
        store: PathBuf,
        /// Local port.
        #[arg(long, default_value_t = SERVER_PORT)]
        port: u16,
        /// Client port.
        #[arg(long, default_value_t = CLIENT_PORT)]
        client_port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    rdt_over_udp::init(cli.drop_rate, cli.error_rate).context("invalid fault rates")?;

    match cli.mode {
        Mode::Client {
            server,
            file,
            port,
            server_port,
        } => {
            let mut conn = open(port, server, server_port)?;
            let report = transfer::send_file(&mut conn, &file)
                .await
                .with_context(|| format!("sending {}", file.display()))?;
            println!(
                "Sent {} bytes in {:.3} s\tThroughput: {:.2} KB/s",
                report.bytes,
                report.elapsed.as_secs_f64(),
                report.throughput_kbps()
            );
            conn.close().await.context("closing connection")?;
        }
        Mode::Server {
            client,
            store,
            port,
            client_port,
        } => {
            if !store.is_dir() {
                bail!(
                    "directory {} does not exist; create it before starting the server",
                    store.display()
                );
            }
            let mut conn = open(port, client, client_port)?;
            let (path, report) = transfer::receive_file(&mut conn, &store)
                .await
                .context("receiving file")?;
            println!("Received {} bytes into {}", report.bytes, path.display());
            conn.close().await.context("closing connection")?;
        }
    }

    Ok(())
}

fn open(port: u16, peer: IpAddr, peer_port: u16) -> Result<Connection> {
    let mut conn = Connection::open().context("creating socket")?;
    conn.bind(port).with_context(|| format!("binding port {port}"))?;
    conn.set_peer(peer, peer_port);
    log::info!("bound to port {port}, peer {peer}:{peer_port}");
    Ok(conn)
}
