//! # relaycode
//!
//! Reference client for the RelayCode peer-to-peer encrypted file transfer
//! protocol: drives the signaling handshake, the WebRTC peer session, and
//! the chunked transfer engine from the command line.

mod files;
mod session;
mod signaling;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::signaling::extract_room_code;

const DEFAULT_SERVER: &str = "ws://127.0.0.1:8080";

#[derive(Parser, Debug)]
#[command(name = "relaycode")]
#[command(about = "Peer-to-peer encrypted file transfer over WebRTC", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a room and send one or more files to whoever joins it.
    Send {
        /// Files to send.
        paths: Vec<PathBuf>,

        /// Signaling server URL.
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Join a room by its code (or a full `?room=` share link) and receive files.
    Receive {
        /// Room code, or a share link containing `?room=CODE`.
        room: String,

        /// Signaling server URL.
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,

        /// Directory to save received files into.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Send { paths, server } => {
            if paths.is_empty() {
                anyhow::bail!("at least one file must be given to send");
            }
            session::run_send(&server, paths).await
        }
        Command::Receive {
            room,
            server,
            out_dir,
        } => {
            let room_code = extract_room_code(&room);
            session::run_receive(&server, &room_code, out_dir).await
        }
    }
}
