//! flowsyncctl - control client for a running flowsyncd
//!
//! Talks the one-line control protocol over the daemon's Unix socket.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use flowsyncd::CMD_SYNC_FLOWS;

#[derive(Parser, Debug)]
#[command(name = "flowsyncctl", about = "Control client for flowsyncd")]
struct Args {
    /// Path to the flowsyncd control socket.
    #[arg(long, default_value = "/var/run/flowsyncd.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tell flowsyncd to resynchronize all flows.
    SyncFlows,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let line = match args.command {
        Command::SyncFlows => CMD_SYNC_FLOWS,
    };

    let mut stream = UnixStream::connect(&args.socket)
        .await
        .with_context(|| format!("connecting to {}", args.socket.display()))?;
    stream
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .context("sending command")?;

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .await
        .context("reading reply")?;
    let reply = reply.trim();
    if reply != "ok" {
        bail!("flowsyncd refused: {}", reply);
    }
    println!("ok");
    Ok(())
}
