//! flowsyncd - OVS flow synchronization daemon
//!
//! Entry point: loads host configuration, wires the agent, control socket
//! and guest watcher together, and supervises the watcher with bounded
//! restart-with-backoff on fatal watch errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flowsync_common::{FlowSink, OvsOfctl};
use flowsyncd::{run_control, AgentServer, GuestWatcher, HostConfig};

/// Watcher restarts before giving up on a persistent watch failure.
const MAX_WATCHER_RESTARTS: u32 = 5;

#[derive(Parser, Debug)]
#[command(name = "flowsyncd", about = "OVS flow synchronization agent")]
struct Args {
    /// Path to the host configuration file.
    #[arg(long, default_value = "/etc/flowsync/flowsyncd.toml")]
    config: PathBuf,
}

/// Initializes tracing/logging subsystem
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    info!("--- Starting flowsyncd ---");

    let config = if args.config.exists() {
        match HostConfig::load(&args.config) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "loading host configuration failed");
                return ExitCode::FAILURE;
            }
        }
    } else {
        warn!(path = %args.config.display(), "config file missing, using defaults");
        HostConfig::default()
    };
    let config = Arc::new(config);

    let sink: Arc<dyn FlowSink> = Arc::new(OvsOfctl::new());
    let agent = Arc::new(AgentServer::new(sink));
    let resync = Arc::new(Notify::new());
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
                shutdown.cancel();
            }
        });
    }

    // stale socket from a previous run
    let _ = std::fs::remove_file(&config.control_socket);
    match UnixListener::bind(&config.control_socket) {
        Ok(listener) => {
            tokio::spawn(run_control(listener, resync.clone(), shutdown.clone()));
        }
        Err(e) => {
            warn!(
                path = %config.control_socket.display(),
                error = %e,
                "control socket unavailable, forced resync disabled"
            );
        }
    }

    // The watcher treats a watch-mechanism failure as fatal for itself;
    // the decision to retry or terminate is made here.
    let mut backoff = Duration::from_secs(1);
    let mut restarts = 0;
    loop {
        let watcher = GuestWatcher::new(config.clone(), agent.clone());
        match watcher.run(resync.clone(), shutdown.clone()).await {
            Ok(()) => {
                info!("flowsyncd exiting");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                restarts += 1;
                if restarts > MAX_WATCHER_RESTARTS {
                    error!(error = %e, "watcher failed too many times, giving up");
                    return ExitCode::FAILURE;
                }
                error!(
                    error = %e,
                    restart = restarts,
                    backoff_secs = backoff.as_secs(),
                    "watcher failed, restarting"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return ExitCode::SUCCESS,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff *= 2;
            }
        }
    }
}
