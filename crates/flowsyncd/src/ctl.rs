//! Control interface.
//!
//! A Unix domain socket with a single-line protocol: `sync-flows` queues a
//! forced full reconciliation pass on the running agent. The `flowsyncctl`
//! binary is the thin client side.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The forced-resync command line.
pub const CMD_SYNC_FLOWS: &str = "sync-flows";

/// A client that connects but never sends its line is dropped after this.
const CONN_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves control connections until cancelled.
///
/// Each connection carries one command line; `sync-flows` wakes the
/// reconciliation driver for a full pass and answers `ok`. Connections are
/// handled on their own tasks so a slow or silent client never stalls the
/// accept loop.
pub async fn run_control(listener: UnixListener, resync: Arc<Notify>, shutdown: CancellationToken) {
    info!("control socket listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("control socket shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let resync = resync.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_conn(stream, &resync).await {
                                warn!(error = %e, "control connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "control accept failed");
                    }
                }
            }
        }
    }
}

async fn handle_conn(stream: UnixStream, resync: &Arc<Notify>) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    tokio::time::timeout(CONN_READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "command read timed out"))??;
    let reply = match line.trim() {
        CMD_SYNC_FLOWS => {
            info!("forced resync requested");
            resync.notify_one();
            "ok\n"
        }
        other => {
            warn!(command = %other, "unknown control command");
            "err unknown command\n"
        }
    };
    let mut stream = reader.into_inner();
    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_sync_flows_command_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("ctl.sock");
        let listener = UnixListener::bind(&sock).unwrap();
        let resync = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(run_control(listener, resync.clone(), shutdown.clone()));

        let notified = resync.notified();
        let mut client = UnixStream::connect(&sock).await.unwrap();
        client.write_all(b"sync-flows\n").await.unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "ok\n");
        notified.await;

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_client_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("ctl.sock");
        let listener = UnixListener::bind(&sock).unwrap();
        let resync = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(run_control(listener, resync.clone(), shutdown.clone()));

        // connects and never sends its command line
        let _silent = UnixStream::connect(&sock).await.unwrap();

        let mut client = UnixStream::connect(&sock).await.unwrap();
        client.write_all(b"sync-flows\n").await.unwrap();
        let mut reply = String::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_to_string(&mut reply))
            .await
            .expect("reply timed out behind a silent client")
            .unwrap();
        assert_eq!(reply, "ok\n");

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("ctl.sock");
        let listener = UnixListener::bind(&sock).unwrap();
        let resync = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(run_control(listener, resync.clone(), shutdown.clone()));

        let mut client = UnixStream::connect(&sock).await.unwrap();
        client.write_all(b"frobnicate\n").await.unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("err"));

        shutdown.cancel();
        server.await.unwrap();
    }
}
