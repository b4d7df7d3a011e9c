//! Unix-domain-socket control channel: a line-delimited JSON message bus
//! accepting [`UdsMessage`](crate::types::UdsMessage) frames (spec §4.6).

use crate::error::{EngramError, Result};
use crate::types::UdsMessage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A handler invoked once per accepted [`UdsMessage`]. Errors are logged and
/// answered with a failure reply; they never take down the accept loop.
#[async_trait::async_trait]
pub trait UdsHandler: Send + Sync {
    async fn handle(&self, message: UdsMessage) -> Result<serde_json::Value>;
}

/// Owns the bound socket and its accept loop. Removes the socket file on
/// drop so a clean shutdown never leaves a stale path for the next `bind`.
pub struct UdsServer {
    path: PathBuf,
    shutdown: mpsc::Sender<()>,
}

impl UdsServer {
    /// Binds `path` (removing any pre-existing stale socket file first, since
    /// a crash leaves the inode behind even though nothing is listening) and
    /// spawns the accept loop. Socket file permissions are owner-only
    /// (`0600`), matching the rest of the coordination fabric's
    /// owner-only-by-default stance.
    pub async fn bind<H>(path: &Path, handler: Arc<H>) -> Result<Self>
    where
        H: UdsHandler + 'static,
    {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path).map_err(EngramError::Io)?;
        set_owner_only_permissions(path);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let accept_path = path.to_path_buf();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _addr)) => {
                                let handler = Arc::clone(&handler);
                                tokio::spawn(async move {
                                    if let Err(e) = serve_connection(stream, handler.as_ref()).await {
                                        debug!(error = %e, "uds connection ended with error");
                                    }
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "uds accept failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            let _ = std::fs::remove_file(&accept_path);
        });

        Ok(UdsServer {
            path: path.to_path_buf(),
            shutdown: shutdown_tx,
        })
    }

    /// Stops the accept loop and removes the socket file.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn serve_connection<H: UdsHandler + ?Sized>(stream: UnixStream, handler: &H) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await.map_err(EngramError::Io)? {
        if line.trim().is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<UdsMessage>(&line) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "ignoring unrecognized uds message");
                continue;
            }
        };
        let reply = match handler.handle(message).await {
            Ok(value) => serde_json::json!({ "ok": true, "result": value }),
            Err(e) => serde_json::json!({ "ok": false, "error": e.to_string() }),
        };
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        write_half.write_all(&out).await.map_err(EngramError::Io)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncBufReadExt as _;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl UdsHandler for EchoHandler {
        async fn handle(&self, message: UdsMessage) -> Result<serde_json::Value> {
            Ok(serde_json::to_value(message)?)
        }
    }

    #[tokio::test]
    async fn round_trips_a_ping_and_replies_ok() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engram.sock");
        let server = UdsServer::bind(&path, Arc::new(EchoHandler)).await.unwrap();

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(b"{\"event\":\"ping\"}\n").await.unwrap();

        let mut reader = BufReader::new(read_half).lines();
        let line = reader.next_line().await.unwrap().unwrap();
        let reply: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["ok"], true);

        server.shutdown().await;
        assert!(!path.exists());
    }
}
