//! Control socket
//!
//! The running daemon listens on a Unix socket for operator commands. Each
//! connection carries one JSON request line and gets one JSON response line.
//!
//! ```text
//! -> {"command":"stop"}
//! <- {"result":"accepted"}
//!
//! -> {"command":"status"}
//! <- {"result":"status","status":{"running":true,"freshness":{...},...}}
//! ```
//!
//! `stop` cancels the same token the workers poll, so a stop is never lost
//! between the operator and the hunt loop.

use anyhow::{Context, Result, bail};
use iphunt_core::{CaptureLedger, Freshness, HuntStatus, HunterHandle};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a client waits for the daemon to answer
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// How many captures an offline status includes
const OFFLINE_RECENT_CAPTURES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    Stop,
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
    Accepted,
    Status { status: DaemonStatus },
    Error { message: String },
}

/// Status as printed by `iphuntd status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    #[serde(flatten)]
    pub hunt: HuntStatus,
    /// Where the running hunt's configuration came from; absent when no
    /// daemon is running
    pub freshness: Option<Freshness>,
}

impl DaemonStatus {
    /// Status built from the ledger alone, for when no daemon answers
    pub async fn offline(ledger: &dyn CaptureLedger) -> Result<Self> {
        Ok(Self {
            hunt: HuntStatus {
                running: false,
                stop_requested: false,
                workers: Vec::new(),
                captures_by_account: ledger.stats_by_account().await?,
                recent_captures: ledger.recent(OFFLINE_RECENT_CAPTURES).await?,
            },
            freshness: None,
        })
    }
}

/// Listening side of the control socket
///
/// The socket file is removed when the server is dropped.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    /// Bind the control socket at `path`
    ///
    /// A leftover socket file nobody answers on is replaced; a live one
    /// means another daemon is running.
    pub async fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                bail!("another iphuntd is already listening on {}", path.display());
            }
            debug!("Removing stale control socket {}", path.display());
            tokio::fs::remove_file(path)
                .await
                .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind control socket {}", path.display()))?;
        info!("Control socket listening on {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Answer control requests until `shutdown` is cancelled
    pub async fn serve(self, handle: HunterHandle, freshness: Freshness, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handle = handle.clone();
                        let freshness = freshness.clone();
                        tokio::spawn(async move {
                            if let Err(e) = answer(stream, &handle, &freshness).await {
                                debug!("Control connection ended with error: {:#}", e);
                            }
                        });
                    }
                    Err(e) => warn!("Control socket accept failed: {}", e),
                },
            }
        }
        debug!("Control socket closed");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!("Failed to remove control socket {}: {}", self.path.display(), e);
        }
    }
}

async fn answer(stream: UnixStream, handle: &HunterHandle, freshness: &Freshness) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let Some(line) = BufReader::new(read).lines().next_line().await? else {
        return Ok(());
    };

    let response = match serde_json::from_str::<ControlRequest>(&line) {
        Ok(ControlRequest::Stop) => {
            info!("Stop received on control socket");
            handle.request_stop();
            ControlResponse::Accepted
        }
        Ok(ControlRequest::Status) => match handle.status().await {
            Ok(hunt) => ControlResponse::Status {
                status: DaemonStatus {
                    hunt,
                    freshness: Some(freshness.clone()),
                },
            },
            Err(e) => ControlResponse::Error {
                message: e.to_string(),
            },
        },
        Err(e) => ControlResponse::Error {
            message: format!("malformed request: {}", e),
        },
    };

    let mut reply = serde_json::to_vec(&response)?;
    reply.push(b'\n');
    write.write_all(&reply).await?;
    write.shutdown().await?;
    Ok(())
}

/// Send one request to the daemon at `path`
///
/// Returns `Ok(None)` when no daemon is listening.
pub async fn send(path: &Path, request: ControlRequest) -> Result<Option<ControlResponse>> {
    let stream = match UnixStream::connect(path).await {
        Ok(stream) => stream,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to connect to {}", path.display()));
        }
    };

    let exchange = async {
        let (read, mut write) = stream.into_split();
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        write.write_all(&line).await?;

        let reply = BufReader::new(read)
            .lines()
            .next_line()
            .await?
            .context("daemon closed the connection without replying")?;
        let response: ControlResponse = serde_json::from_str(&reply)?;
        Ok::<_, anyhow::Error>(response)
    };

    tokio::time::timeout(REPLY_TIMEOUT, exchange)
        .await
        .with_context(|| format!("daemon at {} did not answer", path.display()))?
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use iphunt_core::config::AccountConfig;
    use iphunt_core::traits::{AttachmentHandle, Capture, CloudNetwork, PublicAddress};
    use iphunt_core::{BackoffConfig, Hunter, MemoryLedger};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio_test::assert_ok;

    /// A provider that is never reached in these tests
    struct Unreachable;

    #[async_trait]
    impl CloudNetwork for Unreachable {
        async fn list_public_addresses(
            &self,
            _account: &AccountConfig,
        ) -> iphunt_core::Result<Vec<PublicAddress>> {
            Err(iphunt_core::Error::transport("unreachable"))
        }

        async fn allocate_public_address(
            &self,
            _account: &AccountConfig,
        ) -> iphunt_core::Result<PublicAddress> {
            Err(iphunt_core::Error::transport("unreachable"))
        }

        async fn release_public_address(
            &self,
            _account: &AccountConfig,
            _address: &PublicAddress,
        ) -> iphunt_core::Result<()> {
            Err(iphunt_core::Error::transport("unreachable"))
        }

        async fn find_attachment_point(
            &self,
            _account: &AccountConfig,
            _target_resource: &str,
        ) -> iphunt_core::Result<AttachmentHandle> {
            Err(iphunt_core::Error::transport("unreachable"))
        }

        async fn bind_address(
            &self,
            _account: &AccountConfig,
            _address: &PublicAddress,
            _attachment: &AttachmentHandle,
        ) -> iphunt_core::Result<()> {
            Err(iphunt_core::Error::transport("unreachable"))
        }

        fn provider_name(&self) -> &'static str {
            "unreachable"
        }
    }

    async fn serving(
        path: &Path,
        ledger: MemoryLedger,
    ) -> (HunterHandle, CancellationToken, tokio::task::JoinHandle<()>) {
        let (hunter, _events) =
            Hunter::new(Arc::new(Unreachable), Arc::new(ledger), BackoffConfig::default()).unwrap();
        let handle = hunter.handle();
        let server = ControlServer::bind(path).await.unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.serve(
            handle.clone(),
            Freshness::Live {
                fetched_at: chrono::Utc::now(),
            },
            shutdown.clone(),
        ));
        (handle, shutdown, task)
    }

    #[test]
    fn wire_format() {
        assert_eq!(
            serde_json::to_string(&ControlRequest::Stop).unwrap(),
            r#"{"command":"stop"}"#
        );
        assert_eq!(
            serde_json::to_string(&ControlResponse::Accepted).unwrap(),
            r#"{"result":"accepted"}"#
        );
    }

    #[tokio::test]
    async fn stop_reaches_the_hunter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let (handle, shutdown, task) = serving(&path, MemoryLedger::new()).await;

        assert!(!handle.is_stop_requested());
        let response = assert_ok!(send(&path, ControlRequest::Stop).await);
        assert_eq!(response, Some(ControlResponse::Accepted));
        assert!(handle.is_stop_requested());

        shutdown.cancel();
        task.await.unwrap();
        assert!(!path.exists(), "socket file removed on shutdown");
    }

    #[tokio::test]
    async fn status_includes_ledger_and_freshness() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let ledger = MemoryLedger::new();
        ledger
            .record(&Capture::new("acc-1", "203.0.113.5", "203.0.113.0/24"))
            .await
            .unwrap();
        let (_handle, shutdown, task) = serving(&path, ledger).await;

        let response = assert_ok!(send(&path, ControlRequest::Status).await);
        let Some(ControlResponse::Status { status }) = response else {
            panic!("expected status, got {:?}", response);
        };
        assert!(!status.hunt.running);
        assert_eq!(status.hunt.captures_by_account.get("acc-1"), Some(&1));
        assert!(status.freshness.is_some_and(|f| f.is_live()));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_request_gets_error_reply() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let (_handle, shutdown, task) = serving(&path, MemoryLedger::new()).await;

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read, mut write) = stream.into_split();
        write.write_all(b"{\"command\":\"reboot\"}\n").await.unwrap();
        let reply = BufReader::new(read).lines().next_line().await.unwrap().unwrap();
        let response: ControlResponse = serde_json::from_str(&reply).unwrap();
        assert!(matches!(response, ControlResponse::Error { .. }));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn no_daemon_means_none() {
        let dir = tempdir().unwrap();
        let response = assert_ok!(send(&dir.path().join("absent.sock"), ControlRequest::Status).await);
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn second_daemon_is_refused_and_stale_socket_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let (_handle, shutdown, task) = serving(&path, MemoryLedger::new()).await;

        assert!(ControlServer::bind(&path).await.is_err());

        shutdown.cancel();
        task.await.unwrap();

        // A plain file left behind is not a live daemon
        std::fs::write(&path, b"").unwrap();
        let server = assert_ok!(ControlServer::bind(&path).await);
        drop(server);
    }

    #[tokio::test]
    async fn offline_status_reads_ledger() {
        let ledger = MemoryLedger::new();
        ledger
            .record(&Capture::new("acc-2", "203.0.113.9", "203.0.113.0/24"))
            .await
            .unwrap();

        let status = assert_ok!(DaemonStatus::offline(&ledger).await);
        assert!(!status.hunt.running);
        assert!(status.freshness.is_none());
        assert_eq!(status.hunt.recent_captures[0].account, "acc-2");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["running"], false);
        assert!(json["freshness"].is_null());
    }
}
