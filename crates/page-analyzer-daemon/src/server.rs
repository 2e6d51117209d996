//! Unix domain socket server for the scan facade.
//!
//! Each connection reads newline-delimited requests and, interleaved with the
//! responses, receives every event published on the [`EventBus`].

use crate::protocol;
use anyhow::{Context, Result};
use page_analyzer::{EventBus, Facade};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

/// Maximum request line size (1 MB).
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// The daemon socket server.
pub struct Server {
    socket_path: PathBuf,
    facade: Facade,
    bus: Arc<EventBus>,
    shutdown: Arc<Notify>,
}

impl Server {
    pub fn new(socket_path: &Path, facade: Facade, bus: Arc<EventBus>) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
            facade,
            bus,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get the shutdown notifier (for external shutdown signaling).
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Accept connections until shutdown is signalled.
    pub async fn start(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }
        // Remove stale socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("failed to remove stale socket file")?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).context("failed to bind Unix socket")?;
        info!("page analyzer listening on {}", self.socket_path.display());

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let facade = self.facade.clone();
                            let events = self.bus.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, facade, events).await {
                                    warn!("connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!("server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    facade: Facade,
    mut events: broadcast::Receiver<page_analyzer::AnalyzerEvent>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    debug!("client connected");

    loop {
        let outgoing = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.len() > MAX_REQUEST_SIZE {
                        protocol::format_error(
                            "unknown",
                            protocol::E_MESSAGE_TOO_LARGE,
                            &format!(
                                "Request exceeds maximum size of {}MB",
                                MAX_REQUEST_SIZE / (1024 * 1024)
                            ),
                        )
                    } else if line.trim().is_empty() {
                        continue;
                    } else {
                        handle_line(&facade, line.trim()).await
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("read error: {e}");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => match protocol::format_event(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("cannot encode event: {e}");
                        continue;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "connection fell behind the event stream");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if writer.write_all(outgoing.as_bytes()).await.is_err() {
            break; // client disconnected
        }
        if writer.flush().await.is_err() {
            break;
        }
    }

    debug!("client disconnected");
    Ok(())
}

/// Run one request line through the facade and format the response.
async fn handle_line(facade: &Facade, line: &str) -> String {
    let req = match protocol::parse_request(line) {
        Ok(req) => req,
        Err(e) => {
            // Malformed JSON: report it but keep the connection open.
            let code = if e.is::<serde_json::Error>() {
                protocol::E_INVALID_JSON
            } else {
                protocol::E_INVALID_PARAMS
            };
            return protocol::format_error("unknown", code, &e.to_string());
        }
    };

    match facade.handle_value(req.command).await {
        Ok(Some(reply)) => match serde_json::to_value(&reply) {
            Ok(result) => protocol::format_response(&req.id, result),
            Err(e) => protocol::format_error(&req.id, protocol::E_INTERNAL, &e.to_string()),
        },
        Ok(None) => protocol::format_ignored(&req.id),
        Err(e) => protocol::format_error(&req.id, e.code(), &e.to_string()),
    }
}
