//! Control endpoint server
//!
//! Accepts front-end and backend peers on the session manager's Unix socket
//! and runs one serve loop per peer. Requests from a single peer are
//! dispatched strictly in arrival order; different peers are served
//! concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use super::channel::RpcChannel;
use super::peers::PeerId;
use crate::calls::CallContext;
use crate::context::AppContext;

/// Listening control endpoint
pub struct RpcServer {
    ctx: Arc<AppContext>,
    listener: UnixListener,
    endpoint: PathBuf,
}

impl RpcServer {
    /// Bind the control endpoint, replacing a stale socket file if present
    pub fn bind(ctx: Arc<AppContext>) -> Result<Self> {
        let endpoint = ctx.config.server.control_endpoint_path();

        if let Some(parent) = endpoint.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create pipe directory {}", parent.display()))?;
        }

        if endpoint.exists() {
            if std::os::unix::net::UnixStream::connect(&endpoint).is_ok() {
                anyhow::bail!(
                    "Failed to bind control endpoint {}: address already in use by a running session manager",
                    endpoint.display()
                );
            }
            debug!("Removing stale control socket {}", endpoint.display());
            std::fs::remove_file(&endpoint)
                .with_context(|| format!("Failed to remove stale socket {}", endpoint.display()))?;
        }

        let listener = UnixListener::bind(&endpoint)
            .with_context(|| format!("Failed to bind control endpoint {}", endpoint.display()))?;

        info!("Control endpoint bound at {}", endpoint.display());

        Ok(Self {
            ctx,
            listener,
            endpoint,
        })
    }

    /// Path of the bound socket
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Accept peers until the context is shut down
    pub async fn run(self) -> Result<()> {
        let shutdown = self.ctx.shutdown_token();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(async move {
                                serve_peer(ctx, stream).await;
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept control connection: {}", e);
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Control endpoint shutdown requested");
                    break;
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.endpoint) {
            debug!("Could not remove control socket {}: {}", self.endpoint.display(), e);
        }

        info!("Control endpoint stopped");
        Ok(())
    }
}

/// Serve one peer until its channel closes
async fn serve_peer(ctx: Arc<AppContext>, stream: UnixStream) {
    let max_message_size = ctx.config.server.max_message_size;
    let parts = RpcChannel::open(stream, max_message_size, &ctx.shutdown_token());
    let channel = parts.channel;
    let mut requests = parts.requests;

    let peer: PeerId = ctx.peers.register(Arc::clone(&channel));
    info!("Peer {} connected ({} active)", peer, ctx.peers.len());

    let call_ctx = CallContext::new(Arc::clone(&ctx), Some(peer));
    while let Some(request) = requests.recv().await {
        let response = ctx.calls.dispatch(&request, &call_ctx).await;
        if let Err(e) = channel.send_response(response).await {
            warn!("Failed to send response to {}: {}", peer, e);
            break;
        }
    }

    channel.close().await;
    match parts.reader.await {
        Ok(reason) if reason.is_protocol() => warn!("Peer {} violated the wire protocol: {}", peer, reason),
        Ok(reason) => debug!("Peer {} channel ended: {}", peer, reason),
        Err(e) => error!("Reader task for {} failed: {}", peer, e),
    }

    ctx.peer_disconnected(peer).await;
    info!("Peer {} disconnected", peer);
}
