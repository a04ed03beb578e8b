//! Multiplexed RPC channel
//!
//! One channel wraps one duplex stream. A reader task owns the read half and
//! splits incoming envelopes in two:
//!
//! ```text
//!                    ┌──────────────┐ response (by tag) ┌─────────────────┐
//!  socket ──frames──>│ reader task  │──────────────────>│ pending oneshot │
//!                    └──────┬───────┘                   └─────────────────┘
//!                           │ request (arrival order)
//!                           v
//!                    mpsc ──> serve loop ──> dispatch ──> send_response
//! ```
//!
//! Because responses are routed by the reader and never by the serve loop, a
//! handler may issue an outbound call on the same channel while it is still
//! servicing an inbound one.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::envelope::{CallEnvelope, CallStatus};
use super::error::{Result, RpcError};
use super::framer::{FrameReader, FrameWriter};

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Everything produced by opening a channel
pub struct ChannelParts {
    /// Shared handle for writing and outbound calls
    pub channel: Arc<RpcChannel>,
    /// Inbound requests in arrival order
    pub requests: mpsc::UnboundedReceiver<CallEnvelope>,
    /// Reader task; resolves with the reason the channel stopped
    pub reader: JoinHandle<RpcError>,
}

/// Duplex RPC channel over a framed stream
pub struct RpcChannel {
    writer: FrameWriter<BoxedWrite>,
    pending: Mutex<HashMap<u32, oneshot::Sender<CallEnvelope>>>,
    next_tag: AtomicU32,
    closed: CancellationToken,
}

impl RpcChannel {
    /// Start serving a stream. The channel closes when `parent` is cancelled.
    pub fn open<S>(stream: S, max_message_size: usize, parent: &CancellationToken) -> ChannelParts
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let boxed: BoxedWrite = Box::new(write_half);

        let channel = Arc::new(Self {
            writer: FrameWriter::new(boxed, max_message_size),
            pending: Mutex::new(HashMap::new()),
            next_tag: AtomicU32::new(1),
            closed: parent.child_token(),
        });

        let (request_tx, requests) = mpsc::unbounded_channel();
        let reader = tokio::spawn(Self::read_loop(
            Arc::clone(&channel),
            FrameReader::new(read_half, max_message_size),
            request_tx,
        ));

        ChannelParts {
            channel,
            requests,
            reader,
        }
    }

    /// Connect to a listening endpoint (backend or session manager)
    pub async fn connect(
        endpoint: &Path,
        max_message_size: usize,
        parent: &CancellationToken,
    ) -> Result<ChannelParts> {
        let stream = UnixStream::connect(endpoint).await?;
        Ok(Self::open(stream, max_message_size, parent))
    }

    async fn read_loop<S>(
        channel: Arc<Self>,
        mut reader: FrameReader<ReadHalf<S>>,
        requests: mpsc::UnboundedSender<CallEnvelope>,
    ) -> RpcError
    where
        S: AsyncRead + Send,
    {
        let reason = loop {
            let frame = tokio::select! {
                _ = channel.closed.cancelled() => break RpcError::ChannelClosed,
                frame = reader.read_message() => frame,
            };

            let envelope = match frame.and_then(CallEnvelope::decode) {
                Ok(envelope) => envelope,
                Err(e) => break e,
            };

            if envelope.is_response {
                let waiter = channel.pending.lock().remove(&envelope.tag);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(envelope);
                    }
                    None => warn!("Dropping response with unknown tag {}", envelope.tag),
                }
            } else if let Err(mpsc::error::SendError(request)) = requests.send(envelope) {
                let reply = request.failure(CallStatus::NotFound, "channel does not accept requests");
                if let Err(e) = channel.writer.write_message(reply.encode()).await {
                    break e;
                }
            }
        };

        debug!("Channel reader stopped: {}", reason);
        channel.closed.cancel();
        channel.pending.lock().clear();
        reason
    }

    /// Write a response envelope
    pub async fn send_response(&self, response: CallEnvelope) -> Result<()> {
        self.writer.write_message(response.encode()).await
    }

    /// Issue a request and wait for the response with the same tag.
    ///
    /// Non-success statuses come back as [`RpcError::Remote`].
    pub async fn call_raw(&self, msg_type: u32, payload: Bytes, timeout: Duration) -> Result<CallEnvelope> {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(tag, tx);

        if self.closed.is_cancelled() {
            self.pending.lock().remove(&tag);
            return Err(RpcError::ChannelClosed);
        }

        let request = CallEnvelope::request(tag, msg_type, payload);
        if let Err(e) = self.writer.write_message(request.encode()).await {
            self.pending.lock().remove(&tag);
            return Err(e);
        }

        let outcome = tokio::select! {
            response = rx => response.map_err(|_| RpcError::ChannelClosed),
            _ = tokio::time::sleep(timeout) => Err(RpcError::Timeout(timeout.as_millis() as u64)),
        };

        if outcome.is_err() {
            self.pending.lock().remove(&tag);
        }

        let response = outcome?;
        if response.status != CallStatus::Success {
            return Err(RpcError::Remote {
                status: response.status,
                description: response.error_description.unwrap_or_default(),
            });
        }

        Ok(response)
    }

    /// Stop the reader and shut down the write side
    pub async fn close(&self) {
        self.closed.cancel();
        if let Err(e) = self.writer.close().await {
            debug!("Error closing channel writer: {}", e);
        }
    }

    /// Whether the reader has stopped
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
