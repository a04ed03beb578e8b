//! Length-prefixed message framing
//!
//! Every message on a session-manager channel is a 4-byte big-endian length
//! followed by exactly that many payload bytes:
//!
//! ```text
//! +----------------+---------------------------+
//! | len (u32, BE)  | payload (len bytes)       |
//! +----------------+---------------------------+
//! ```
//!
//! Reassembly of partial reads is handled by [`LengthDelimitedCodec`]. The
//! writer half sits behind an async mutex so a frame is never interleaved with
//! another writer's frame on the same channel.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec, LengthDelimitedCodecError};

use super::error::{Result, RpcError};

/// Default upper bound for a single message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

fn codec(max_message_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_PREFIX_SIZE)
        .big_endian()
        .max_frame_length(max_message_size)
        .new_codec()
}

fn is_oversize(err: &std::io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>())
}

/// Reading half of a framed channel
pub struct FrameReader<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
    max_message_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a byte stream
    pub fn new(reader: R, max_message_size: usize) -> Self {
        Self {
            inner: FramedRead::new(reader, codec(max_message_size)),
            max_message_size,
        }
    }

    /// Wait for the next complete message and return its payload.
    ///
    /// Clean EOF maps to [`RpcError::ChannelClosed`], an oversized length
    /// prefix to [`RpcError::FrameTooLarge`].
    pub async fn read_message(&mut self) -> Result<Bytes> {
        match self.inner.next().await {
            Some(Ok(frame)) => Ok(frame.freeze()),
            Some(Err(e)) if is_oversize(&e) => Err(RpcError::FrameTooLarge {
                max: self.max_message_size,
            }),
            Some(Err(e)) => Err(RpcError::from_io(e)),
            None => Err(RpcError::ChannelClosed),
        }
    }
}

/// Writing half of a framed channel, shareable between tasks
pub struct FrameWriter<W> {
    inner: Mutex<FramedWrite<W, LengthDelimitedCodec>>,
    max_message_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a byte sink
    pub fn new(writer: W, max_message_size: usize) -> Self {
        Self {
            inner: Mutex::new(FramedWrite::new(writer, codec(max_message_size))),
            max_message_size,
        }
    }

    /// Write one message (prefix and payload) and flush it.
    pub async fn write_message(&self, payload: Bytes) -> Result<()> {
        if payload.len() > self.max_message_size {
            return Err(RpcError::FrameTooLarge {
                max: self.max_message_size,
            });
        }

        let mut sink = self.inner.lock().await;
        sink.send(payload).await.map_err(RpcError::from_io)
    }

    /// Flush and shut down the write side
    pub async fn close(&self) -> Result<()> {
        let mut sink = self.inner.lock().await;
        // FramedWrite is a Sink for any Buf; pin the item type
        SinkExt::<Bytes>::close(&mut *sink).await.map_err(RpcError::from_io)
    }
}

/// Split a duplex stream into framed halves
pub fn frame_stream<S>(stream: S, max_message_size: usize) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read_half, write_half) = tokio::io::split(stream);
    (
        FrameReader::new(read_half, max_message_size),
        FrameWriter::new(write_half, max_message_size),
    )
}
