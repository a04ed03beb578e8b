//! Inter-process RPC engine
//!
//! Layers, bottom to top:
//!
//! - [`framer`] - 4-byte big-endian length prefix over a duplex stream
//! - [`envelope`] - tagged call envelope carried inside each frame
//! - [`channel`] - request/response multiplexing over one stream
//! - [`server`] - control endpoint accept loop and per-peer serve loops

pub mod channel;
pub mod envelope;
pub mod error;
pub mod framer;
pub mod peers;
pub mod server;

pub use channel::{ChannelParts, RpcChannel};
pub use envelope::{CallEnvelope, CallStatus, ENVELOPE_VERSION};
pub use error::{Result, RpcError};
pub use framer::{frame_stream, FrameReader, FrameWriter, DEFAULT_MAX_MESSAGE_SIZE};
pub use peers::{PeerId, PeerRegistry};
pub use server::RpcServer;
