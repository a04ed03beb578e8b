//! Calls issued by the session manager

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{from_payload, to_payload, CallError, MessageType, OutboundCall, Result};

/// Tell the front end to move a connection to another backend endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchTo {
    /// Connection to move
    pub connection_id: u32,
    /// Endpoint of the target backend
    pub service_endpoint: String,
}

/// Tell a backend its session is being logged off
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogOffNotify {
    /// Session being ended
    pub session_id: u32,
}

/// Acknowledgement returned by peers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Whether the peer acted on the call
    #[serde(default)]
    pub success: bool,
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    to_payload(value).map_err(CallError::Encode)
}

fn decode_ack(payload: &[u8]) -> Result<Ack> {
    from_payload(payload).map_err(CallError::InvalidResponse)
}

impl OutboundCall for SwitchTo {
    const MESSAGE_TYPE: MessageType = MessageType::SwitchTo;
    type Response = Ack;

    fn encode_request(&self) -> Result<Bytes> {
        encode(self)
    }

    fn decode_response(&self, payload: &[u8]) -> Result<Ack> {
        decode_ack(payload)
    }
}

impl OutboundCall for LogOffNotify {
    const MESSAGE_TYPE: MessageType = MessageType::LogOffNotify;
    type Response = Ack;

    fn encode_request(&self) -> Result<Bytes> {
        encode(self)
    }

    fn decode_response(&self, payload: &[u8]) -> Result<Ack> {
        decode_ack(payload)
    }
}
