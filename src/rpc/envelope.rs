//! Call envelope wire format
//!
//! The envelope is the payload of every frame. All integers are big-endian.
//!
//! ```text
//! u8   version            (ENVELOPE_VERSION)
//! u32  tag                correlates a response with its request
//! u32  msg_type           selects the handler
//! u8   flags              bit 0 = is_response
//! u8   status             0 = success, 1 = failed, 2 = not found
//! u32  payload_len
//! [u8] payload
//! u8   has_error
//! u32  error_len          only when has_error != 0
//! [u8] error (utf-8)
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::error::{Result, RpcError};

/// Current envelope schema version
pub const ENVELOPE_VERSION: u8 = 1;

const FLAG_RESPONSE: u8 = 0x01;

/// Fixed part of the header before the payload bytes
const HEADER_LEN: usize = 1 + 4 + 4 + 1 + 1 + 4;

/// Outcome carried by a response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallStatus {
    /// Handler ran to completion
    Success = 0,
    /// Decode, execute or encode failed
    Failed = 1,
    /// No handler registered for the message type
    NotFound = 2,
}

impl CallStatus {
    /// Parse the wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CallStatus::Success),
            1 => Some(CallStatus::Failed),
            2 => Some(CallStatus::NotFound),
            _ => None,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Success => write!(f, "SUCCESS"),
            CallStatus::Failed => write!(f, "FAILED"),
            CallStatus::NotFound => write!(f, "NOT_FOUND"),
        }
    }
}

/// One request or response on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEnvelope {
    /// Correlation tag chosen by the caller
    pub tag: u32,
    /// Message type, see [`crate::calls::MessageType`]
    pub msg_type: u32,
    /// Direction flag
    pub is_response: bool,
    /// Meaningful on responses only
    pub status: CallStatus,
    /// Serialized call body
    pub payload: Bytes,
    /// Human-readable failure reason
    pub error_description: Option<String>,
}

impl CallEnvelope {
    /// Build a request envelope
    pub fn request(tag: u32, msg_type: u32, payload: Bytes) -> Self {
        Self {
            tag,
            msg_type,
            is_response: false,
            status: CallStatus::Success,
            payload,
            error_description: None,
        }
    }

    /// Successful response to this request
    pub fn success(&self, payload: Bytes) -> Self {
        Self {
            tag: self.tag,
            msg_type: self.msg_type,
            is_response: true,
            status: CallStatus::Success,
            payload,
            error_description: None,
        }
    }

    /// Failed response to this request
    pub fn failure(&self, status: CallStatus, description: impl Into<String>) -> Self {
        Self {
            tag: self.tag,
            msg_type: self.msg_type,
            is_response: true,
            status,
            payload: Bytes::new(),
            error_description: Some(description.into()),
        }
    }

    /// Serialize into a frame payload
    pub fn encode(&self) -> Bytes {
        let error_len = self.error_description.as_ref().map_or(0, |e| 4 + e.len());
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len() + 1 + error_len);

        buf.put_u8(ENVELOPE_VERSION);
        buf.put_u32(self.tag);
        buf.put_u32(self.msg_type);
        buf.put_u8(if self.is_response { FLAG_RESPONSE } else { 0 });
        buf.put_u8(self.status as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);

        match &self.error_description {
            Some(description) => {
                buf.put_u8(1);
                buf.put_u32(description.len() as u32);
                buf.put_slice(description.as_bytes());
            }
            None => buf.put_u8(0),
        }

        buf.freeze()
    }

    /// Parse a frame payload
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.remaining() < HEADER_LEN {
            return Err(RpcError::Malformed(format!(
                "header truncated ({} bytes)",
                buf.remaining()
            )));
        }

        let version = buf.get_u8();
        if version != ENVELOPE_VERSION {
            return Err(RpcError::UnsupportedVersion(version));
        }

        let tag = buf.get_u32();
        let msg_type = buf.get_u32();
        let flags = buf.get_u8();
        let status_raw = buf.get_u8();
        let status = CallStatus::from_u8(status_raw)
            .ok_or_else(|| RpcError::Malformed(format!("unknown status {}", status_raw)))?;

        let payload_len = buf.get_u32() as usize;
        if buf.remaining() < payload_len + 1 {
            return Err(RpcError::Malformed(format!(
                "payload truncated (declared {}, have {})",
                payload_len,
                buf.remaining()
            )));
        }
        let payload = buf.split_to(payload_len);

        let error_description = match buf.get_u8() {
            0 => None,
            _ => {
                if buf.remaining() < 4 {
                    return Err(RpcError::Malformed("error length truncated".to_string()));
                }
                let error_len = buf.get_u32() as usize;
                if buf.remaining() < error_len {
                    return Err(RpcError::Malformed("error text truncated".to_string()));
                }
                let raw = buf.split_to(error_len);
                let text = String::from_utf8(raw.to_vec())
                    .map_err(|_| RpcError::Malformed("error text is not utf-8".to_string()))?;
                Some(text)
            }
        };

        if buf.has_remaining() {
            return Err(RpcError::Malformed(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(Self {
            tag,
            msg_type,
            is_response: flags & FLAG_RESPONSE != 0,
            status,
            payload,
            error_description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_failure_keeps_tag() {
        let request = CallEnvelope::request(42, 3, Bytes::from_static(b"{}"));
        let response = request.failure(CallStatus::NotFound, "no handler");

        assert_eq!(response.tag, 42);
        assert_eq!(response.msg_type, 3);
        assert!(response.is_response);
        assert_eq!(response.status, CallStatus::NotFound);
        assert!(response.payload.is_empty());
    }

    #[test]
    fn test_truncated_header() {
        let err = CallEnvelope::decode(Bytes::from_static(&[1, 0, 0])).unwrap_err();
        assert!(matches!(err, RpcError::Malformed(_)));
    }

    #[test]
    fn test_wrong_version() {
        let mut raw = CallEnvelope::request(1, 1, Bytes::new()).encode().to_vec();
        raw[0] = 9;
        let err = CallEnvelope::decode(Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_payload_length_overrun() {
        let mut raw = CallEnvelope::request(1, 1, Bytes::from_static(b"abc"))
            .encode()
            .to_vec();
        // low byte of the declared payload length (offsets 11..15)
        raw[14] = 200;
        let err = CallEnvelope::decode(Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, RpcError::Malformed(_)));
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut raw = CallEnvelope::request(1, 1, Bytes::new()).encode().to_vec();
        raw[10] = 7;
        assert!(CallEnvelope::decode(Bytes::from(raw)).is_err());
    }

    fn status_strategy() -> impl Strategy<Value = CallStatus> {
        prop_oneof![
            Just(CallStatus::Success),
            Just(CallStatus::Failed),
            Just(CallStatus::NotFound),
        ]
    }

    proptest! {
        #[test]
        fn prop_envelope_roundtrip(
            tag in any::<u32>(),
            msg_type in any::<u32>(),
            is_response in any::<bool>(),
            status in status_strategy(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            error in proptest::option::of(".{0,64}"),
        ) {
            let envelope = CallEnvelope {
                tag,
                msg_type,
                is_response,
                status,
                payload: Bytes::from(payload),
                error_description: error,
            };

            let decoded = CallEnvelope::decode(envelope.encode()).unwrap();
            prop_assert_eq!(decoded, envelope);
        }
    }
}
