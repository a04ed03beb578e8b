//! Ping

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CallContext, JsonHandler, MessageType, Result};

/// Liveness check
pub struct Ping;

/// Ping request (no fields)
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PingRequest {}

/// Ping response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PingResponse {
    /// Session manager version
    pub version: String,
}

#[async_trait]
impl JsonHandler for Ping {
    const MESSAGE_TYPE: MessageType = MessageType::Ping;
    type Request = PingRequest;
    type Response = PingResponse;

    async fn handle(_ctx: &CallContext, _request: PingRequest) -> Result<PingResponse> {
        Ok(PingResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
