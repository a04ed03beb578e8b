//! Virtual channel policy

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CallContext, JsonHandler, MessageType, Result};

/// Whether a static virtual channel may be opened
pub struct IsChannelAllowed;

/// IsChannelAllowed request
#[derive(Debug, Deserialize, Serialize)]
pub struct IsChannelAllowedRequest {
    /// Channel name as announced by the client
    pub channel_name: String,
}

/// IsChannelAllowed response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IsChannelAllowedResponse {
    /// Policy decision
    pub allowed: bool,
}

#[async_trait]
impl JsonHandler for IsChannelAllowed {
    const MESSAGE_TYPE: MessageType = MessageType::IsChannelAllowed;
    type Request = IsChannelAllowedRequest;
    type Response = IsChannelAllowedResponse;

    async fn handle(ctx: &CallContext, request: IsChannelAllowedRequest) -> Result<IsChannelAllowedResponse> {
        let allowed = ctx.app.config.channels.is_allowed(&request.channel_name);
        debug!("Channel {} allowed: {}", request.channel_name, allowed);
        Ok(IsChannelAllowedResponse { allowed })
    }
}
