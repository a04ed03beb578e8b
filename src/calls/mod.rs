//! Call catalogue and dispatch table
//!
//! Every inbound message type maps to a factory producing a fresh handler for
//! each call. A handler goes through three steps, each only after the
//! previous one succeeded:
//!
//! ```text
//! payload ──decode_request──> request ──execute(ctx)──> response ──encode_response──> payload
//!      \___________________________ any failure: Failed + description ___________________/
//! ```
//!
//! Unknown message types are answered with `NotFound` and never reach a
//! handler. Bodies are JSON documents.
//!
//! Outbound calls (session manager to front end or backend) implement
//! [`OutboundCall`] and are issued with [`invoke`].

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::rpc::{CallEnvelope, CallStatus, PeerId, RpcChannel};

pub mod channel;
pub mod error;
pub mod logon;
pub mod outbound;
pub mod ping;
pub mod session;

pub use error::{CallError, Result};

/// Wire message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Liveness check
    Ping = 1,
    /// Virtual channel policy lookup
    IsChannelAllowed = 2,
    /// Authenticate and obtain a running session
    LogonUser = 3,
    /// Client connection dropped
    DisconnectUserSession = 4,
    /// End a session
    LogOffUserSession = 5,
    /// Greeter submits credentials for its session
    AuthenticateUser = 6,
    /// Snapshot of all sessions
    EnumerateSessions = 7,
    /// Move a connection to another endpoint (outbound)
    SwitchTo = 101,
    /// Tell a backend its session is ending (outbound)
    LogOffNotify = 102,
}

impl MessageType {
    /// Parse a wire value
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            1 => Self::Ping,
            2 => Self::IsChannelAllowed,
            3 => Self::LogonUser,
            4 => Self::DisconnectUserSession,
            5 => Self::LogOffUserSession,
            6 => Self::AuthenticateUser,
            7 => Self::EnumerateSessions,
            101 => Self::SwitchTo,
            102 => Self::LogOffNotify,
            _ => return None,
        })
    }

    /// Wire value
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Name used in logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::IsChannelAllowed => "IsChannelAllowed",
            Self::LogonUser => "LogonUser",
            Self::DisconnectUserSession => "DisconnectUserSession",
            Self::LogOffUserSession => "LogOffUserSession",
            Self::AuthenticateUser => "AuthenticateUser",
            Self::EnumerateSessions => "EnumerateSessions",
            Self::SwitchTo => "SwitchTo",
            Self::LogOffNotify => "LogOffNotify",
        }
    }
}

/// Who is calling: the application plus the peer the request arrived on
#[derive(Clone)]
pub struct CallContext {
    /// Shared application state
    pub app: Arc<AppContext>,
    /// Originating peer, `None` for calls issued by the session manager itself
    pub peer: Option<PeerId>,
}

impl CallContext {
    /// Context for a request received from `peer`
    pub fn new(app: Arc<AppContext>, peer: Option<PeerId>) -> Self {
        Self { app, peer }
    }

    /// Context for calls the session manager dispatches to itself
    pub fn internal(app: Arc<AppContext>) -> Self {
        Self { app, peer: None }
    }
}

/// One inbound call, created fresh per request
#[async_trait]
pub trait InboundCall: Send {
    /// Parse the request payload
    fn decode_request(&mut self, payload: &[u8]) -> Result<()>;

    /// Perform the call
    async fn execute(&mut self, ctx: &CallContext) -> Result<()>;

    /// Serialize the response payload
    fn encode_response(&self) -> Result<Bytes>;
}

/// A call with JSON request and response bodies
#[async_trait]
pub trait JsonHandler: Send + Sync + 'static {
    /// Message type served by this handler
    const MESSAGE_TYPE: MessageType;

    /// Request body
    type Request: DeserializeOwned + Send + 'static;

    /// Response body
    type Response: Serialize + Send + Sync + 'static;

    /// Perform the call
    async fn handle(ctx: &CallContext, request: Self::Request) -> Result<Self::Response>;
}

/// Adapter running a [`JsonHandler`] through the three call steps
pub struct JsonCall<H: JsonHandler> {
    request: Option<H::Request>,
    response: Option<H::Response>,
    _handler: PhantomData<fn() -> H>,
}

impl<H: JsonHandler> Default for JsonCall<H> {
    fn default() -> Self {
        Self {
            request: None,
            response: None,
            _handler: PhantomData,
        }
    }
}

#[async_trait]
impl<H: JsonHandler> InboundCall for JsonCall<H> {
    fn decode_request(&mut self, payload: &[u8]) -> Result<()> {
        self.request = Some(from_payload(payload).map_err(CallError::InvalidRequest)?);
        Ok(())
    }

    async fn execute(&mut self, ctx: &CallContext) -> Result<()> {
        let request = self
            .request
            .take()
            .ok_or_else(|| CallError::InvalidRequest("request was not decoded".to_string()))?;
        self.response = Some(H::handle(ctx, request).await?);
        Ok(())
    }

    fn encode_response(&self) -> Result<Bytes> {
        let response = self
            .response
            .as_ref()
            .ok_or_else(|| CallError::Encode("call was not executed".to_string()))?;
        to_payload(response).map_err(CallError::Encode)
    }
}

/// Serialize a JSON body
pub fn to_payload<T: Serialize>(value: &T) -> std::result::Result<Bytes, String> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| e.to_string())
}

/// Parse a JSON body; an empty payload is read as an empty object
pub fn from_payload<T: DeserializeOwned>(payload: &[u8]) -> std::result::Result<T, String> {
    let payload = if payload.is_empty() { b"{}".as_slice() } else { payload };
    serde_json::from_slice(payload).map_err(|e| e.to_string())
}

/// Creates a fresh handler for one call
pub type CallFactory = fn() -> Box<dyn InboundCall>;

fn json_factory<H: JsonHandler>() -> Box<dyn InboundCall> {
    Box::new(JsonCall::<H>::default())
}

/// Dispatch table from message type to handler factory
#[derive(Default)]
pub struct CallRegistry {
    factories: HashMap<u32, CallFactory>,
}

impl CallRegistry {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every inbound call of the session manager
    pub fn register_all() -> Self {
        let mut registry = Self::new();
        registry.register::<ping::Ping>();
        registry.register::<channel::IsChannelAllowed>();
        registry.register::<logon::LogonUser>();
        registry.register::<session::DisconnectUserSession>();
        registry.register::<session::LogOffUserSession>();
        registry.register::<logon::AuthenticateUser>();
        registry.register::<session::EnumerateSessions>();
        registry
    }

    /// Register a JSON handler under its message type
    pub fn register<H: JsonHandler>(&mut self) {
        self.register_factory(H::MESSAGE_TYPE.as_u32(), json_factory::<H>);
    }

    /// Register a raw factory; replaces any previous entry
    pub fn register_factory(&mut self, msg_type: u32, factory: CallFactory) {
        if self.factories.insert(msg_type, factory).is_some() {
            warn!("Replaced handler for message type {}", msg_type);
        }
    }

    /// Whether a message type has a handler
    pub fn contains(&self, msg_type: u32) -> bool {
        self.factories.contains_key(&msg_type)
    }

    /// Run one request and build its response envelope
    pub async fn dispatch(&self, request: &CallEnvelope, ctx: &CallContext) -> CallEnvelope {
        let label = MessageType::from_u32(request.msg_type)
            .map(MessageType::name)
            .unwrap_or("unknown");

        let Some(factory) = self.factories.get(&request.msg_type) else {
            warn!("No handler for message type {} (tag {})", request.msg_type, request.tag);
            return request.failure(
                CallStatus::NotFound,
                format!("unknown message type {}", request.msg_type),
            );
        };

        debug!("Dispatching {} (tag {})", label, request.tag);
        let mut call = factory();

        if let Err(e) = call.decode_request(&request.payload) {
            warn!("{} rejected: {}", label, e);
            return request.failure(CallStatus::Failed, e.to_string());
        }

        if let Err(e) = call.execute(ctx).await {
            warn!("{} failed: {}", label, e);
            return request.failure(CallStatus::Failed, e.to_string());
        }

        match call.encode_response() {
            Ok(payload) => request.success(payload),
            Err(e) => {
                warn!("{} failed: {}", label, e);
                request.failure(CallStatus::Failed, e.to_string())
            }
        }
    }
}

/// A call the session manager issues to a peer
pub trait OutboundCall: Sync {
    /// Message type of the request
    const MESSAGE_TYPE: MessageType;

    /// Decoded response
    type Response;

    /// Serialize the request payload
    fn encode_request(&self) -> Result<Bytes>;

    /// Parse the response payload
    fn decode_response(&self, payload: &[u8]) -> Result<Self::Response>;
}

/// Issue an outbound call and wait for its response
pub async fn invoke<C: OutboundCall>(channel: &RpcChannel, call: &C, timeout: Duration) -> Result<C::Response> {
    let payload = call.encode_request()?;
    let response = channel
        .call_raw(C::MESSAGE_TYPE.as_u32(), payload, timeout)
        .await?;
    call.decode_response(&response.payload)
}
