//! LogonUser and AuthenticateUser

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroizing;

use super::{CallContext, JsonHandler, MessageType, Result};
use crate::session::lifecycle::{GreeterOutcome, LogonParams};
use crate::session::ClientSettings;

/// Authenticate a client connection and hand back a running session
pub struct LogonUser;

/// LogonUser request
#[derive(Debug, Deserialize, Serialize)]
pub struct LogonUserRequest {
    /// Front-end connection id
    pub connection_id: u32,
    /// Login name
    pub username: String,
    /// Domain, may be empty
    #[serde(default)]
    pub domain: String,
    /// Password, may be empty
    #[serde(default)]
    pub password: String,
    /// Requested width
    #[serde(default)]
    pub width: Option<u32>,
    /// Requested height
    #[serde(default)]
    pub height: Option<u32>,
    /// Requested colour depth
    #[serde(default)]
    pub color_depth: Option<u32>,
}

impl LogonUserRequest {
    fn client_settings(&self) -> Option<ClientSettings> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(ClientSettings {
                width,
                height,
                color_depth: self.color_depth.unwrap_or(0),
            }),
            _ => None,
        }
    }
}

/// LogonUser response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogonUserResponse {
    /// Session the connection is attached to
    pub session_id: u32,
    /// Backend endpoint the front end connects to
    pub service_endpoint: String,
    /// False when the connection landed on a login-screen session
    pub authenticated: bool,
    /// Effective width
    pub width: Option<u32>,
    /// Effective height
    pub height: Option<u32>,
    /// Effective colour depth
    pub color_depth: Option<u32>,
}

#[async_trait]
impl JsonHandler for LogonUser {
    const MESSAGE_TYPE: MessageType = MessageType::LogonUser;
    type Request = LogonUserRequest;
    type Response = LogonUserResponse;

    async fn handle(ctx: &CallContext, request: LogonUserRequest) -> Result<LogonUserResponse> {
        let client_settings = request.client_settings();
        let params = LogonParams {
            connection_id: request.connection_id,
            username: request.username,
            domain: request.domain,
            password: Zeroizing::new(request.password),
            client_settings,
        };

        let outcome = ctx.app.logon_user(params, ctx.peer).await?;
        let settings = outcome.session.client_settings;

        info!(
            "Connection {} attached to session {} at {}",
            outcome.connection_id,
            outcome.session.session_id,
            outcome.endpoint.display()
        );

        Ok(LogonUserResponse {
            session_id: outcome.session.session_id,
            service_endpoint: outcome.endpoint.to_string_lossy().into_owned(),
            authenticated: outcome.session.authenticated,
            width: settings.map(|s| s.width),
            height: settings.map(|s| s.height),
            color_depth: settings.map(|s| s.color_depth),
        })
    }
}

/// Credentials entered on a login-screen session
pub struct AuthenticateUser;

/// AuthenticateUser request
#[derive(Debug, Deserialize, Serialize)]
pub struct AuthenticateUserRequest {
    /// Login-screen session submitting the credentials
    pub session_id: u32,
    /// Login name
    pub username: String,
    /// Domain, may be empty
    #[serde(default)]
    pub domain: String,
    /// Password
    #[serde(default)]
    pub password: String,
}

/// AuthenticateUser response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthenticateUserResponse {
    /// Whether the credentials were accepted
    pub authenticated: bool,
    /// User session the connection was switched to
    pub session_id: Option<u32>,
}

#[async_trait]
impl JsonHandler for AuthenticateUser {
    const MESSAGE_TYPE: MessageType = MessageType::AuthenticateUser;
    type Request = AuthenticateUserRequest;
    type Response = AuthenticateUserResponse;

    async fn handle(ctx: &CallContext, request: AuthenticateUserRequest) -> Result<AuthenticateUserResponse> {
        let password = Zeroizing::new(request.password);
        let outcome = ctx
            .app
            .authenticate_greeter(request.session_id, &request.username, &request.domain, &password)
            .await?;

        Ok(match outcome {
            GreeterOutcome::Rejected => AuthenticateUserResponse {
                authenticated: false,
                session_id: None,
            },
            GreeterOutcome::Switched { session_id } => AuthenticateUserResponse {
                authenticated: true,
                session_id: Some(session_id),
            },
        })
    }
}
