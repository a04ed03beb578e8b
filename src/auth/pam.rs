//! PAM authentication provider

use async_trait::async_trait;
use zeroize::Zeroizing;

use super::{lookup_user, AuthError, Authenticator};
use crate::session::UserToken;

/// PAM-based authentication provider
pub struct PamAuthenticator {
    service: String,
}

impl PamAuthenticator {
    /// Create a provider for a PAM service name
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }
}

#[async_trait]
impl Authenticator for PamAuthenticator {
    async fn logon_user(&self, username: &str, _domain: &str, password: &str) -> Result<UserToken, AuthError> {
        let service = self.service.clone();
        let username = username.to_string();
        let password = Zeroizing::new(password.to_string());

        // PAM conversations block; keep them off the runtime threads
        tokio::task::spawn_blocking(move || {
            let mut authenticator = pam::Authenticator::with_password(&service)
                .map_err(|e| AuthError::Backend(format!("failed to create PAM authenticator: {}", e)))?;

            authenticator
                .get_handler()
                .set_credentials(username.as_str(), password.as_str());

            authenticator
                .authenticate()
                .map_err(|_| AuthError::InvalidCredentials)?;

            lookup_user(&username)?.ok_or(AuthError::UnknownUser(username))
        })
        .await
        .map_err(|e| AuthError::Backend(format!("PAM task failed: {}", e)))?
    }
}
