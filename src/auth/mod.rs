//! Authentication providers
//!
//! The session manager only needs one operation from an authentication
//! backend: turn `(username, domain, password)` into a [`UserToken`] that a
//! backend process can be launched with.
//!
//! Providers:
//! - `none` - accepts any non-empty username (development, kiosks)
//! - `pam` - PAM conversation via the `pam` crate (feature `pam-auth`)
//!
//! Every provider is wrapped in a [`LockoutAuthenticator`] that locks an
//! account out after repeated failures.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::session::UserToken;

pub mod lockout;
#[cfg(feature = "pam-auth")]
pub mod pam;

pub use lockout::LockoutAuthenticator;

/// Authentication failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Wrong username or password
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Too many recent failures
    #[error("Account {0} temporarily locked due to failed login attempts")]
    LockedOut(String),

    /// Credentials were accepted but no such system account exists
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Provider failure unrelated to the credentials
    #[error("Authentication backend error: {0}")]
    Backend(String),
}

/// LogonUser contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify credentials and resolve the launch identity
    async fn logon_user(&self, username: &str, domain: &str, password: &str) -> Result<UserToken, AuthError>;
}

/// Resolve a system account
pub fn lookup_user(username: &str) -> Result<Option<UserToken>, AuthError> {
    let user = nix::unistd::User::from_name(username)
        .map_err(|e| AuthError::Backend(format!("user lookup failed: {}", e)))?;

    Ok(user.map(|user| UserToken {
        username: user.name,
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        home: user.dir,
        shell: user.shell,
    }))
}

/// Accepts every non-empty username without checking the password
pub struct NoAuthenticator;

#[async_trait]
impl Authenticator for NoAuthenticator {
    async fn logon_user(&self, username: &str, _domain: &str, _password: &str) -> Result<UserToken, AuthError> {
        if username.trim().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let username = username.to_string();
        let known = tokio::task::spawn_blocking({
            let username = username.clone();
            move || lookup_user(&username)
        })
        .await
        .map_err(|e| AuthError::Backend(format!("user lookup task failed: {}", e)))??;

        // Unknown accounts run with the session manager's own identity
        Ok(known.unwrap_or_else(|| UserToken {
            username,
            uid: nix::unistd::geteuid().as_raw(),
            gid: nix::unistd::getegid().as_raw(),
            home: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp")),
            shell: PathBuf::from("/bin/sh"),
        }))
    }
}

/// Create the configured provider, wrapped with lockout tracking
pub fn create_authenticator(config: &AuthConfig) -> Result<Arc<dyn Authenticator>> {
    let provider: Arc<dyn Authenticator> = match config.provider.as_str() {
        "none" => {
            warn!("No authentication configured - every username is accepted");
            Arc::new(NoAuthenticator)
        }
        #[cfg(feature = "pam-auth")]
        "pam" => {
            info!("Creating PAM authentication provider (service: {})", config.pam_service);
            Arc::new(pam::PamAuthenticator::new(&config.pam_service))
        }
        #[cfg(not(feature = "pam-auth"))]
        "pam" => {
            anyhow::bail!("PAM authentication requested but this build lacks the pam-auth feature")
        }
        other => anyhow::bail!("Unknown authentication provider: {}", other),
    };

    info!(
        "Authentication provider {} (lockout after {} failures for {}s)",
        config.provider, config.max_failed_attempts, config.lockout_duration
    );

    Ok(Arc::new(LockoutAuthenticator::new(
        provider,
        config.max_failed_attempts,
        Duration::from_secs(config.lockout_duration),
    )))
}
