//! Failed-logon lockout
//!
//! Wraps any provider. After `max_failed_attempts` consecutive failures for
//! an account, further attempts are refused without consulting the provider
//! until the lockout expires. A success resets the counter. Counts older
//! than the lockout duration are forgotten, so probing many account names
//! does not grow the table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{AuthError, Authenticator};
use crate::session::UserToken;

#[derive(Debug, Clone)]
struct FailedLoginTracker {
    count: usize,
    last_failure: Instant,
    locked_until: Option<Instant>,
}

impl FailedLoginTracker {
    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        match self.locked_until {
            Some(locked_until) => now >= locked_until,
            None => now.duration_since(self.last_failure) >= window,
        }
    }
}

/// Provider wrapper enforcing account lockout
pub struct LockoutAuthenticator {
    inner: Arc<dyn Authenticator>,
    failed_attempts: Mutex<HashMap<String, FailedLoginTracker>>,
    max_failed_attempts: usize,
    lockout_duration: Duration,
}

fn account_key(username: &str, domain: &str) -> String {
    format!("{}\\{}", domain.to_ascii_lowercase(), username)
}

impl LockoutAuthenticator {
    /// Wrap a provider; `max_failed_attempts == 0` disables lockout
    pub fn new(inner: Arc<dyn Authenticator>, max_failed_attempts: usize, lockout_duration: Duration) -> Self {
        Self {
            inner,
            failed_attempts: Mutex::new(HashMap::new()),
            max_failed_attempts,
            lockout_duration,
        }
    }

    fn is_locked_out(&self, key: &str) -> bool {
        let mut attempts = self.failed_attempts.lock();

        if let Some(tracker) = attempts.get(key) {
            if let Some(locked_until) = tracker.locked_until {
                if Instant::now() < locked_until {
                    debug!("Account {} is locked out", key);
                    return true;
                }
                // expired lockout starts a fresh count
                attempts.remove(key);
            }
        }

        false
    }

    fn record_failed_attempt(&self, key: &str) {
        if self.max_failed_attempts == 0 {
            return;
        }

        let now = Instant::now();
        let mut attempts = self.failed_attempts.lock();
        attempts.retain(|_, tracker| !tracker.is_stale(now, self.lockout_duration));

        let tracker = attempts.entry(key.to_string()).or_insert(FailedLoginTracker {
            count: 0,
            last_failure: now,
            locked_until: None,
        });

        tracker.count += 1;
        tracker.last_failure = now;

        if tracker.count >= self.max_failed_attempts {
            tracker.locked_until = Some(now + self.lockout_duration);
            warn!("Account {} locked out after {} failed attempts", key, tracker.count);
        }
    }

    fn reset_failed_attempts(&self, key: &str) {
        self.failed_attempts.lock().remove(key);
    }
}

#[async_trait]
impl Authenticator for LockoutAuthenticator {
    async fn logon_user(&self, username: &str, domain: &str, password: &str) -> Result<UserToken, AuthError> {
        let key = account_key(username, domain);

        if self.is_locked_out(&key) {
            return Err(AuthError::LockedOut(key));
        }

        match self.inner.logon_user(username, domain, password).await {
            Ok(token) => {
                self.reset_failed_attempts(&key);
                info!("Authentication successful for {}", key);
                Ok(token)
            }
            Err(e @ AuthError::Backend(_)) => {
                warn!("Authentication backend failure for {}: {}", key, e);
                Err(e)
            }
            Err(e) => {
                self.record_failed_attempt(&key);
                warn!("Authentication failed for {}: {}", key, e);
                Err(e)
            }
        }
    }
}
