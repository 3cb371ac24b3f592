use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use courier_core::ids::UserId;

use crate::error::DispatchError;
use crate::shared_store::SharedStore;

/// Readiness flag policy. The TTL bounds how long a stale flag can outlive
/// its socket; flags are never refreshed, they expire and get re-marked on
/// the next registration.
#[derive(Clone, Debug)]
pub struct ReadinessConfig {
    pub flag_ttl: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            flag_ttl: Duration::from_secs(30),
            retry_attempts: 2,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Cross-process record of which (routing key, user) pairs have a
/// receive-ready socket. Store outages degrade to "not ready" after a
/// bounded retry; they never block a caller indefinitely.
pub struct ReadinessCoordinator {
    store: Arc<dyn SharedStore>,
    config: ReadinessConfig,
}

impl ReadinessCoordinator {
    pub fn new(store: Arc<dyn SharedStore>, config: ReadinessConfig) -> Self {
        Self { store, config }
    }

    fn flag_key(key: &str, user: &UserId) -> String {
        format!("ws:{key}:ready:{user}")
    }

    fn flag_prefix(key: &str) -> String {
        format!("ws:{key}:ready:")
    }

    /// Idempotent. Callers must have registered the receiving session first:
    /// a reader that observes this flag must find a live session.
    pub async fn mark_ready(&self, key: &str, user: &UserId) -> Result<(), DispatchError> {
        let flag = Self::flag_key(key, user);
        let mut attempt = 0;
        loop {
            match self
                .store
                .put_ttl(&flag, "1", self.config.flag_ttl)
                .await
            {
                Ok(()) => {
                    debug!(flag = %flag, "marked ready");
                    return Ok(());
                }
                Err(e) if attempt < self.config.retry_attempts => {
                    attempt += 1;
                    warn!(flag = %flag, attempt, error = %e, "mark ready failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn is_ready(&self, key: &str, user: &UserId) -> bool {
        let flag = Self::flag_key(key, user);
        let mut attempt = 0;
        loop {
            match self.store.exists(&flag).await {
                Ok(ready) => return ready,
                Err(e) if attempt < self.config.retry_attempts => {
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_delay).await;
                    warn!(flag = %flag, attempt, error = %e, "readiness check failed, retrying");
                }
                Err(e) => {
                    warn!(flag = %flag, error = %e, "readiness check failed, treating as not ready");
                    return false;
                }
            }
        }
    }

    /// Whether any participant is ready under the key. Used when the
    /// consumer identity is not fixed, e.g. the AI token stream.
    pub async fn has_any_ready(&self, key: &str) -> bool {
        let prefix = Self::flag_prefix(key);
        let mut attempt = 0;
        loop {
            match self.store.any_with_prefix(&prefix).await {
                Ok(found) => return found,
                Err(e) if attempt < self.config.retry_attempts => {
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_delay).await;
                    warn!(prefix = %prefix, attempt, error = %e, "any-ready check failed, retrying");
                }
                Err(e) => {
                    warn!(prefix = %prefix, error = %e, "any-ready check failed, treating as not ready");
                    return false;
                }
            }
        }
    }
}
