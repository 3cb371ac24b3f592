use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

/// The external shared store is unreachable. Callers degrade per the
/// readiness contract instead of blocking.
#[derive(Clone, Debug, thiserror::Error)]
#[error("shared store unavailable: {0}")]
pub struct StoreUnavailable(pub String);

/// Cross-process key/value + set store with per-entry expiry. Readiness
/// flags and participant caches live here. Reads may be stale across
/// processes; writers must order their side effects accordingly.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn put_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreUnavailable>;
    async fn exists(&self, key: &str) -> Result<bool, StoreUnavailable>;
    async fn any_with_prefix(&self, prefix: &str) -> Result<bool, StoreUnavailable>;
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreUnavailable>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreUnavailable>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreUnavailable>;
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreUnavailable>;
}

struct ExpiringValue {
    _value: String,
    expires_at: Option<Instant>,
}

impl ExpiringValue {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Single-process implementation backed by DashMap. Expiry is enforced
/// lazily on read. Multi-process deployments substitute a network-backed
/// implementation of the same trait.
#[derive(Default)]
pub struct InMemorySharedStore {
    values: DashMap<String, ExpiringValue>,
    sets: DashMap<String, HashSet<String>>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self) {
        self.values.retain(|_, v| !v.expired());
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn put_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreUnavailable> {
        self.values.insert(
            key.to_owned(),
            ExpiringValue {
                _value: value.to_owned(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreUnavailable> {
        self.purge_expired();
        Ok(self.values.contains_key(key))
    }

    async fn any_with_prefix(&self, prefix: &str) -> Result<bool, StoreUnavailable> {
        self.purge_expired();
        Ok(self
            .values
            .iter()
            .any(|entry| entry.key().starts_with(prefix)))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreUnavailable> {
        self.sets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreUnavailable> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreUnavailable> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreUnavailable> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }
}
