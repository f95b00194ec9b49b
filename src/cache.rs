//! Time-boxed memoization shared by the orchestrator and credential manager.
//!
//! The reference behavior used module-level memoized functions; here each
//! cache is an explicit object owned by the component that needs it, so tests
//! can construct and invalidate them directly.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::consts::{BUILDER_FEE_CACHE_TTL, EXTRA_AGENTS_CACHE_TTL, REBATE_BINDING_CACHE_TTL};
use crate::exchange::types::ExtraAgent;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// A small TTL cache with explicit invalidation.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value if present and not expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn set(&self, key: K, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// The memoized lookups whose answers gate trading enablement.
///
/// Every mutation that could change an answer (agent approved or removed,
/// builder fee changed, rebate binding reported) must invalidate the matching
/// cache; stale entries here directly produce wrong enablement decisions.
pub struct ExchangeCaches {
    /// Registered-agents listing, keyed by user address.
    pub extra_agents: TtlCache<String, Vec<ExtraAgent>>,
    /// Approved max builder fee, keyed by `"{user}-{builder}"`.
    pub approved_builder_fee: TtlCache<String, i64>,
    /// Rebate-binding status, keyed by `"{address}-{network_id}"`.
    pub rebate_binding: TtlCache<String, bool>,
}

impl ExchangeCaches {
    pub fn new() -> Self {
        Self {
            extra_agents: TtlCache::new(EXTRA_AGENTS_CACHE_TTL),
            approved_builder_fee: TtlCache::new(BUILDER_FEE_CACHE_TTL),
            rebate_binding: TtlCache::new(REBATE_BINDING_CACHE_TTL),
        }
    }

    /// Drops everything. Used when the server config version changes.
    pub async fn clear_all(&self) {
        self.extra_agents.clear().await;
        self.approved_builder_fee.clear().await;
        self.rebate_binding.clear().await;
    }
}

impl Default for ExchangeCaches {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_fresh_value() {
        let cache: TtlCache<String, u64> = TtlCache::new(Duration::from_secs(60));
        cache.set("k".to_string(), 7).await;
        assert_eq!(cache.get(&"k".to_string()).await, Some(7));
    }

    #[tokio::test]
    async fn expired_entry_is_missed() {
        let cache: TtlCache<String, u64> = TtlCache::new(Duration::from_millis(0));
        cache.set("k".to_string(), 7).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
    }

    #[tokio::test]
    async fn invalidate_removes_single_key() {
        let cache: TtlCache<String, u64> = TtlCache::new(Duration::from_secs(60));
        cache.set("a".to_string(), 1).await;
        cache.set("b".to_string(), 2).await;
        cache.invalidate(&"a".to_string()).await;
        assert_eq!(cache.get(&"a".to_string()).await, None);
        assert_eq!(cache.get(&"b".to_string()).await, Some(2));
    }
}
