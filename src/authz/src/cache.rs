//! Permission cache with TTL expiration
//!
//! The cache memoizes two kinds of answers:
//! - the flat permission set of a user (`permissions:{user}`)
//! - the resource IDs a user may act on for a (permission, resource type)
//!   pair (`resources:{user}:{permission}:{type}`)
//!
//! Entries are never updated in place. Every mutation that could change an
//! answer deletes the affected entries and the next read recomputes them.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::types::{PermissionId, ResourceId, UserId};

/// Default cache TTL (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default interval between sweeps of expired entries
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A cached answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Permissions(BTreeSet<String>),
    Resources(BTreeSet<ResourceId>),
}

/// Key of a cached answer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey<'a> {
    Permissions(UserId),
    Resources {
        user_id: UserId,
        permission_id: PermissionId,
        resource_type: &'a str,
    },
}

impl CacheKey<'_> {
    /// Prefix shared by every resource entry of a user
    pub fn resource_prefix(user_id: UserId) -> String {
        format!("resources:{}:", user_id)
    }
}

impl std::fmt::Display for CacheKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Permissions(user_id) => write!(f, "permissions:{}", user_id),
            CacheKey::Resources {
                user_id,
                permission_id,
                resource_type,
            } => write!(f, "resources:{}:{}:{}", user_id, permission_id, resource_type),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub invalidations: usize,
    pub entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Storage port for cached permission answers
///
/// Implementations must not fail: a backend that cannot answer reports a miss.
#[async_trait]
pub trait PermissionCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheValue>;

    async fn set(&self, key: &str, value: CacheValue);

    async fn delete(&self, key: &str);

    async fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    /// Delete every key starting with `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> usize {
        let keys = self.keys_with_prefix(prefix).await;
        for key in &keys {
            self.delete(key).await;
        }
        keys.len()
    }

    async fn clear(&self);

    fn stats(&self) -> CacheStats;
}

/// Cached entry with TTL
#[derive(Debug, Clone)]
struct CachedEntry {
    value: CacheValue,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(value: CacheValue) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Process-local TTL cache backed by a [`DashMap`]
pub struct InMemoryCache {
    entries: DashMap<String, CachedEntry>,
    ttl: Duration,
    stats: DashMap<&'static str, usize>,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            stats: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remove expired entries, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(self.ttl));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.add_stat("expirations", removed);
        }
        removed
    }

    /// Sweep expired entries on a fixed interval until the cache is dropped
    pub fn spawn_sweeper(cache: &Arc<InMemoryCache>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(cache);
        let interval = interval.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    debug!("Swept {} expired cache entries", removed);
                }
            }
        })
    }

    fn add_stat(&self, key: &'static str, n: usize) {
        *self.stats.entry(key).or_insert(0) += n;
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl PermissionCache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(self.ttl) {
                drop(entry);
                self.entries.remove(key);
                self.add_stat("expirations", 1);
                self.add_stat("misses", 1);
                return None;
            }

            self.add_stat("hits", 1);
            return Some(entry.value.clone());
        }

        self.add_stat("misses", 1);
        None
    }

    async fn set(&self, key: &str, value: CacheValue) {
        self.entries.insert(key.to_string(), CachedEntry::new(value));
    }

    async fn delete(&self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.add_stat("invalidations", 1);
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }

    async fn clear(&self) {
        let removed = self.entries.len();
        self.entries.clear();
        self.add_stat("invalidations", removed);
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            invalidations: self.get_stat("invalidations"),
            entries: self.entries.len(),
        }
    }
}

/// Cache that stores nothing; every read is a miss
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl PermissionCache for NoopCache {
    async fn get(&self, _key: &str) -> Option<CacheValue> {
        None
    }

    async fn set(&self, _key: &str, _value: CacheValue) {}

    async fn delete(&self, _key: &str) {}

    async fn keys_with_prefix(&self, _prefix: &str) -> Vec<String> {
        Vec::new()
    }

    async fn clear(&self) {}

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Drop every cached answer of the given users
pub async fn invalidate_users(cache: &dyn PermissionCache, user_ids: &[UserId]) {
    for user_id in user_ids {
        cache.delete(&CacheKey::Permissions(*user_id).to_string()).await;
        cache.delete_prefix(&CacheKey::resource_prefix(*user_id)).await;
    }
    if !user_ids.is_empty() {
        debug!("Invalidated cache entries for {} users", user_ids.len());
    }
}

/// Drop the cached resource answers of one (permission, type) pair for the given users
pub async fn invalidate_resource_entries(
    cache: &dyn PermissionCache,
    user_ids: &[UserId],
    permission_id: PermissionId,
    resource_type: &str,
) {
    for user_id in user_ids {
        let key = CacheKey::Resources {
            user_id: *user_id,
            permission_id,
            resource_type,
        };
        cache.delete(&key.to_string()).await;
    }
}
