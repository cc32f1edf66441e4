//! Short-lived memo of permission decisions.
//!
//! Keyed by (user, item, kind); anonymous principals share one key and the
//! user part separates superuser and inactive sessions of the same id. Entries
//! expire after the configured TTL and the oldest entry is evicted when the
//! cache is full. Callers skip the cache entirely for items that changed
//! very recently (see [`crate::perms::modified_very_recently`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::RegistryConfig;
use crate::perms::PermissionKind;
use crate::principal::Principal;
use crate::types::ItemId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    user: String,
    item: ItemId,
    kind: PermissionKind,
}

impl CacheKey {
    fn new(principal: &Principal, item: ItemId, kind: PermissionKind) -> Self {
        Self {
            user: principal.cache_key(),
            item,
            kind,
        }
    }
}

/// Cached decision with TTL
#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    allowed: bool,
    cached_at: Instant,
}

impl CachedDecision {
    fn new(allowed: bool) -> Self {
        Self {
            allowed,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionCacheStats {
    pub entries: usize,
    pub expired: usize,
}

#[derive(Debug, Clone)]
pub struct PermissionCache {
    entries: Arc<RwLock<HashMap<CacheKey, CachedDecision>>>,
    ttl: Duration,
    capacity: usize,
}

impl PermissionCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            capacity,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.permission_ttl(), config.permission_cache_capacity)
    }

    /// A live decision, if one is cached.
    pub async fn get(&self, principal: &Principal, item: ItemId, kind: PermissionKind) -> Option<bool> {
        let key = CacheKey::new(principal, item, kind);
        let entries = self.entries.read().await;
        entries
            .get(&key)
            .filter(|cached| !cached.is_expired(self.ttl))
            .map(|cached| cached.allowed)
    }

    pub async fn insert(&self, principal: &Principal, item: ItemId, kind: PermissionKind, allowed: bool) {
        if self.capacity == 0 {
            return;
        }
        let key = CacheKey::new(principal, item, kind);
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, cached| !cached.is_expired(ttl));
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, cached)| cached.cached_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(key, CachedDecision::new(allowed));
    }

    /// Drop every decision about `item`, for all users.
    pub async fn invalidate_item(&self, item: ItemId) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| key.item != item);
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    pub async fn stats(&self) -> PermissionCacheStats {
        let entries = self.entries.read().await;
        PermissionCacheStats {
            entries: entries.len(),
            expired: entries.values().filter(|v| v.is_expired(self.ttl)).count(),
        }
    }
}
