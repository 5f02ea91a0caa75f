//! Durable key/value cache with an in-process fallback
//!
//! Baselines and change signatures live in the durable cache so they survive
//! restarts. When it is unreachable the engine keeps running on the memory
//! cache and logs a single warning.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[async_trait]
pub trait DurableCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64>;
}

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}

/// In-memory cache with per-entry TTL
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_now(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn set_now(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }
}

#[async_trait]
impl DurableCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.get_now(key))
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()> {
        self.set_now(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

/// Durable cache backed by an in-memory copy
///
/// Writes go to both layers. Reads prefer the durable layer and fall back
/// to memory when it errors or has no entry.
pub struct FallbackCache {
    primary: Option<Arc<dyn DurableCache>>,
    memory: MemoryCache,
    warned: AtomicBool,
    primary_errors: AtomicU64,
}

impl FallbackCache {
    pub fn new(primary: Arc<dyn DurableCache>) -> Self {
        Self {
            primary: Some(primary),
            memory: MemoryCache::new(),
            warned: AtomicBool::new(false),
            primary_errors: AtomicU64::new(0),
        }
    }

    /// No durable layer at all; warns once on first use
    pub fn memory_only() -> Self {
        Self {
            primary: None,
            memory: MemoryCache::new(),
            warned: AtomicBool::new(false),
            primary_errors: AtomicU64::new(0),
        }
    }

    /// Running without a healthy durable layer
    pub fn is_degraded(&self) -> bool {
        self.primary.is_none() || self.primary_errors.load(Ordering::Relaxed) > 0
    }

    pub fn primary_errors(&self) -> u64 {
        self.primary_errors.load(Ordering::Relaxed)
    }

    fn degrade(&self, reason: &str) {
        self.primary_errors.fetch_add(1, Ordering::Relaxed);
        if !self.warned.swap(true, Ordering::SeqCst) {
            warn!(
                "Durable cache unavailable ({}); using in-memory fallback, state will not survive a restart",
                reason
            );
        } else {
            debug!("Durable cache error: {}", reason);
        }
    }

    fn primary(&self) -> Option<&Arc<dyn DurableCache>> {
        if self.primary.is_none() && !self.warned.swap(true, Ordering::SeqCst) {
            warn!("No durable cache configured; using in-memory fallback");
        }
        self.primary.as_ref()
    }
}

#[async_trait]
impl DurableCache for FallbackCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        if let Some(primary) = self.primary() {
            match primary.get(key).await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(e) => self.degrade(&e.to_string()),
            }
        }
        Ok(self.memory.get_now(key))
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()> {
        if let Some(primary) = self.primary() {
            if let Err(e) = primary.set(key, value.clone(), ttl).await {
                self.degrade(&e.to_string());
            }
        }
        self.memory.set_now(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if let Some(primary) = self.primary() {
            if let Err(e) = primary.delete(key).await {
                self.degrade(&e.to_string());
            }
        }
        self.memory.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut purged = self.memory.purge_expired().await?;
        if let Some(primary) = self.primary() {
            match primary.purge_expired().await {
                Ok(n) => purged += n,
                Err(e) => self.degrade(&e.to_string()),
            }
        }
        if purged > 0 {
            info!("Purged {} expired cache entries", purged);
        }
        Ok(purged)
    }
}
