//! Content-addressable result cache.
//!
//! Keys are SHA-256 digests of the normalized request, so requests that differ
//! only in casing, spacing or option order share an entry. Expiry is lazy:
//! [`Cache::get`] treats an expired entry as absent, while
//! [`Cache::get_including_expired`] still sees it for degraded responses.
//!
//! Storage sits behind [`CacheStore`]; the in-memory store and the Postgres
//! store ([`crate::db::Db`]) both implement it.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{FORCE_CACHE_BYPASS, GenerationRequest, KNOWN_FLAGS, normalize_text};
use crate::telemetry::metrics;

pub use memory::MemoryCache;

/// Default time-to-live: 7 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Hex-encoded SHA-256 of a normalized request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a request.
    ///
    /// Topic and audience are trimmed, lowercased and whitespace-collapsed;
    /// option keys are normalized the same way and sorted. The request id and
    /// the cache-bypass flag do not take part, and a known flag set to `false`
    /// hashes the same as an absent one.
    pub fn derive(request: &GenerationRequest) -> Self {
        let mut options: Vec<(String, bool)> = request
            .options()
            .iter()
            .map(|(k, v)| (normalize_text(k), *v))
            .filter(|(k, _)| k != FORCE_CACHE_BYPASS)
            .filter(|(k, v)| *v || !KNOWN_FLAGS.contains(&k.as_str()))
            .collect();
        options.sort();

        let mut hasher = Sha256::new();
        for part in [
            "v1".to_string(),
            request.kind().to_string(),
            normalize_text(request.topic()),
            normalize_text(request.audience()),
            request.item_count().to_string(),
            request.difficulty().to_string(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        for (key, value) in options {
            hasher.update(key.as_bytes());
            hasher.update([b'=', u8::from(value), 0x1f]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-derived key (e.g. read back from storage).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored result. `expires_at > created_at` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self> {
        if ttl.is_zero() {
            return Err(Error::Other("cache ttl must be positive".to_string()));
        }
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|e| Error::Other(format!("cache ttl out of range: {e}")))?;
        let expires_at = created_at
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::Other("cache ttl out of range".to_string()))?;
        Ok(Self {
            key,
            payload,
            created_at,
            expires_at,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Backing storage for cache entries.
///
/// `load` returns entries regardless of expiry; freshness is decided by
/// [`Cache`]. `store` keeps whichever entry for a key was created last.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    async fn store(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, key: &CacheKey) -> Result<bool>;

    /// Drop every entry expired at `now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Expiry-aware front for a [`CacheStore`].
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self::with_clock(store, default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CacheStore>, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            default_ttl,
        }
    }

    /// In-memory cache with no size bound.
    pub fn in_memory(default_ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCache::new()), default_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fresh entry for `key`, or `None` when absent or expired.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let now = self.clock.now();
        let entry = self.store.load(key).await?;
        let result = match &entry {
            None => "miss",
            Some(e) if e.is_expired(now) => "expired",
            Some(_) => "hit",
        };
        metrics::cache_lookups().add(1, &[KeyValue::new("result", result)]);
        Ok(entry.filter(|e| !e.is_expired(now)))
    }

    /// Entry for `key` even if it has expired.
    pub async fn get_including_expired(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        self.store.load(key).await
    }

    /// Store `payload` under `key`, expiring `ttl` from now.
    pub async fn put(&self, key: CacheKey, payload: serde_json::Value, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(key, payload, self.clock.now(), ttl)?;
        self.store.store(entry).await
    }

    /// Store with the configured default TTL.
    pub async fn put_default(&self, key: CacheKey, payload: serde_json::Value) -> Result<()> {
        self.put(key, payload, self.default_ttl).await
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.store.remove(key).await
    }

    /// Sweep expired entries from the store.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.store.purge_expired(self.clock.now()).await
    }
}
