//! In-process cache store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{CacheEntry, CacheKey, CacheStore};
use crate::error::Result;

/// Mutex-guarded map, optionally bounded.
///
/// When `max_entries` is set and a new key would exceed it, the entry created
/// longest ago is evicted first.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    max_entries: Option<usize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounded(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: Some(max_entries.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn store(&self, entry: CacheEntry) -> Result<()> {
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get(&entry.key) {
            if existing.created_at > entry.created_at {
                return Ok(());
            }
        } else if let Some(max) = self.max_entries {
            while entries.len() >= max {
                let Some(oldest) = entries
                    .values()
                    .min_by_key(|e| e.created_at)
                    .map(|e| e.key.clone())
                else {
                    break;
                };
                entries.remove(&oldest);
            }
        }

        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}
