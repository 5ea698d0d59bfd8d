//! `generation_cache` table operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::error::Result;
use crate::telemetry::metrics;

#[async_trait]
impl CacheStore for super::Db {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row: Option<CacheRow> = sqlx::query_as(
            "SELECT key, payload, created_at, expires_at
             FROM generation_cache WHERE key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(self.pool())
        .await?;
        record("load");
        Ok(row.map(CacheEntry::from))
    }

    async fn store(&self, entry: CacheEntry) -> Result<()> {
        // Upsert, but never let an older generation replace a newer one.
        sqlx::query(
            "INSERT INTO generation_cache (key, payload, created_at, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (key) DO UPDATE
             SET payload = EXCLUDED.payload,
                 created_at = EXCLUDED.created_at,
                 expires_at = EXCLUDED.expires_at
             WHERE generation_cache.created_at <= EXCLUDED.created_at",
        )
        .bind(entry.key.as_str())
        .bind(&entry.payload)
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .execute(self.pool())
        .await?;
        record("store");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM generation_cache WHERE key = $1")
            .bind(key.as_str())
            .execute(self.pool())
            .await?;
        record("remove");
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM generation_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await?;
        record("purge");
        Ok(result.rows_affected())
    }
}

fn record(operation: &'static str) {
    metrics::cache_operations().add(
        1,
        &[
            KeyValue::new("store", "postgres"),
            KeyValue::new("operation", operation),
        ],
    );
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct CacheRow {
    key: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<CacheRow> for CacheEntry {
    fn from(row: CacheRow) -> Self {
        Self {
            key: CacheKey::from_hex(row.key),
            payload: row.payload,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}
