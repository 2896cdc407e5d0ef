//! Durability cache: latest accepted payload per (sender, receiver) pair.
//!
//! The coordinator writes an entry before every publish attempt, so even a
//! message that later fails to publish leaves a queryable audit record. The
//! HTTP layer reads entries; nothing in the consume path ever deletes them.
//! Writes are last-writer-wins per key, no read-modify-write anywhere.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::{DeliveryError, DeliveryResult};
use crate::models::CacheEntry;

fn pair_cache_key(sender_id: Uuid, receiver_id: Uuid) -> String {
    format!("message:{}:{}", sender_id, receiver_id)
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Overwrite the entry for the pair. Atomic per key.
    async fn put_latest(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        entry: &CacheEntry,
    ) -> DeliveryResult<()>;

    async fn get_latest(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> DeliveryResult<Option<CacheEntry>>;
}

/// Redis-backed cache store shared across all coordinator instances.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
}

impl RedisCacheStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn put_latest(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        entry: &CacheEntry,
    ) -> DeliveryResult<()> {
        let key = pair_cache_key(sender_id, receiver_id);
        let value = serde_json::to_string(entry)
            .map_err(|e| DeliveryError::Cache(format!("serialize cache entry: {e}")))?;

        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&key, value)
            .await
            .map_err(|e| DeliveryError::Cache(format!("SET {key}: {e}")))?;
        Ok(())
    }

    async fn get_latest(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> DeliveryResult<Option<CacheEntry>> {
        let key = pair_cache_key(sender_id, receiver_id);

        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| DeliveryError::Cache(format!("GET {key}: {e}")))?;

        match raw {
            Some(json) => {
                let entry = serde_json::from_str(&json)
                    .map_err(|e| DeliveryError::Cache(format!("parse cache entry: {e}")))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

/// In-memory cache store for tests and local development.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn put_latest(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        entry: &CacheEntry,
    ) -> DeliveryResult<()> {
        self.entries
            .insert(pair_cache_key(sender_id, receiver_id), entry.clone());
        Ok(())
    }

    async fn get_latest(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> DeliveryResult<Option<CacheEntry>> {
        Ok(self
            .entries
            .get(&pair_cache_key(sender_id, receiver_id))
            .map(|e| e.clone()))
    }
}
