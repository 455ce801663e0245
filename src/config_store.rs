//! Durable operator state: field mapping, feed request and photo cursor.
//!
//! Backed by Redis when `REDIS_URL` is set, otherwise by process memory.

use crate::catalog::FieldMapping;
use crate::feed::FeedRequestConfig;
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

const MAPPING_KEY: &str = "mapping";
const FEED_KEY: &str = "feed";
const CURSOR_KEY: &str = "photo_cursor";
const CURSOR_OWNER_KEY: &str = "photo_cursor_owner";
const FAILED_PHOTOS_KEY: &str = "photo_failed_ids";

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("config backend failed: {0}")]
    Backend(String),
    #[error("stored value for `{key}` is invalid: {message}")]
    Decode { key: String, message: String },
    #[error("photo cursor is owned by another run")]
    CursorNotOwned,
}

#[async_trait]
pub trait SyncConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, ConfigStoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ConfigStoreError>;
    /// Writes `key` only while `guard_key` holds `expected`. Returns whether
    /// the write happened.
    async fn set_if(
        &self,
        guard_key: &str,
        expected: &str,
        key: &str,
        value: &str,
    ) -> Result<bool, ConfigStoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ConfigStoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigStoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ConfigStoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn set_if(
        &self,
        guard_key: &str,
        expected: &str,
        key: &str,
        value: &str,
    ) -> Result<bool, ConfigStoreError> {
        let mut guard = self.entries.lock().await;
        if guard.get(guard_key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        guard.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

const SET_IF_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[2], ARGV[2])
  return 1
end
return 0
"#;

#[derive(Clone)]
pub struct RedisConfigStore {
    client: redis::Client,
    prefix: String,
}

impl RedisConfigStore {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, ConfigStoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)
    }
}

fn backend(err: redis::RedisError) -> ConfigStoreError {
    ConfigStoreError::Backend(err.to_string())
}

#[async_trait]
impl SyncConfigStore for RedisConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ConfigStoreError> {
        let mut conn = self.connection().await?;
        conn.get(self.key(key)).await.map_err(backend)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigStoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.set(self.key(key), value).await.map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ConfigStoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(self.key(key)).await.map_err(backend)?;
        Ok(())
    }

    async fn set_if(
        &self,
        guard_key: &str,
        expected: &str,
        key: &str,
        value: &str,
    ) -> Result<bool, ConfigStoreError> {
        let mut conn = self.connection().await?;
        let written: i32 = redis::Script::new(SET_IF_SCRIPT)
            .key(self.key(guard_key))
            .key(self.key(key))
            .arg(expected)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(written == 1)
    }
}

/// Typed view over a [`SyncConfigStore`], shared by both engines.
#[derive(Clone)]
pub struct SyncConfig {
    store: Arc<dyn SyncConfigStore>,
}

impl SyncConfig {
    pub fn new(store: Arc<dyn SyncConfigStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryConfigStore::new()))
    }

    pub fn from_env() -> Self {
        let prefix = std::env::var("CONFIG_KEY_PREFIX").unwrap_or_else(|_| "supplier_sync".into());
        match std::env::var("REDIS_URL").ok().map(redis::Client::open) {
            Some(Ok(client)) => {
                info!(target = "supplier_sync.config", %prefix, "using redis config store");
                Self::new(Arc::new(RedisConfigStore::new(client, prefix)))
            }
            Some(Err(err)) => {
                warn!(target = "supplier_sync.config", error = %err, "invalid REDIS_URL; config kept in memory");
                Self::in_memory()
            }
            None => Self::in_memory(),
        }
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigStoreError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| ConfigStoreError::Decode {
                key: key.to_string(),
                message: err.to_string(),
            })
    }

    async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigStoreError> {
        let raw = serde_json::to_string(value).map_err(|err| ConfigStoreError::Decode {
            key: key.to_string(),
            message: err.to_string(),
        })?;
        self.store.set(key, &raw).await
    }

    pub async fn load_mapping(&self) -> Result<FieldMapping, ConfigStoreError> {
        Ok(self.load_json(MAPPING_KEY).await?.unwrap_or_default())
    }

    pub async fn save_mapping(&self, mapping: &FieldMapping) -> Result<(), ConfigStoreError> {
        self.save_json(MAPPING_KEY, mapping).await
    }

    pub async fn reset_mapping(&self) -> Result<(), ConfigStoreError> {
        self.store.delete(MAPPING_KEY).await
    }

    pub async fn load_feed(&self) -> Result<Option<FeedRequestConfig>, ConfigStoreError> {
        self.load_json(FEED_KEY).await
    }

    pub async fn save_feed(&self, feed: &FeedRequestConfig) -> Result<(), ConfigStoreError> {
        self.save_json(FEED_KEY, feed).await
    }

    /// Highest catalog id confirmed by the photo sync; 0 when never run.
    pub async fn load_cursor(&self) -> Result<i64, ConfigStoreError> {
        let Some(raw) = self.store.get(CURSOR_KEY).await? else {
            return Ok(0);
        };
        raw.trim()
            .parse::<i64>()
            .map_err(|err| ConfigStoreError::Decode {
                key: CURSOR_KEY.to_string(),
                message: err.to_string(),
            })
    }

    /// Operator override of the cursor, outside of any run.
    pub async fn set_cursor(&self, value: i64) -> Result<(), ConfigStoreError> {
        self.store.set(CURSOR_KEY, &value.to_string()).await
    }

    pub async fn reset_cursor(&self) -> Result<(), ConfigStoreError> {
        self.store.delete(CURSOR_KEY).await
    }

    /// Makes `run_id` the only run allowed to advance the cursor. A run that
    /// lost ownership gets [`ConfigStoreError::CursorNotOwned`] on its next
    /// advance.
    pub async fn claim_cursor(&self, run_id: Uuid) -> Result<(), ConfigStoreError> {
        self.store
            .set(CURSOR_OWNER_KEY, &run_id.to_string())
            .await
    }

    pub async fn advance_cursor(&self, run_id: Uuid, value: i64) -> Result<(), ConfigStoreError> {
        let written = self
            .store
            .set_if(
                CURSOR_OWNER_KEY,
                &run_id.to_string(),
                CURSOR_KEY,
                &value.to_string(),
            )
            .await?;
        if written {
            Ok(())
        } else {
            Err(ConfigStoreError::CursorNotOwned)
        }
    }

    /// Catalog ids whose photo fetch failed permanently and that precede the
    /// cursor; retried first on the next run.
    pub async fn load_failed_photos(&self) -> Result<Vec<i64>, ConfigStoreError> {
        Ok(self.load_json(FAILED_PHOTOS_KEY).await?.unwrap_or_default())
    }

    pub async fn save_failed_photos(&self, ids: &[i64]) -> Result<(), ConfigStoreError> {
        if ids.is_empty() {
            return self.store.delete(FAILED_PHOTOS_KEY).await;
        }
        self.save_json(FAILED_PHOTOS_KEY, &ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TargetField;

    #[tokio::test]
    async fn mapping_persists_until_reset() {
        let config = SyncConfig::in_memory();
        assert!(config.load_mapping().await.unwrap().is_empty());
        let mut mapping = FieldMapping::default();
        mapping.set_manual(TargetField::Price, "Price.Value");
        config.save_mapping(&mapping).await.unwrap();
        assert_eq!(config.load_mapping().await.unwrap(), mapping);
        config.reset_mapping().await.unwrap();
        assert!(config.load_mapping().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cursor_only_advances_for_owner() {
        let config = SyncConfig::in_memory();
        assert_eq!(config.load_cursor().await.unwrap(), 0);

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        config.claim_cursor(first).await.unwrap();
        config.advance_cursor(first, 10).await.unwrap();
        config.claim_cursor(second).await.unwrap();
        assert!(matches!(
            config.advance_cursor(first, 11).await,
            Err(ConfigStoreError::CursorNotOwned)
        ));
        config.advance_cursor(second, 12).await.unwrap();
        assert_eq!(config.load_cursor().await.unwrap(), 12);

        config.reset_cursor().await.unwrap();
        assert_eq!(config.load_cursor().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_photo_ids_round_trip() {
        let config = SyncConfig::in_memory();
        config.save_failed_photos(&[4, 9]).await.unwrap();
        assert_eq!(config.load_failed_photos().await.unwrap(), vec![4, 9]);
        config.save_failed_photos(&[]).await.unwrap();
        assert!(config.load_failed_photos().await.unwrap().is_empty());
    }
}
