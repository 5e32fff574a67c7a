use async_trait::async_trait;
use redis::AsyncCommands;

use super::{storage_key, FlowDataStorage, DEFAULT_STORAGE_PREFIX};
use crate::config::EngineConfig;
use crate::error::{FlowError, Result};

/// Redis 存储实现
pub struct RedisFlowStorage {
    client: redis::Client,
    prefix: String,
}

impl RedisFlowStorage {
    pub fn new(client: redis::Client) -> Self {
        Self::with_prefix(client, DEFAULT_STORAGE_PREFIX)
    }

    pub fn with_prefix(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub fn from_config(client: redis::Client, config: &EngineConfig) -> Self {
        Self::with_prefix(client, config.storage_prefix.clone())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| FlowError::Storage(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl FlowDataStorage for RedisFlowStorage {
    async fn save(&self, definition_id: &str, version: &str, graph: String) -> Result<String> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| FlowError::Storage(e.to_string()))?;
        let key = storage_key(&self.prefix, definition_id, version);
        let _: () = conn
            .set(key, graph.as_str())
            .await
            .map_err(|e| FlowError::Storage(e.to_string()))?;
        Ok(graph)
    }

    async fn get(&self, definition_id: &str, version: &str) -> Result<Option<String>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| FlowError::Storage(e.to_string()))?;
        let key = storage_key(&self.prefix, definition_id, version);
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| FlowError::Storage(e.to_string()))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_prefix_from_engine_config() {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let config = EngineConfig::default().with_storage_prefix("tenant");
        let storage = RedisFlowStorage::from_config(client, &config);
        assert_eq!(storage.prefix(), "tenant");
    }
}
