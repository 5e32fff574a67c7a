use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{storage_key, FlowDataStorage, DEFAULT_STORAGE_PREFIX};
use crate::config::EngineConfig;
use crate::error::Result;

/// 内存存储实现
pub struct MemoryFlowStorage {
    prefix: String,
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryFlowStorage {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_STORAGE_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// 使用引擎配置中的键前缀
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_prefix(config.storage_prefix.clone())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl Default for MemoryFlowStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlowDataStorage for MemoryFlowStorage {
    async fn save(&self, definition_id: &str, version: &str, graph: String) -> Result<String> {
        let key = storage_key(&self.prefix, definition_id, version);
        self.inner.write().insert(key, graph.clone());
        Ok(graph)
    }

    async fn get(&self, definition_id: &str, version: &str) -> Result<Option<String>> {
        let key = storage_key(&self.prefix, definition_id, version);
        Ok(self.inner.read().get(&key).cloned())
    }
}
