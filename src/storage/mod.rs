// 流程定义存储

use async_trait::async_trait;

use crate::error::Result;

#[cfg(feature = "memory-store")]
mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

#[cfg(feature = "memory-store")]
pub use self::memory::MemoryFlowStorage;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisFlowStorage;

pub const DEFAULT_STORAGE_PREFIX: &str = "flowcanvas";

/// 流程定义存储 trait
#[async_trait]
pub trait FlowDataStorage: Send + Sync {
    /// 保存序列化后的画布，返回保存的内容
    async fn save(&self, definition_id: &str, version: &str, graph: String) -> Result<String>;
    async fn get(&self, definition_id: &str, version: &str) -> Result<Option<String>>;
}

/// 存储键：`{prefix}:bpmn:{definition_id}:{version}`
pub fn storage_key(prefix: &str, definition_id: &str, version: &str) -> String {
    format!("{prefix}:bpmn:{definition_id}:{version}")
}
