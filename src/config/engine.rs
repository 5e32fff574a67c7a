use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::env::EnvConfig;
use crate::error::{FlowError, Result};
use crate::storage::DEFAULT_STORAGE_PREFIX;
use crate::utils::id::MAX_WORKER_ID;

pub const BRANCH_TIMEOUT_ENV: &str = "FLOWCANVAS_BRANCH_TIMEOUT_MS";
pub const MAX_LOOP_ITERATIONS_ENV: &str = "FLOWCANVAS_MAX_LOOP_ITERATIONS";
pub const WORKER_ID_ENV: &str = "FLOWCANVAS_WORKER_ID";
pub const STORAGE_PREFIX_ENV: &str = "FLOWCANVAS_STORAGE_PREFIX";

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 并行分支默认等待上限
    pub branch_timeout_ms: u64,
    /// 循环节点允许声明的最大迭代次数
    pub max_loop_iterations: u32,
    pub worker_id: u16,
    pub storage_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            branch_timeout_ms: 30_000,
            max_loop_iterations: 1_000,
            worker_id: 0,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FlowError::Config(format!("Failed to parse engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// 以默认值为基础，叠加 `FLOWCANVAS_*` 环境变量
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(timeout) = EnvConfig::get_env_parsed(BRANCH_TIMEOUT_ENV)? {
            config.branch_timeout_ms = timeout;
        }
        if let Some(max) = EnvConfig::get_env_parsed(MAX_LOOP_ITERATIONS_ENV)? {
            config.max_loop_iterations = max;
        }
        if let Some(worker) = EnvConfig::get_env_parsed(WORKER_ID_ENV)? {
            config.worker_id = worker;
        }
        if let Some(prefix) = EnvConfig::get_env_optional(STORAGE_PREFIX_ENV) {
            config.storage_prefix = prefix;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.branch_timeout_ms == 0 {
            return Err(FlowError::Config("branch_timeout_ms must be positive".into()));
        }
        if self.max_loop_iterations == 0 {
            return Err(FlowError::Config("max_loop_iterations must be positive".into()));
        }
        if self.worker_id > MAX_WORKER_ID {
            return Err(FlowError::Config(format!(
                "worker_id {} exceeds {}",
                self.worker_id, MAX_WORKER_ID
            )));
        }
        if self.storage_prefix.trim().is_empty() {
            return Err(FlowError::Config("storage_prefix must not be empty".into()));
        }
        Ok(())
    }

    pub fn branch_timeout(&self) -> Duration {
        Duration::from_millis(self.branch_timeout_ms)
    }

    pub fn with_branch_timeout_ms(mut self, millis: u64) -> Self {
        self.branch_timeout_ms = millis;
        self
    }

    pub fn with_max_loop_iterations(mut self, max: u32) -> Self {
        self.max_loop_iterations = max;
        self
    }

    pub fn with_worker_id(mut self, worker_id: u16) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }
}
