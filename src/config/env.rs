use std::env;
use std::str::FromStr;

use crate::error::{FlowError, Result};

pub const DEBUG_ENV: &str = "FLOWCANVAS_DEBUG";

/// 环境变量配置管理
pub struct EnvConfig;

impl EnvConfig {
    /// 从环境变量获取值
    pub fn get_env(key: &str) -> Result<String> {
        env::var(key).map_err(|_| FlowError::Config(format!("environment variable `{}` is not set", key)))
    }

    /// 获取可选的环境变量
    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    /// 获取并解析可选的环境变量，格式错误时报错
    pub fn get_env_parsed<T>(key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match Self::get_env_optional(key) {
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                FlowError::Config(format!("environment variable `{}` is invalid: {}", key, e))
            }),
            None => Ok(None),
        }
    }

    /// 检查是否启用调试模式
    pub fn is_debug_mode() -> bool {
        env::var(DEBUG_ENV).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_parsed() {
        env::set_var("FLOWCANVAS_TEST_PARSED", "42");
        assert_eq!(EnvConfig::get_env_parsed::<u64>("FLOWCANVAS_TEST_PARSED").unwrap(), Some(42));

        env::set_var("FLOWCANVAS_TEST_PARSED", "many");
        assert!(EnvConfig::get_env_parsed::<u64>("FLOWCANVAS_TEST_PARSED").is_err());
        env::remove_var("FLOWCANVAS_TEST_PARSED");

        assert_eq!(EnvConfig::get_env_parsed::<u64>("FLOWCANVAS_TEST_PARSED").unwrap(), None);
    }

    #[test]
    fn test_get_env_missing() {
        assert!(EnvConfig::get_env("FLOWCANVAS_TEST_MISSING").is_err());
    }
}
