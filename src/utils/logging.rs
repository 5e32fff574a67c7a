use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::env::EnvConfig;

const QUIET_FILTER: &str = "flowcanvas=info,warn";
const VERBOSE_FILTER: &str = "flowcanvas=debug,info";

/// 日志订阅者配置
///
/// 过滤规则优先取 `RUST_LOG`，否则按 verbose 选择默认规则。
/// `FLOWCANVAS_DEBUG` 存在时打开 verbose，输出 target、文件与行号。
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    filter: Option<String>,
    verbose: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            filter: None,
            verbose: Self::is_debug(),
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// 最终生效的过滤规则
    pub fn env_filter(&self) -> EnvFilter {
        if let Some(filter) = &self.filter {
            return EnvFilter::new(filter);
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if self.verbose {
                VERBOSE_FILTER
            } else {
                QUIET_FILTER
            })
        })
    }

    /// 安装全局订阅者；已有订阅者时返回 false
    pub fn install(&self) -> bool {
        let layer = fmt::layer()
            .with_target(self.verbose)
            .with_file(self.verbose)
            .with_line_number(self.verbose);

        let installed = tracing_subscriber::registry()
            .with(self.env_filter())
            .with(layer)
            .try_init()
            .is_ok();

        if installed && self.verbose {
            tracing::debug!("verbose logging enabled");
        }
        installed
    }

    /// 按环境变量初始化日志
    pub fn init() -> bool {
        Self::from_env().install()
    }

    pub fn is_debug() -> bool {
        EnvConfig::is_debug_mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins() {
        let config = LoggingConfig::default()
            .verbose(true)
            .with_filter("flowcanvas=trace");
        assert_eq!(config.filter.as_deref(), Some("flowcanvas=trace"));
        assert!(config.env_filter().to_string().contains("trace"));
    }

    #[test]
    fn second_install_is_rejected() {
        let config = LoggingConfig::default().with_filter("flowcanvas=warn");
        config.install();
        assert!(!config.install());
    }
}
