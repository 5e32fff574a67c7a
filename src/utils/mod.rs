/// 工具模块 - 日志初始化与 id 生成
pub mod id;
pub mod logging;

pub use id::{Clock, IdGenerator, SystemClock};
pub use logging::LoggingConfig;
