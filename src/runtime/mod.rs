// 运行时执行引擎模块

mod executor;
mod handlers;
mod runner;
mod template;
mod types;

pub use executor::NodeExecutor;
pub use runner::FlowRunner;
pub use template::render_template;
pub use types::{
    FlowResult, InvokeMode, NodeFailure, ResultStream, RunHandle, RunOutcome, RunRequest,
};
