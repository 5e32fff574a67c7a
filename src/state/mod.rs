// 状态管理模块

mod context;
mod iteration;

pub use context::{ContextSnapshot, ExecutionContext, SnapshotEntry};
pub use iteration::{IterationPath, ResultKey};
