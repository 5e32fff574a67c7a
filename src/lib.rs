pub mod capability;
pub mod config;
pub mod error;
pub mod flow;
pub mod pipe;
pub mod runtime;
pub mod state;
pub mod storage;
pub mod utils;

pub use capability::{
    tool_from_fn, Choice, EchoModel, FunctionCall, LanguageModel, LlmMessage, LlmRequest,
    LlmResponse, ModelRegistry, Tool, ToolRegistry,
};
pub use config::EngineConfig;
pub use error::{FlowError, GraphError, Result};
pub use flow::{
    BranchFailurePolicy, Edge, FlowCanvas, FlowCanvasBuilder, FlowDefinition, FlowNode, LlmNode,
    LoopNode, MessageTemplate, NodeKind, ParallelBranch, ParallelNode, ToolNode, ValuePath,
    ValueRef,
};
pub use pipe::{pipe_from_fn, ExecutionPipe, Pipe, Pipeline, TracingPipe, ValidationPipe};
pub use runtime::{
    FlowResult, FlowRunner, InvokeMode, NodeExecutor, ResultStream, RunHandle, RunOutcome,
    RunRequest,
};
pub use state::{ContextSnapshot, ExecutionContext, IterationPath};
pub use storage::FlowDataStorage;
#[cfg(feature = "memory-store")]
pub use storage::MemoryFlowStorage;
#[cfg(feature = "redis-store")]
pub use storage::RedisFlowStorage;
pub use utils::{IdGenerator, LoggingConfig};
