// 外部能力接口：工具与语言模型

pub mod llm;
pub mod poll;
pub mod tool;

pub use llm::{
    Choice, EchoModel, FunctionCall, LanguageModel, LlmError, LlmMessage, LlmRequest,
    LlmResponse, LlmStream, ModelRegistry, Usage,
};
pub use poll::{poll_until_ready, PollPolicy, PollStatus};
pub use tool::{tool_from_fn, FnTool, Tool, ToolRegistry, ToolStream};
