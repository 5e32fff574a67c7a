// Pipe 链：包裹每次调用的有序拦截步骤

mod builtin;
mod chain;

pub use builtin::{
    ExecutionPipe, TracingPipe, ValidationPipe, EXECUTE_PIPE, TRACE_PIPE, VALIDATE_PIPE,
};
pub use chain::{pipe_from_fn, FnPipe, Pipe, PipeStream, Pipeline};
