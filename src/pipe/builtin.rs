use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{info, warn};

use super::chain::{Pipe, PipeStream};
use crate::error::FlowError;
use crate::runtime::{FlowResult, NodeExecutor};
use crate::state::ExecutionContext;

pub const VALIDATE_PIPE: &str = "validate";
pub const EXECUTE_PIPE: &str = "execute";
pub const TRACE_PIPE: &str = "trace";

/// 校验请求负载中的必填字段
#[derive(Debug, Clone, Default)]
pub struct ValidationPipe {
    required: Vec<String>,
}

impl ValidationPipe {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl Pipe for ValidationPipe {
    fn code(&self) -> &str {
        VALIDATE_PIPE
    }

    fn run(&self, ctx: &ExecutionContext) -> PipeStream {
        let payload = &ctx.request().payload;
        if let Some(missing) = self.required.iter().find(|key| !payload.contains_key(*key)) {
            let err = FlowError::Pipe {
                pipe: VALIDATE_PIPE.to_string(),
                message: format!("request payload is missing `{}`", missing),
            };
            return stream::once(async move { Err(err) }).boxed();
        }
        ctx.set_attribute("validated", Value::Bool(true));
        stream::empty().boxed()
    }
}

/// 执行画布，节点失败转为该路径的失败结果
#[derive(Clone)]
pub struct ExecutionPipe {
    executor: NodeExecutor,
}

impl ExecutionPipe {
    pub fn new(executor: NodeExecutor) -> Self {
        Self { executor }
    }
}

impl Pipe for ExecutionPipe {
    fn code(&self) -> &str {
        EXECUTE_PIPE
    }

    fn run(&self, ctx: &ExecutionContext) -> PipeStream {
        let executor = self.executor.clone();
        let ctx = ctx.clone();
        stream::once(async move {
            let result = match executor.execute(&ctx).await {
                Ok(payload) => FlowResult::success(payload),
                Err(failure) => {
                    warn!(run_id = %ctx.run_id(), node = %failure.node, error = %failure.error, "flow path failed");
                    failure.into_result()
                }
            };
            ctx.set_attribute("executed", Value::Bool(result.is_success()));
            Ok(result)
        })
        .boxed()
    }
}

/// 运行结束后输出一条摘要日志
#[derive(Debug, Clone, Default)]
pub struct TracingPipe;

impl Pipe for TracingPipe {
    fn code(&self) -> &str {
        TRACE_PIPE
    }

    fn run(&self, ctx: &ExecutionContext) -> PipeStream {
        info!(
            run_id = %ctx.run_id(),
            results = ctx.len(),
            callback = ctx.is_callback(),
            executed = ?ctx.attribute("executed"),
            "flow run traced"
        );
        stream::empty().boxed()
    }
}
