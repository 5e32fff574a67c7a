use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::executor::NodeExecutor;
use super::types::{FlowResult, InvokeMode, ResultStream, RunHandle, RunOutcome, RunRequest};
use crate::error::Result;
use crate::flow::FlowCanvas;
use crate::pipe::{ExecutionPipe, Pipeline, TracingPipe};
use crate::state::{ContextSnapshot, ExecutionContext};
use crate::utils::id::IdGenerator;

/// 运行入口：为每次运行创建上下文，并交给 pipe 链执行
#[derive(Clone)]
pub struct FlowRunner {
    pipeline: Arc<Pipeline>,
    ids: Arc<IdGenerator>,
}

impl FlowRunner {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            ids: Arc::new(IdGenerator::default()),
        }
    }

    /// 默认链：执行画布后输出追踪日志
    pub fn standard(executor: NodeExecutor) -> Result<Self> {
        let worker_id = executor.config().worker_id;
        let pipeline = Pipeline::new()
            .with_pipe(Arc::new(ExecutionPipe::new(executor)))
            .with_pipe(Arc::new(TracingPipe));
        Ok(Self::new(Arc::new(pipeline)).with_id_generator(Arc::new(IdGenerator::new(worker_id)?)))
    }

    pub fn with_id_generator(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// 为请求生成运行 id 与上下文
    pub fn prepare(&self, canvas: Arc<FlowCanvas>, request: RunRequest) -> Result<ExecutionContext> {
        let run_id = self.ids.next_run_id()?;
        Ok(ExecutionContext::new(run_id, canvas, request))
    }

    /// 按请求的调用模式运行
    pub fn run(&self, canvas: Arc<FlowCanvas>, request: RunRequest) -> RunOutcome {
        match request.invoke_mode {
            InvokeMode::Sync => RunOutcome::Sync(self.run_stream(canvas, request)),
            InvokeMode::Async => RunOutcome::Async(self.spawn(canvas, request)),
        }
    }

    /// 同步模式：返回惰性结果流，由调用方驱动
    pub fn run_stream(&self, canvas: Arc<FlowCanvas>, request: RunRequest) -> ResultStream {
        match self.prepare(canvas, request) {
            Ok(ctx) => self.run_context(ctx),
            Err(err) => stream::once(async move { FlowResult::fail(err) }).boxed(),
        }
    }

    pub fn run_context(&self, ctx: ExecutionContext) -> ResultStream {
        info!(run_id = %ctx.run_id(), callback = ctx.is_callback(), "flow run started");
        self.pipeline.do_pipes(ctx)
    }

    /// 异步模式：后台执行，结果通过句柄送达
    pub fn spawn(&self, canvas: Arc<FlowCanvas>, request: RunRequest) -> RunHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (run_id, mut results) = match self.prepare(canvas, request) {
            Ok(ctx) => (ctx.run_id().to_string(), self.run_context(ctx)),
            Err(err) => (String::new(), stream::once(async move { FlowResult::fail(err) }).boxed()),
        };

        let task = tokio::spawn(async move {
            while let Some(result) = results.next().await {
                if tx.send(result).is_err() {
                    debug!("run handle dropped, stopping delivery");
                    break;
                }
            }
        });
        RunHandle::new(run_id, rx, task)
    }

    /// 回调续跑：从快照恢复上下文，跳过已有结果的节点
    pub fn resume(&self, canvas: Arc<FlowCanvas>, snapshot: ContextSnapshot) -> ResultStream {
        self.run_context(ExecutionContext::resume(canvas, snapshot))
    }
}
