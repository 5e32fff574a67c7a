use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::error::{FlowError, Result};
use crate::runtime::{FlowResult, ResultStream, RunRequest};
use crate::state::ExecutionContext;

pub type PipeStream = BoxStream<'static, Result<FlowResult>>;

/// 横切拦截步骤
pub trait Pipe: Send + Sync {
    fn code(&self) -> &str;

    /// 请求指定了 pipe 编码且不包含本 pipe 时跳过
    fn ignore(&self, request: &RunRequest) -> bool {
        !request.accepts_pipe(self.code())
    }

    /// 产出的 `Err` 视为 pipe 故障，会终止整条链
    fn run(&self, ctx: &ExecutionContext) -> PipeStream;
}

/// 有序、只追加的 pipe 链
#[derive(Default)]
pub struct Pipeline {
    pipes: RwLock<Vec<Arc<dyn Pipe>>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pipe: Arc<dyn Pipe>) {
        debug!(pipe = %pipe.code(), "pipe registered");
        self.pipes.write().push(pipe);
    }

    pub fn with_pipe(self, pipe: Arc<dyn Pipe>) -> Self {
        self.register(pipe);
        self
    }

    pub fn codes(&self) -> Vec<String> {
        self.pipes
            .read()
            .iter()
            .map(|pipe| pipe.code().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pipes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.read().is_empty()
    }

    /// 按注册顺序依次执行各 pipe，前一个的输出流结束后才启动下一个
    pub fn do_pipes(&self, ctx: ExecutionContext) -> ResultStream {
        let pipes: VecDeque<Arc<dyn Pipe>> = self.pipes.read().iter().cloned().collect();
        let state = ChainState {
            pipes,
            ctx,
            current: None,
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if state.done {
                    return None;
                }

                if let Some((code, mut stream)) = state.current.take() {
                    match AssertUnwindSafe(stream.next()).catch_unwind().await {
                        Ok(Some(Ok(result))) => {
                            state.current = Some((code, stream));
                            return Some((result, state));
                        }
                        Ok(Some(Err(err))) => {
                            error!(pipe = %code, run_id = %state.ctx.run_id(), error = %err, "pipe failed, aborting chain");
                            state.done = true;
                            return Some((FlowResult::fail(err), state));
                        }
                        Ok(None) => {
                            debug!(pipe = %code, "pipe finished");
                        }
                        Err(panic) => {
                            let fault = pipe_fault(&code, panic);
                            error!(pipe = %code, run_id = %state.ctx.run_id(), error = %fault, "pipe panicked, aborting chain");
                            state.done = true;
                            return Some((FlowResult::fail(fault), state));
                        }
                    }
                    continue;
                }

                let pipe = state.pipes.pop_front()?;
                if pipe.ignore(state.ctx.request()) {
                    debug!(pipe = %pipe.code(), "pipe ignored for request");
                    continue;
                }

                let code = pipe.code().to_string();
                match std::panic::catch_unwind(AssertUnwindSafe(|| pipe.run(&state.ctx))) {
                    Ok(stream) => state.current = Some((code, stream)),
                    Err(panic) => {
                        let fault = pipe_fault(&code, panic);
                        error!(pipe = %code, run_id = %state.ctx.run_id(), error = %fault, "pipe panicked, aborting chain");
                        state.done = true;
                        return Some((FlowResult::fail(fault), state));
                    }
                }
            }
        })
        .boxed()
    }
}

struct ChainState {
    pipes: VecDeque<Arc<dyn Pipe>>,
    ctx: ExecutionContext,
    current: Option<(String, PipeStream)>,
    done: bool,
}

fn pipe_fault(code: &str, panic: Box<dyn Any + Send>) -> FlowError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "pipe panicked".to_string());
    FlowError::Pipe {
        pipe: code.to_string(),
        message,
    }
}

/// 由同步闭包构造的 pipe
pub struct FnPipe<F> {
    code: String,
    func: F,
}

impl<F> FnPipe<F>
where
    F: Fn(&ExecutionContext) -> Result<Vec<FlowResult>> + Send + Sync + 'static,
{
    pub fn new(code: impl Into<String>, func: F) -> Self {
        Self {
            code: code.into(),
            func,
        }
    }
}

impl<F> Pipe for FnPipe<F>
where
    F: Fn(&ExecutionContext) -> Result<Vec<FlowResult>> + Send + Sync + 'static,
{
    fn code(&self) -> &str {
        &self.code
    }

    fn run(&self, ctx: &ExecutionContext) -> PipeStream {
        match (self.func)(ctx) {
            Ok(results) => stream::iter(results.into_iter().map(Ok)).boxed(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }
}

pub fn pipe_from_fn<F>(code: impl Into<String>, func: F) -> Arc<dyn Pipe>
where
    F: Fn(&ExecutionContext) -> Result<Vec<FlowResult>> + Send + Sync + 'static,
{
    Arc::new(FnPipe::new(code, func))
}
