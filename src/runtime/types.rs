use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::FlowError;

/// 运行时类型定义

/// 调用模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeMode {
    /// 调用方直接消费结果流
    #[default]
    Sync,
    /// 后台执行，调用方通过句柄接收结果
    Async,
}

/// 一次运行的请求
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// 需要执行的 pipe 编码，为空时执行全部
    #[serde(default)]
    pub pipe_codes: Vec<String>,
    #[serde(default)]
    pub invoke_mode: InvokeMode,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl RunRequest {
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// 由 JSON 对象构建，非对象值放在 `input` 字段下
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(payload) => Self::new(payload),
            Value::Null => Self::default(),
            other => {
                let mut payload = Map::new();
                payload.insert("input".to_string(), other);
                Self::new(payload)
            }
        }
    }

    pub fn with_pipes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipe_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mode(mut self, mode: InvokeMode) -> Self {
        self.invoke_mode = mode;
        self
    }

    pub fn asynchronous(self) -> Self {
        self.with_mode(InvokeMode::Async)
    }

    pub fn accepts_pipe(&self, code: &str) -> bool {
        self.pipe_codes.is_empty() || self.pipe_codes.iter().any(|c| c == code)
    }

    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

/// 运行结果：成功负载或带原因的失败
#[derive(Clone, Debug)]
pub enum FlowResult {
    Success {
        node: Option<String>,
        payload: Value,
    },
    Failure {
        node: Option<String>,
        cause: Arc<FlowError>,
    },
}

impl FlowResult {
    pub fn success(payload: Value) -> Self {
        FlowResult::Success {
            node: None,
            payload,
        }
    }

    pub fn node_success(node: impl Into<String>, payload: Value) -> Self {
        FlowResult::Success {
            node: Some(node.into()),
            payload,
        }
    }

    pub fn fail(cause: FlowError) -> Self {
        FlowResult::Failure {
            node: None,
            cause: Arc::new(cause),
        }
    }

    pub fn node_fail(node: impl Into<String>, cause: FlowError) -> Self {
        FlowResult::Failure {
            node: Some(node.into()),
            cause: Arc::new(cause),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FlowResult::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FlowResult::Failure { .. })
    }

    pub fn node(&self) -> Option<&str> {
        match self {
            FlowResult::Success { node, .. } | FlowResult::Failure { node, .. } => node.as_deref(),
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            FlowResult::Success { payload, .. } => Some(payload),
            FlowResult::Failure { .. } => None,
        }
    }

    pub fn cause(&self) -> Option<&FlowError> {
        match self {
            FlowResult::Success { .. } => None,
            FlowResult::Failure { cause, .. } => Some(cause.as_ref()),
        }
    }

    pub fn into_result(self) -> Result<Value, Arc<FlowError>> {
        match self {
            FlowResult::Success { payload, .. } => Ok(payload),
            FlowResult::Failure { cause, .. } => Err(cause),
        }
    }
}

impl fmt::Display for FlowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node().unwrap_or("-");
        match self {
            FlowResult::Success { payload, .. } => write!(f, "success[{node}]: {payload}"),
            FlowResult::Failure { cause, .. } => write!(f, "failure[{node}]: {cause}"),
        }
    }
}

/// 惰性结果流
pub type ResultStream = Pin<Box<dyn Stream<Item = FlowResult> + Send>>;

/// 节点路径上的失败，携带失败节点 id
#[derive(Debug, Error)]
#[error("node `{node}` failed: {error}")]
pub struct NodeFailure {
    pub node: String,
    #[source]
    pub error: FlowError,
}

impl NodeFailure {
    pub fn new(node: impl Into<String>, error: FlowError) -> Self {
        Self {
            node: node.into(),
            error,
        }
    }

    pub fn into_result(self) -> FlowResult {
        FlowResult::node_fail(self.node, self.error)
    }
}

/// 异步运行句柄
pub struct RunHandle {
    run_id: String,
    receiver: mpsc::UnboundedReceiver<FlowResult>,
    task: JoinHandle<()>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: String,
        receiver: mpsc::UnboundedReceiver<FlowResult>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            run_id,
            receiver,
            task,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// 等待下一条结果，运行结束后返回 None
    pub async fn next(&mut self) -> Option<FlowResult> {
        self.receiver.recv().await
    }

    pub async fn collect(mut self) -> Vec<FlowResult> {
        let mut results = Vec::new();
        while let Some(result) = self.receiver.recv().await {
            results.push(result);
        }
        results
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn into_stream(self) -> ResultStream {
        let Self { receiver, .. } = self;
        stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|result| (result, receiver))
        })
        .boxed()
    }
}

/// 按调用模式返回的结果
pub enum RunOutcome {
    Sync(ResultStream),
    Async(RunHandle),
}

impl RunOutcome {
    pub fn into_stream(self) -> ResultStream {
        match self {
            RunOutcome::Sync(stream) => stream,
            RunOutcome::Async(handle) => handle.into_stream(),
        }
    }
}
