use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{stream, Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::Result;
use crate::state::ExecutionContext;

pub type ToolStream = Pin<Box<dyn Stream<Item = Result<Map<String, Value>>> + Send>>;

/// 工具能力：接收参数对象，返回惰性结果流
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn run(&self, args: Map<String, Value>, ctx: &ExecutionContext) -> ToolStream;
}

/// 由异步闭包构造的工具
pub struct FnTool<F> {
    name: String,
    description: Option<String>,
    func: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Map<String, Value>, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Map<String, Value>>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            description: None,
            func,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Map<String, Value>, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Map<String, Value>>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn run(&self, args: Map<String, Value>, ctx: &ExecutionContext) -> ToolStream {
        stream::once((self.func)(args, ctx.clone())).boxed()
    }
}

pub fn tool_from_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn Tool>
where
    F: Fn(Map<String, Value>, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Map<String, Value>>> + Send + 'static,
{
    Arc::new(FnTool::new(name, func))
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具，同名工具保留先注册的一个
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "tool already registered, keeping the first registration");
            return;
        }
        debug!(tool = %name, "tool registered");
        self.tools.insert(name, tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
