use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::handlers::{
    handle_llm_node, handle_loop_node, handle_parallel_node, handle_reference_node,
    handle_tool_node,
};
use super::types::NodeFailure;
use crate::capability::{ModelRegistry, ToolRegistry};
use crate::config::EngineConfig;
use crate::error::FlowError;
use crate::flow::{BranchFailurePolicy, FlowNode, NodeKind, START_NODE_ID};
use crate::state::{ExecutionContext, IterationPath};

/// 节点执行器：从开始节点深度优先遍历画布
#[derive(Clone)]
pub struct NodeExecutor {
    tools: Arc<ToolRegistry>,
    models: Arc<ModelRegistry>,
    config: Arc<EngineConfig>,
}

impl NodeExecutor {
    pub fn new(tools: ToolRegistry, models: ModelRegistry) -> Self {
        Self {
            tools: Arc::new(tools),
            models: Arc::new(models),
            config: Arc::new(EngineConfig::default()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 执行整张画布，返回主路径最后一个节点的输出
    #[instrument(skip_all, fields(run_id = %ctx.run_id()))]
    pub async fn execute(&self, ctx: &ExecutionContext) -> Result<Value, NodeFailure> {
        self.run_path(ctx, START_NODE_ID, &IterationPath::root(), &[])
            .await
    }

    /// 从 `entry` 出发沿后继边执行，直到结束节点、没有后继或走到 `joins` 中的节点
    pub(crate) fn run_path<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        entry: &'a str,
        scope: &'a IterationPath,
        joins: &'a [&'a str],
    ) -> BoxFuture<'a, Result<Value, NodeFailure>> {
        async move {
            let canvas = ctx.canvas();
            let mut current = entry;
            let mut last = Value::Null;

            loop {
                let node = canvas
                    .node(current)
                    .map_err(|err| NodeFailure::new(current, err))?;
                if matches!(node.kind, NodeKind::End) {
                    return Ok(last);
                }

                last = match ctx.result_at(&node.id, scope) {
                    Some(existing) if ctx.is_callback() => {
                        debug!(node = %node.id, iteration = %scope, "result restored, skipping");
                        existing
                    }
                    _ => self.execute_node(ctx, node, scope, last).await?,
                };

                match self.select_next(ctx, node, scope) {
                    Some(next) if !joins.contains(&next) => current = next,
                    _ => return Ok(last),
                }
            }
        }
        .boxed()
    }

    async fn execute_node(
        &self,
        ctx: &ExecutionContext,
        node: &FlowNode,
        scope: &IterationPath,
        previous: Value,
    ) -> Result<Value, NodeFailure> {
        debug!(node = %node.id, kind = node.kind.type_name(), iteration = %scope, "executing node");
        let fail = |err: FlowError| NodeFailure::new(node.id.clone(), err);

        let output = match &node.kind {
            NodeKind::Start => ctx.request().payload_value(),
            NodeKind::NoOp | NodeKind::End => return Ok(previous),
            NodeKind::Tool(tool) => handle_tool_node(self, tool, &node.id, ctx, scope)
                .await
                .map_err(fail)?,
            NodeKind::LanguageModel(llm) => handle_llm_node(self, llm, &node.id, ctx, scope)
                .await
                .map_err(fail)?,
            NodeKind::Reference(reference) => {
                handle_reference_node(reference, ctx, scope).map_err(fail)?
            }
            NodeKind::Parallel(parallel) => {
                let joins = node.join_targets();
                let join =
                    handle_parallel_node(self, parallel, &node.id, ctx, scope, &joins).await;
                ctx.record(&node.id, scope, join.joined.clone())
                    .map_err(fail)?;
                if !join.failed.is_empty() && parallel.failure == BranchFailurePolicy::FailPath {
                    return Err(fail(FlowError::BranchFailed {
                        node: node.id.clone(),
                        branches: join.failed,
                    }));
                }
                return Ok(join.joined);
            }
            NodeKind::Loop(loop_node) => {
                let joins = node.join_targets();
                handle_loop_node(self, loop_node, &node.id, ctx, scope, &joins).await?
            }
        };

        ctx.record(&node.id, scope, output.clone()).map_err(fail)?;
        Ok(output)
    }

    /// 第一条命中的条件边优先，否则走默认边
    fn select_next<'n>(
        &self,
        ctx: &ExecutionContext,
        node: &'n FlowNode,
        scope: &IterationPath,
    ) -> Option<&'n str> {
        if node.next.is_empty() {
            return None;
        }
        if let Some(edge) = node.next.iter().find(|edge| {
            edge.branch
                .as_ref()
                .map(|branch| branch.matches(ctx, scope))
                .unwrap_or(false)
        }) {
            return Some(edge.target.as_str());
        }
        let fallback = node.next.iter().find(|edge| !edge.is_conditional());
        if fallback.is_none() {
            warn!(node = %node.id, "no branch matched and no default edge");
        }
        fallback.map(|edge| edge.target.as_str())
    }
}
