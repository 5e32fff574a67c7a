use std::pin::Pin;
use std::time::Duration;

use futures::future::join_all;
use futures::{Stream, StreamExt};
use serde_json::{json, Map, Value};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::executor::NodeExecutor;
use super::template::render_template;
use super::types::NodeFailure;
use crate::capability::{LlmMessage, LlmRequest};
use crate::error::{FlowError, Result};
use crate::flow::{LlmNode, LoopNode, ParallelNode, ReferenceNode, ToolNode};
use crate::state::{ExecutionContext, IterationPath};

/// 并行节点汇合结果
pub(crate) struct ParallelJoin {
    pub joined: Value,
    pub failed: Vec<String>,
}

/// 处理工具节点
pub(crate) async fn handle_tool_node(
    executor: &NodeExecutor,
    tool_node: &ToolNode,
    node_id: &str,
    ctx: &ExecutionContext,
    scope: &IterationPath,
) -> Result<Value> {
    let tool = executor
        .tools()
        .get(&tool_node.tool)
        .ok_or_else(|| FlowError::ToolNotRegistered(tool_node.tool.clone()))?;
    let args = build_tool_args(tool_node, ctx, scope)?;

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let task = drain_last(tool.run(args.clone(), ctx));
        let result = if let Some(millis) = tool_node.timeout_ms {
            match timeout(Duration::from_millis(millis), task).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(node = %node_id, tool = %tool_node.tool, attempt = attempts, "tool invocation timed out");
                    if attempts > tool_node.retries {
                        return Err(FlowError::Timeout {
                            node: node_id.to_string(),
                            millis,
                        });
                    }
                    continue;
                }
            }
        } else {
            task.await
        };

        match result {
            Ok(output) => return Ok(Value::Object(output.unwrap_or_default())),
            Err(err) if attempts <= tool_node.retries => {
                warn!(
                    node = %node_id,
                    tool = %tool_node.tool,
                    attempt = attempts,
                    retries = tool_node.retries,
                    error = %err,
                    "tool invocation failed, retrying"
                );
                continue;
            }
            Err(err) => return Err(capability_error(node_id, err)),
        }
    }
}

/// 参数合并顺序：整体引用、静态参数、逐项引用
fn build_tool_args(
    tool_node: &ToolNode,
    ctx: &ExecutionContext,
    scope: &IterationPath,
) -> Result<Map<String, Value>> {
    let mut args = match &tool_node.args_ref {
        Some(reference) => match ctx.resolve(reference, scope)? {
            Value::Object(map) => map,
            other => {
                return Err(FlowError::Serialization(format!(
                    "arguments at `{}` resolved to {} instead of an object",
                    reference,
                    value_kind(&other)
                )))
            }
        },
        None => Map::new(),
    };

    for (name, value) in &tool_node.args {
        args.insert(name.clone(), value.clone());
    }
    for (name, reference) in &tool_node.arg_refs {
        args.insert(name.clone(), ctx.resolve(reference, scope)?);
    }
    Ok(args)
}

/// 处理语言模型节点，保存完整的结构化响应
pub(crate) async fn handle_llm_node(
    executor: &NodeExecutor,
    llm: &LlmNode,
    node_id: &str,
    ctx: &ExecutionContext,
    scope: &IterationPath,
) -> Result<Value> {
    let model = executor
        .models()
        .get(&llm.model)
        .ok_or_else(|| FlowError::ModelNotRegistered(llm.model.clone()))?;

    let messages = llm
        .messages
        .iter()
        .map(|message| -> Result<LlmMessage> {
            Ok(LlmMessage::new(
                message.role.clone(),
                render_template(&message.content, ctx, scope)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let request = LlmRequest {
        model: llm.model.clone(),
        model_name: llm.model_name.clone(),
        messages,
        temperature: llm.temperature,
        max_tokens: llm.max_tokens,
        top_p: llm.top_p,
        stop: llm.stop.clone(),
        stream: llm.stream,
        user: llm.user.clone(),
        extra_params: llm.extra_params.clone(),
    };

    let task = drain_last(model.invoke(request, ctx));
    let result = match llm.timeout_ms {
        Some(millis) => timeout(Duration::from_millis(millis), task)
            .await
            .map_err(|_| FlowError::Timeout {
                node: node_id.to_string(),
                millis,
            })?,
        None => task.await,
    };

    let response = result
        .map_err(|err| capability_error(node_id, err))?
        .ok_or_else(|| FlowError::capability(node_id, "model produced no response"))?;

    if let Some(error) = &response.error {
        return Err(FlowError::capability(
            node_id,
            format!("{}: {}", error.code, error.message),
        ));
    }
    Ok(serde_json::to_value(response)?)
}

pub(crate) fn handle_reference_node(
    reference: &ReferenceNode,
    ctx: &ExecutionContext,
    scope: &IterationPath,
) -> Result<Value> {
    ctx.resolve(&reference.source, scope)
}

/// 并发执行各分支，全部结束后按分支键汇合
pub(crate) async fn handle_parallel_node(
    executor: &NodeExecutor,
    parallel: &ParallelNode,
    node_id: &str,
    ctx: &ExecutionContext,
    scope: &IterationPath,
    joins: &[&str],
) -> ParallelJoin {
    let limit = parallel
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| executor.config().branch_timeout());
    let millis = limit.as_millis() as u64;

    let branches = parallel.branches.iter().map(|branch| async move {
        let outcome = match timeout(
            limit,
            executor.run_path(ctx, &branch.entry, scope, joins),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(NodeFailure::new(
                branch.entry.clone(),
                FlowError::Timeout {
                    node: branch.entry.clone(),
                    millis,
                },
            )),
        };
        (branch.key.as_str(), outcome)
    });

    let mut joined = Map::new();
    let mut failed = Vec::new();
    for (key, outcome) in join_all(branches).await {
        match outcome {
            Ok(value) => {
                joined.insert(key.to_string(), value);
            }
            Err(failure) => {
                warn!(node = %node_id, branch = %key, error = %failure, "parallel branch failed");
                joined.insert(
                    key.to_string(),
                    json!({ "error": failure.error.to_string(), "node": failure.node }),
                );
                failed.push(key.to_string());
            }
        }
    }

    ParallelJoin {
        joined: Value::Object(joined),
        failed,
    }
}

/// 按迭代序号逐轮执行循环体，每轮结果以迭代路径区分
pub(crate) async fn handle_loop_node(
    executor: &NodeExecutor,
    loop_node: &LoopNode,
    node_id: &str,
    ctx: &ExecutionContext,
    scope: &IterationPath,
    joins: &[&str],
) -> std::result::Result<Value, NodeFailure> {
    let limit = executor.config().max_loop_iterations;
    if loop_node.max_iterations > limit {
        return Err(NodeFailure::new(
            node_id,
            FlowError::LoopBoundExceeded {
                node: node_id.to_string(),
                max: limit,
            },
        ));
    }

    let mut outputs = Vec::new();
    for iteration in 0..loop_node.max_iterations {
        if let Some(condition) = &loop_node.condition {
            if !condition.evaluate(ctx, scope) {
                debug!(node = %node_id, iteration, "loop condition no longer holds");
                break;
            }
        }
        let iteration_scope = scope.child(iteration);
        let output = executor
            .run_path(ctx, &loop_node.body, &iteration_scope, joins)
            .await?;
        outputs.push(output);
    }

    debug!(node = %node_id, iterations = outputs.len(), "loop finished");
    // 一轮都未执行时两种模式都记录空数组
    if loop_node.collect || outputs.is_empty() {
        Ok(Value::Array(outputs))
    } else {
        Ok(outputs.pop().unwrap_or(Value::Null))
    }
}

/// 消费能力返回的流，保留最后一个元素
async fn drain_last<T>(
    mut stream: Pin<Box<dyn Stream<Item = Result<T>> + Send>>,
) -> Result<Option<T>> {
    let mut last = None;
    while let Some(item) = stream.next().await {
        last = Some(item?);
    }
    Ok(last)
}

fn capability_error(node_id: &str, err: FlowError) -> FlowError {
    match err {
        err @ (FlowError::Capability { .. } | FlowError::Timeout { .. }) => err,
        other => FlowError::capability(node_id, other),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
