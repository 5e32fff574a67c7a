use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::flow::{FlowCanvas, ValueRef, START_NODE_ID};
use crate::runtime::{InvokeMode, RunRequest};

use super::iteration::{IterationPath, ResultKey};

/// 单次运行的执行上下文，克隆后共享同一份状态
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    run_id: String,
    canvas: Arc<FlowCanvas>,
    request: RunRequest,
    results: DashMap<ResultKey, Value>,
    attributes: DashMap<String, Value>,
    is_callback: bool,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, canvas: Arc<FlowCanvas>, request: RunRequest) -> Self {
        Self::build(run_id.into(), canvas, request, false)
    }

    /// 从快照恢复为回调续跑，已有结果的节点不会再次执行
    pub fn resume(canvas: Arc<FlowCanvas>, snapshot: ContextSnapshot) -> Self {
        let ctx = Self::build(snapshot.run_id, canvas, snapshot.request, true);
        for entry in snapshot.results {
            ctx.inner
                .results
                .insert(ResultKey::new(entry.node, entry.iteration), entry.value);
        }
        for (key, value) in snapshot.attributes {
            ctx.inner.attributes.insert(key, value);
        }
        ctx
    }

    fn build(run_id: String, canvas: Arc<FlowCanvas>, request: RunRequest, is_callback: bool) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id,
                canvas,
                request,
                results: DashMap::new(),
                attributes: DashMap::new(),
                is_callback,
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn canvas(&self) -> &Arc<FlowCanvas> {
        &self.inner.canvas
    }

    pub fn request(&self) -> &RunRequest {
        &self.inner.request
    }

    pub fn invoke_mode(&self) -> InvokeMode {
        self.inner.request.invoke_mode
    }

    pub fn is_callback(&self) -> bool {
        self.inner.is_callback
    }

    /// 写入节点结果，同一键只允许写一次
    pub fn record(&self, node: &str, iteration: &IterationPath, value: Value) -> Result<()> {
        match self
            .inner
            .results
            .entry(ResultKey::new(node, iteration.clone()))
        {
            Entry::Occupied(_) => Err(FlowError::DuplicateResult(node.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    pub fn has_result(&self, node: &str, iteration: &IterationPath) -> bool {
        self.inner
            .results
            .contains_key(&ResultKey::new(node, iteration.clone()))
    }

    pub fn result_at(&self, node: &str, iteration: &IterationPath) -> Option<Value> {
        self.inner
            .results
            .get(&ResultKey::new(node, iteration.clone()))
            .map(|entry| entry.value().clone())
    }

    /// 由内向外查找节点结果；外层都没有时取当前作用域内该节点最近一轮迭代的结果
    pub fn lookup(&self, node: &str, scope: &IterationPath) -> Option<Value> {
        scope
            .ancestors()
            .find_map(|path| self.result_at(node, &path))
            .or_else(|| {
                self.iteration_results(node)
                    .into_iter()
                    .rfind(|(path, _)| path.starts_with(scope))
                    .map(|(_, value)| value)
            })
    }

    pub fn get(&self, node: &str) -> Option<Value> {
        self.lookup(node, &IterationPath::root())
    }

    /// 按引用取值，缺失节点或字段返回查找错误
    pub fn resolve(&self, reference: &ValueRef, scope: &IterationPath) -> Result<Value> {
        let value = self
            .lookup(&reference.node, scope)
            .ok_or_else(|| reference.lookup_error())?;
        let found = reference
            .path
            .get(&value)
            .cloned()
            .ok_or_else(|| reference.lookup_error())?;

        if !reference.parse_json {
            return Ok(found);
        }
        match found {
            Value::String(text) => serde_json::from_str(text.trim()).map_err(|e| {
                FlowError::Serialization(format!("value at `{reference}` is not JSON: {e}"))
            }),
            other => Ok(other),
        }
    }

    /// 某节点所有迭代的结果，按迭代路径排序
    pub fn iteration_results(&self, node: &str) -> Vec<(IterationPath, Value)> {
        let mut entries: Vec<(IterationPath, Value)> = self
            .inner
            .results
            .iter()
            .filter(|entry| entry.key().node == node)
            .map(|entry| (entry.key().iteration.clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn result_count(&self, node: &str) -> usize {
        self.inner
            .results
            .iter()
            .filter(|entry| entry.key().node == node)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.results.is_empty()
    }

    /// 原始请求负载（开始节点写入的结果）
    pub fn payload(&self) -> Option<Value> {
        self.result_at(START_NODE_ID, &IterationPath::root())
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.inner.attributes.insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.inner
            .attributes
            .get(key)
            .map(|entry| entry.value().clone())
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.inner.attributes.contains_key(key)
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let mut results: Vec<SnapshotEntry> = self
            .inner
            .results
            .iter()
            .map(|entry| SnapshotEntry {
                node: entry.key().node.clone(),
                iteration: entry.key().iteration.clone(),
                value: entry.value().clone(),
            })
            .collect();
        results.sort_by(|a, b| (&a.node, &a.iteration).cmp(&(&b.node, &b.iteration)));

        let attributes = self
            .inner
            .attributes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        ContextSnapshot {
            run_id: self.inner.run_id.clone(),
            request: self.inner.request.clone(),
            results,
            attributes,
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.inner.run_id)
            .field("results", &self.inner.results.len())
            .field("is_callback", &self.inner.is_callback)
            .finish()
    }
}

/// 可序列化的上下文快照，用于挂起后的回调续跑
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub run_id: String,
    pub request: RunRequest,
    pub results: Vec<SnapshotEntry>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub node: String,
    #[serde(default)]
    pub iteration: IterationPath,
    pub value: Value,
}

impl ContextSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowNode, NodeKind};
    use serde_json::json;

    fn context() -> ExecutionContext {
        let canvas = FlowCanvas::new("a", vec![FlowNode::new("a", NodeKind::NoOp)]).unwrap();
        ExecutionContext::new("run-1", Arc::new(canvas), RunRequest::default())
    }

    #[test]
    fn records_are_write_once() {
        let ctx = context();
        let root = IterationPath::root();
        ctx.record("tool", &root, json!({"ok": true})).unwrap();
        let err = ctx.record("tool", &root, json!({"ok": false})).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateResult(node) if node == "tool"));
        assert_eq!(ctx.get("tool"), Some(json!({"ok": true})));
    }

    #[test]
    fn iterations_do_not_overwrite() {
        let ctx = context();
        let root = IterationPath::root();
        for i in 0..3 {
            ctx.record("body", &root.child(i), json!(i)).unwrap();
        }
        assert_eq!(ctx.result_count("body"), 3);
        assert_eq!(ctx.lookup("body", &root.child(1)), Some(json!(1)));
        // 外层读取时取最近一轮
        assert_eq!(ctx.get("body"), Some(json!(2)));
    }

    #[test]
    fn fallback_stays_inside_the_scope() {
        let ctx = context();
        let root = IterationPath::root();
        ctx.record("check", &root.child(0).child(1), json!("outer-0")).unwrap();

        // 外层第二轮尚无内层结果
        assert_eq!(ctx.lookup("check", &root.child(1)), None);
        assert_eq!(ctx.lookup("check", &root.child(0)), Some(json!("outer-0")));
        assert_eq!(ctx.get("check"), Some(json!("outer-0")));
    }

    #[test]
    fn resolve_reports_missing_fields() {
        let ctx = context();
        ctx.record("llm", &IterationPath::root(), json!({"choices": [{"text": "{\"a\":1}"}]}))
            .unwrap();

        let reference = ValueRef::parse("llm.choices[0].text").unwrap().as_json();
        assert_eq!(
            ctx.resolve(&reference, &IterationPath::root()).unwrap(),
            json!({"a": 1})
        );

        let missing = ValueRef::parse("llm.choices[3].text").unwrap();
        assert!(ctx.resolve(&missing, &IterationPath::root()).unwrap_err().is_lookup());

        let unknown = ValueRef::node("ghost");
        assert!(ctx.resolve(&unknown, &IterationPath::root()).unwrap_err().is_lookup());
    }

    #[test]
    fn snapshot_restores_as_callback() {
        let ctx = context();
        ctx.record("a", &IterationPath::root(), json!("done")).unwrap();
        ctx.set_attribute("validated", json!(true));

        let snapshot = ContextSnapshot::from_json(&ctx.snapshot().to_json().unwrap()).unwrap();
        let resumed = ExecutionContext::resume(Arc::clone(ctx.canvas()), snapshot);
        assert!(resumed.is_callback());
        assert_eq!(resumed.run_id(), "run-1");
        assert_eq!(resumed.get("a"), Some(json!("done")));
        assert_eq!(resumed.attribute("validated"), Some(json!(true)));
    }
}
