use std::collections::HashMap;

use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::flow::canvas::FlowCanvas;
use crate::flow::nodes::{
    Edge, FlowNode, LlmNode, LoopNode, NodeKind, ParallelNode, ReferenceNode, ToolNode,
};
use crate::flow::path::ValueRef;

/// 画布构建器
#[derive(Default)]
pub struct FlowCanvasBuilder {
    root: Option<String>,
    nodes: Vec<FlowNode>,
    edges: HashMap<String, Vec<Edge>>,
    metadata: HashMap<String, Value>,
}

impl FlowCanvasBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: FlowNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn add_tool_node(&mut self, id: &str, tool: ToolNode) -> &mut Self {
        self.add_node(FlowNode::new(id, NodeKind::Tool(tool)))
    }

    pub fn add_llm_node(&mut self, id: &str, llm: LlmNode) -> &mut Self {
        self.add_node(FlowNode::new(id, NodeKind::LanguageModel(llm)))
    }

    pub fn add_reference_node(&mut self, id: &str, source: ValueRef) -> &mut Self {
        self.add_node(FlowNode::new(
            id,
            NodeKind::Reference(ReferenceNode { source }),
        ))
    }

    pub fn add_parallel_node(&mut self, id: &str, parallel: ParallelNode) -> &mut Self {
        self.add_node(FlowNode::new(id, NodeKind::Parallel(parallel)))
    }

    pub fn add_loop_node(&mut self, id: &str, loop_node: LoopNode) -> &mut Self {
        self.add_node(FlowNode::new(id, NodeKind::Loop(loop_node)))
    }

    pub fn add_noop_node(&mut self, id: &str) -> &mut Self {
        self.add_node(FlowNode::new(id, NodeKind::NoOp))
    }

    /// 节点元数据在 build 时写入，节点不存在时 build 报错
    pub fn set_node_metadata(&mut self, id: &str, metadata: Value) -> &mut Self {
        self.metadata.insert(id.to_string(), metadata);
        self
    }

    pub fn set_root(&mut self, id: &str) -> &mut Self {
        self.root = Some(id.to_string());
        self
    }

    pub fn connect(&mut self, from: &str, to: &str) -> &mut Self {
        self.push_edge(from, Edge::to(to))
    }

    /// 条件边：`branch_key` 的取值等于 `branch_value` 时走向 `to`
    pub fn connect_when(
        &mut self,
        from: &str,
        to: &str,
        branch_key: &str,
        branch_value: impl Into<Value>,
    ) -> &mut Self {
        self.push_edge(from, Edge::when(to, branch_key, branch_value))
    }

    pub fn connect_default(&mut self, from: &str, to: &str) -> &mut Self {
        self.push_edge(from, Edge::otherwise(to))
    }

    fn push_edge(&mut self, from: &str, edge: Edge) -> &mut Self {
        self.edges.entry(from.to_string()).or_default().push(edge);
        self
    }

    /// 校验并生成画布；未指定根节点时使用第一个加入的节点
    pub fn build(self) -> Result<FlowCanvas> {
        let Self {
            root,
            mut nodes,
            mut edges,
            mut metadata,
        } = self;

        let root = root
            .or_else(|| nodes.first().map(|node| node.id.clone()))
            .ok_or(GraphError::MissingRoot)?;

        for node in nodes.iter_mut() {
            if let Some(extra) = edges.remove(&node.id) {
                node.next.extend(extra);
            }
            if let Some(value) = metadata.remove(&node.id) {
                node.metadata = Some(value);
            }
        }
        if let Some((from, pending)) = edges.into_iter().next() {
            let to = pending
                .first()
                .map(|edge| edge.target.clone())
                .unwrap_or_default();
            return Err(GraphError::DanglingEdge { from, to }.into());
        }
        if let Some(id) = metadata.into_keys().next() {
            return Err(GraphError::UnknownMetadataTarget(id).into());
        }

        FlowCanvas::new(root, nodes)
    }
}
