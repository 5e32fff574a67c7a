use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::flow::conditions::{BranchCondition, ContextPredicate};
use crate::flow::path::ValueRef;

/// 画布自带的开始节点 id
pub const START_NODE_ID: &str = "start";
/// 画布自带的结束节点 id
pub const END_NODE_ID: &str = "end";
pub const RESERVED_NODE_IDS: [&str; 2] = [START_NODE_ID, END_NODE_ID];

/// Flow 节点
#[derive(Clone, Debug)]
pub struct FlowNode {
    pub id: String,
    pub name: Option<String>,
    pub kind: NodeKind,
    pub next: Vec<Edge>,
    pub metadata: Option<Value>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            next: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.next.push(edge);
        self
    }

    pub fn is_reserved(&self) -> bool {
        RESERVED_NODE_IDS.contains(&self.id.as_str())
    }

    /// 所有后继节点：普通边、并行分支入口、循环体入口
    /// 出边目标；并行分支与循环体走到这里即结束
    pub fn join_targets(&self) -> Vec<&str> {
        self.next.iter().map(|edge| edge.target.as_str()).collect()
    }

    pub fn successors(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.next.iter().map(|edge| edge.target.as_str()).collect();
        match &self.kind {
            NodeKind::Parallel(parallel) => {
                targets.extend(parallel.branches.iter().map(|branch| branch.entry.as_str()));
            }
            NodeKind::Loop(loop_node) => targets.push(loop_node.body.as_str()),
            _ => {}
        }
        targets
    }
}

/// Flow 节点类型
#[derive(Clone, Debug)]
pub enum NodeKind {
    Start,
    End,
    NoOp,
    Tool(ToolNode),
    LanguageModel(LlmNode),
    Reference(ReferenceNode),
    Parallel(ParallelNode),
    Loop(LoopNode),
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::NoOp => "noop",
            NodeKind::Tool(_) => "tool",
            NodeKind::LanguageModel(_) => "language_model",
            NodeKind::Reference(_) => "reference",
            NodeKind::Parallel(_) => "parallel",
            NodeKind::Loop(_) => "loop",
        }
    }
}

/// 节点出边
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub target: String,
    #[serde(default, flatten, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchCondition>,
    /// 所有分支都未命中时的兜底边
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

impl Edge {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            branch: None,
            default: false,
        }
    }

    pub fn when(
        target: impl Into<String>,
        branch_key: impl Into<String>,
        branch_value: impl Into<Value>,
    ) -> Self {
        Self {
            target: target.into(),
            branch: Some(BranchCondition::new(branch_key, branch_value)),
            default: false,
        }
    }

    pub fn otherwise(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            branch: None,
            default: true,
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.branch.is_some()
    }
}

/// 工具节点
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolNode {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
    /// 整体参数来源，需解析为对象
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_ref: Option<ValueRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arg_refs: BTreeMap<String, ValueRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: u32,
}

impl ToolNode {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Self::default()
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_args_ref(mut self, reference: ValueRef) -> Self {
        self.args_ref = Some(reference);
        self
    }

    pub fn with_arg_ref(mut self, name: impl Into<String>, reference: ValueRef) -> Self {
        self.arg_refs.insert(name.into(), reference);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// 消息模板，内容中的 `{{node.path}}` 会被替换为对应结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub role: String,
    pub content: String,
}

impl MessageTemplate {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// 语言模型节点
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmNode {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl LlmNode {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: MessageTemplate) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// 引用节点：把已有结果中的字段转发为自身结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceNode {
    pub source: ValueRef,
}

/// 并行分支失败策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchFailurePolicy {
    /// 汇合后以失败结束当前路径
    #[default]
    FailPath,
    /// 记录失败分支，继续后续节点
    Continue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelBranch {
    pub key: String,
    pub entry: String,
}

impl ParallelBranch {
    pub fn new(key: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry: entry.into(),
        }
    }
}

/// 并行节点
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelNode {
    pub branches: Vec<ParallelBranch>,
    #[serde(default)]
    pub failure: BranchFailurePolicy,
    /// 单个分支的等待上限
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ParallelNode {
    pub fn new(branches: Vec<ParallelBranch>) -> Self {
        Self {
            branches,
            ..Self::default()
        }
    }

    pub fn with_failure(mut self, failure: BranchFailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// 循环节点
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopNode {
    pub body: String,
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ContextPredicate>,
    /// 保存每一轮的输出
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collect: bool,
}

impl LoopNode {
    pub fn new(body: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            body: body.into(),
            max_iterations,
            condition: None,
            collect: false,
        }
    }

    pub fn with_condition(mut self, condition: ContextPredicate) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn collecting(mut self) -> Self {
        self.collect = true;
        self
    }
}
