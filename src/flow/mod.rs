// Flow 模块 - 节点模型、画布与序列化

pub mod builder;
pub mod canvas;
pub mod conditions;
pub mod definition;
pub mod nodes;
pub mod path;

// 重新导出核心类型
pub use builder::FlowCanvasBuilder;
pub use canvas::FlowCanvas;
pub use conditions::{
    predicate_absent, predicate_equals, predicate_exists, predicate_from_fn,
    predicate_not_equals, BranchCondition, ContextPredicate, PredicateFn,
};
pub use definition::{FlowDefinition, GraphNode, GraphSpec, DEFAULT_DEFINITION_VERSION};
pub use nodes::{
    BranchFailurePolicy, Edge, FlowNode, LlmNode, LoopNode, MessageTemplate, NodeKind,
    ParallelBranch, ParallelNode, ReferenceNode, ToolNode, END_NODE_ID, START_NODE_ID,
};
pub use path::{PathSegment, ValuePath, ValueRef};
