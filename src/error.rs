use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

/// 画布构建期错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node id `{0}` is reserved")]
    ReservedId(String),
    #[error("duplicate node id `{0}`")]
    DuplicateNode(String),
    #[error("canvas has no root node")]
    MissingRoot,
    #[error("node `{from}` points to unknown node `{to}`")]
    DanglingEdge { from: String, to: String },
    #[error("node `{0}` has conditional edges but no default edge")]
    MissingDefaultBranch(String),
    #[error("node `{0}` declares more than one default edge")]
    MultipleDefaultBranches(String),
    #[error("node `{0}` has more than one unconditional successor")]
    AmbiguousSuccessor(String),
    #[error("parallel node `{0}` declares no branches")]
    EmptyParallel(String),
    #[error("parallel node `{node}` repeats branch key `{key}`")]
    DuplicateBranchKey { node: String, key: String },
    #[error("loop node `{0}` must allow at least one iteration")]
    InvalidLoopBound(String),
    #[error("cycle detected through node `{0}`")]
    Cycle(String),
    #[error("node `{node}` is reachable from more than one scope of `{owner}`")]
    ScopeEscape { owner: String, node: String },
    #[error("metadata set for unknown node `{0}`")]
    UnknownMetadataTarget(String),
    #[error("node `{node}` uses malformed reference `{reference}`")]
    InvalidReference { node: String, reference: String },
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid flow graph: {0}")]
    InvalidGraph(#[from] GraphError),
    #[error("unknown node `{0}` in canvas")]
    UnknownNode(String),
    #[error("lookup failed: node `{node}` has no value at `{path}`")]
    Lookup { node: String, path: String },
    #[error("node `{0}` already holds a result for this iteration")]
    DuplicateResult(String),
    #[error("tool `{0}` not registered")]
    ToolNotRegistered(String),
    #[error("model `{0}` not registered")]
    ModelNotRegistered(String),
    #[error("capability failed in node `{node}`: {message}")]
    Capability { node: String, message: String },
    #[error("node `{node}` timed out after {millis}ms")]
    Timeout { node: String, millis: u64 },
    #[error("parallel node `{node}` had failing branches: {branches:?}")]
    BranchFailed { node: String, branches: Vec<String> },
    #[error("loop `{node}` exceeded maximum iterations {max}")]
    LoopBoundExceeded { node: String, max: u32 },
    #[error("pipe `{pipe}` failed: {message}")]
    Pipe { pipe: String, message: String },
    #[error("clock moved backwards: last={last}ms now={now}ms")]
    ClockMovedBackwards { last: u64, now: u64 },
    #[error("flow definition `{definition_id}:{version}` not found")]
    DefinitionNotFound {
        definition_id: String,
        version: String,
    },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    pub fn capability(node: impl Into<String>, message: impl ToString) -> Self {
        FlowError::Capability {
            node: node.into(),
            message: message.to_string(),
        }
    }

    /// 构建期错误，画布不可运行
    pub fn is_construction(&self) -> bool {
        matches!(self, FlowError::InvalidGraph(_))
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, FlowError::Lookup { .. })
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}
