use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{FlowError, GraphError, Result};
use crate::flow::canvas::FlowCanvas;
use crate::flow::nodes::{Edge, FlowNode, NodeKind};
use crate::storage::FlowDataStorage;
use crate::utils::id::IdGenerator;

pub const DEFAULT_DEFINITION_VERSION: &str = "1.0.0";

/// 流程定义：带版本的画布序列化快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub definition_id: String,
    pub version: String,
    pub graph: String,
}

/// 画布的 JSON 形式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    pub root: String,
    pub nodes: Vec<GraphNode>,
}

/// 统一的节点定义，通过 `type` 字段区分类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 节点类型: tool, language_model, reference, parallel, loop, noop
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl GraphNode {
    fn from_node(node: &FlowNode) -> Result<Self> {
        let config = match &node.kind {
            NodeKind::Tool(tool) => serde_json::to_value(tool)?,
            NodeKind::LanguageModel(llm) => serde_json::to_value(llm)?,
            NodeKind::Reference(reference) => serde_json::to_value(reference)?,
            NodeKind::Parallel(parallel) => serde_json::to_value(parallel)?,
            NodeKind::Loop(loop_node) => serde_json::to_value(loop_node)?,
            NodeKind::NoOp | NodeKind::Start | NodeKind::End => Value::Null,
        };
        Ok(Self {
            id: node.id.clone(),
            name: node.name.clone(),
            node_type: node.kind.type_name().to_string(),
            config,
            next: node.next.clone(),
            metadata: node.metadata.clone(),
        })
    }

    fn into_node(self) -> Result<FlowNode> {
        let kind = match self.node_type.as_str() {
            "tool" => NodeKind::Tool(serde_json::from_value(self.config)?),
            "language_model" | "llm" => NodeKind::LanguageModel(serde_json::from_value(self.config)?),
            "reference" => NodeKind::Reference(serde_json::from_value(self.config)?),
            "parallel" => NodeKind::Parallel(serde_json::from_value(self.config)?),
            "loop" => NodeKind::Loop(serde_json::from_value(self.config)?),
            "noop" => NodeKind::NoOp,
            "start" | "end" => return Err(GraphError::ReservedId(self.id).into()),
            other => {
                return Err(FlowError::Serialization(format!(
                    "node `{}` has unknown type `{}`",
                    self.id, other
                )))
            }
        };
        Ok(FlowNode {
            id: self.id,
            name: self.name,
            kind,
            next: self.next,
            metadata: self.metadata,
        })
    }
}

impl GraphSpec {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FlowError::Serialization(format!("Failed to parse graph: {}", e)))
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| FlowError::Serialization(format!("Failed to parse graph value: {}", e)))
    }

    pub fn into_canvas(self) -> Result<FlowCanvas> {
        let nodes = self
            .nodes
            .into_iter()
            .map(GraphNode::into_node)
            .collect::<Result<Vec<_>>>()?;
        FlowCanvas::new(self.root, nodes)
    }
}

impl FlowCanvas {
    pub fn to_spec(&self) -> Result<GraphSpec> {
        let nodes = self
            .user_nodes()
            .map(GraphNode::from_node)
            .collect::<Result<Vec<_>>>()?;
        Ok(GraphSpec {
            root: self.root().to_string(),
            nodes,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_spec()?)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_spec()?)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        GraphSpec::from_json(json)?.into_canvas()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Serialization(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_definition(definition: &FlowDefinition) -> Result<Self> {
        Self::from_json(&definition.graph)
    }

    /// 保存到存储；未给出 id 时生成一个，版本默认 `1.0.0`
    pub async fn deploy(
        &self,
        storage: &dyn FlowDataStorage,
        definition_id: Option<&str>,
        version: Option<&str>,
    ) -> Result<FlowDefinition> {
        let definition_id = match definition_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => format!("flow-{}", IdGenerator::default().next_id()?),
        };
        let version = version
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_DEFINITION_VERSION)
            .to_string();

        let graph = storage
            .save(&definition_id, &version, self.to_json()?)
            .await?;
        info!(definition = %definition_id, version = %version, "flow definition deployed");
        Ok(FlowDefinition {
            definition_id,
            version,
            graph,
        })
    }

    pub async fn load(
        storage: &dyn FlowDataStorage,
        definition_id: &str,
        version: &str,
    ) -> Result<Self> {
        let graph = storage
            .get(definition_id, version)
            .await?
            .ok_or_else(|| FlowError::DefinitionNotFound {
                definition_id: definition_id.to_string(),
                version: version.to_string(),
            })?;
        debug!(definition = %definition_id, version = %version, "flow definition loaded");
        Self::from_json(&graph)
    }
}
