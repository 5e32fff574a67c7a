use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::state::ExecutionContext;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// 语言模型请求
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// 注册表中的模型键
    pub model: String,
    /// 实际下发给服务端的模型名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub messages: Vec<LlmMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_params: Option<Value>,
}

impl LlmRequest {
    pub fn last_user_message(&self) -> Option<&LlmMessage> {
        self.messages.iter().rev().find(|m| m.role == "user")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON 编码的参数
    pub arguments: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmError {
    pub code: String,
    pub message: String,
}

/// 结构化的模型响应，完整写入上下文供下游节点按字段读取
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LlmError>,
}

impl LlmResponse {
    /// 单个文本选项的响应
    pub fn text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                text: text.into(),
                function_call: None,
                finish_reason: Some("stop".to_string()),
            }],
            ..Self::default()
        }
    }

    pub fn first_text(&self) -> Option<&str> {
        self.choices.first().map(|choice| choice.text.as_str())
    }
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmResponse>> + Send>>;

/// 语言模型能力
pub trait LanguageModel: Send + Sync {
    fn model(&self) -> &str;

    fn invoke(&self, request: LlmRequest, ctx: &ExecutionContext) -> LlmStream;
}

#[derive(Default, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn LanguageModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册模型，重复注册时告警并保留第一个
    pub fn register(&mut self, model: Arc<dyn LanguageModel>) {
        let key = model.model().to_string();
        if self.models.contains_key(&key) {
            warn!(model = %key, "model already registered, keeping the first registration");
            return;
        }
        debug!(model = %key, "model registered");
        self.models.insert(key, model);
    }

    pub fn with(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.register(model);
        self
    }

    pub fn get(&self, model: &str) -> Option<Arc<dyn LanguageModel>> {
        self.models.get(model).map(Arc::clone)
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// 本地回显模型：把最后一条用户消息原样作为回复
#[derive(Clone, Debug)]
pub struct EchoModel {
    model: String,
}

impl EchoModel {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for EchoModel {
    fn default() -> Self {
        Self::new("echo")
    }
}

impl LanguageModel for EchoModel {
    fn model(&self) -> &str {
        &self.model
    }

    fn invoke(&self, request: LlmRequest, ctx: &ExecutionContext) -> LlmStream {
        let text = request
            .last_user_message()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        let mut response = LlmResponse::text(
            request.model_name.unwrap_or_else(|| self.model.clone()),
            text,
        );
        response.id = format!("{}-echo", ctx.run_id());
        stream::once(async move { Ok(response) }).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_models_keep_first() {
        let registry = ModelRegistry::new()
            .with(Arc::new(EchoModel::new("gpt")))
            .with(Arc::new(EchoModel::new("gpt")))
            .with(Arc::new(EchoModel::default()));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("echo"));
    }

    #[test]
    fn response_serializes_choices() {
        let response = LlmResponse::text("echo", "hi");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["choices"][0]["text"], "hi");
        assert!(value.get("error").is_none());
    }
}
