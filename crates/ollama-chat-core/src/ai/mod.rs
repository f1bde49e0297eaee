pub mod ndjson;
pub mod ollama;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::{ChatMessage, ChatRole, Settings};

pub use ndjson::NdjsonDecoder;
pub use ollama::OllamaClient;

/// Incremental pieces of one model reply, in arrival order
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// A message as the model server sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            images: msg.images.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub options: ChatOptions,
}

impl ChatRequest {
    /// A streaming request for `history`, prefixed by the system prompt
    pub fn new(settings: &Settings, history: &[ChatMessage]) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage {
            role: ChatRole::System,
            content: settings.system_prompt.clone(),
            images: Vec::new(),
        });
        messages.extend(history.iter().map(WireMessage::from));

        Self {
            model: settings.model.clone(),
            messages,
            stream: true,
            options: ChatOptions {
                temperature: settings.temperature,
            },
        }
    }
}

/// A model available on the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// Sort models largest first
pub fn sort_by_size(models: &mut [ModelInfo]) {
    models.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name)));
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream>;

    /// Available models, largest first
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_prefixes_system_prompt() {
        let settings = Settings {
            system_prompt: "Be brief.".to_string(),
            temperature: 0.2,
            model: "llama3.2".to_string(),
        };
        let history = vec![
            ChatMessage::user("What is Rust?", vec!["QUJD".to_string()]),
            ChatMessage::assistant("A language."),
            ChatMessage::user("Why?", Vec::new()),
        ];

        let request = ChatRequest::new(&settings, &history);

        assert_eq!(request.messages.len(), 4);
        assert_eq!(request.messages[0].role, ChatRole::System);
        assert_eq!(request.messages[0].content, "Be brief.");
        assert_eq!(request.messages[1].images, vec!["QUJD".to_string()]);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["model"], "llama3.2");
        assert!((json["options"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert!(json["messages"][2].get("images").is_none());
        assert!(json["messages"][2].get("answers").is_none());
    }

    #[test]
    fn test_sort_by_size_descending() {
        let mut models = vec![
            ModelInfo { name: "small".into(), size: 10 },
            ModelInfo { name: "big".into(), size: 300 },
            ModelInfo { name: "mid".into(), size: 50 },
        ];
        sort_by_size(&mut models);
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["big", "mid", "small"]);
    }
}
