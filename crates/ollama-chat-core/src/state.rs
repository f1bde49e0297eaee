//! UI-agnostic conversation data model
//!
//! These types are shared by the session controller, the store and any front
//! end. Nothing here depends on a UI framework or on the model client.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_TEMPERATURE: f32 = 0.5;
pub const DEFAULT_CONVERSATION_LABEL: &str = "New Chat";

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A chat message in a conversation log
///
/// Assistant messages keep every sibling answer generated for the preceding
/// user turn in `answers`; `content` always mirrors the selected one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Base64 image payloads (no `data:` prefix)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub selected: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content.into(), Vec::new())
    }

    pub fn user(content: impl Into<String>, images: Vec<String>) -> Self {
        Self::plain(ChatRole::User, content.into(), images)
    }

    /// An assistant message with a single answer
    pub fn assistant(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            role: ChatRole::Assistant,
            answers: vec![content.clone()],
            content,
            images: Vec::new(),
            selected: 0,
        }
    }

    /// The empty assistant turn shown while a reply is pending
    pub fn placeholder() -> Self {
        Self::assistant(String::new())
    }

    fn plain(role: ChatRole, content: String, images: Vec<String>) -> Self {
        Self {
            role,
            content,
            images,
            answers: Vec::new(),
            selected: 0,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == ChatRole::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == ChatRole::Assistant
    }

    /// All sibling answers in generation order
    pub fn sibling_answers(&self) -> Vec<&str> {
        if self.answers.is_empty() {
            vec![self.content.as_str()]
        } else {
            self.answers.iter().map(String::as_str).collect()
        }
    }

    pub fn sibling_count(&self) -> usize {
        self.answers.len().max(1)
    }

    /// Overwrite one sibling answer, keeping `content` in sync
    pub fn set_answer(&mut self, slot: usize, text: &str) {
        if self.answers.is_empty() {
            self.answers.push(self.content.clone());
        }
        while self.answers.len() <= slot {
            self.answers.push(String::new());
        }
        self.answers[slot] = text.to_string();
        if slot == self.selected {
            self.content = text.to_string();
        }
    }

    /// Append an empty sibling and select it. Returns its slot.
    pub fn push_sibling(&mut self) -> usize {
        if self.answers.is_empty() {
            self.answers.push(self.content.clone());
        }
        self.answers.push(String::new());
        let slot = self.answers.len() - 1;
        self.select_answer(slot);
        slot
    }

    pub fn select_answer(&mut self, slot: usize) {
        if let Some(answer) = self.answers.get(slot) {
            self.selected = slot;
            self.content = answer.clone();
        }
    }
}

/// A named, independently persisted chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub key: String,
    pub label: String,
    #[serde(rename = "systemPrompt", default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Conversation {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: DEFAULT_CONVERSATION_LABEL.to_string(),
            system_prompt: None,
            temperature: None,
            model: None,
        }
    }
}

/// The settings a chat request is made with
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub system_prompt: String,
    pub temperature: f32,
    pub model: String,
}

impl Settings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            model: model.into(),
        }
    }
}

/// Clamp a temperature into the supported 0.0 - 1.0 range
pub fn clamp_temperature(value: f32) -> f32 {
    if value.is_nan() {
        DEFAULT_TEMPERATURE
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Addresses one sibling answer of one message in a conversation log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerSlot {
    pub message: usize,
    pub answer: usize,
}
