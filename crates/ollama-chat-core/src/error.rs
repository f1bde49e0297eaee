//! Error types shared by every part of the chat core.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// A preset with this name is already stored
    #[error("A preset named '{0}' already exists")]
    DuplicatePreset(String),

    #[error("No preset selected")]
    NoPresetSelected,

    #[error("The Default preset cannot be deleted")]
    CannotDeleteDefault,

    #[error("Unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("Unknown conversation '{0}'")]
    UnknownConversation(String),

    #[error("No conversation is active")]
    NoActiveConversation,

    /// The addressed message is not an assistant answer to a user turn
    #[error("Message {0} is not an answer to a user turn")]
    NotAnAnswer(usize),

    #[error("Message {0} is not a user turn")]
    NotAUserTurn(usize),

    #[error("Could not reach the model server: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model returned an error: {0}")]
    Model(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not read image {}: {reason}", path.display())]
    Image { path: PathBuf, reason: String },
}

impl ChatError {
    /// Errors that are shown to the user as notifications rather than logged
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ChatError::DuplicatePreset(_)
                | ChatError::NoPresetSelected
                | ChatError::CannotDeleteDefault
                | ChatError::UnknownPreset(_)
        )
    }
}
