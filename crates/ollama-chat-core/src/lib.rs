pub mod ai;
pub mod branching;
pub mod config;
pub mod error;
pub mod export;
pub mod images;
pub mod presets;
pub mod session;
pub mod state;
pub mod store;
pub mod streaming;

// Re-export main types for convenience
pub use ai::{ChatRequest, ModelClient, ModelInfo, OllamaClient};
pub use config::Config;
pub use error::{ChatError, Result};
pub use images::{encode_image, ImageAttachments};
pub use presets::{Preset, PresetManager, DEFAULT_PRESET};
pub use session::{ChatSession, ReplyFailure};
pub use state::{AnswerSlot, ChatMessage, ChatRole, Conversation, Settings};
pub use store::{FileStore, KeyValueStore, MemoryStore, SessionStore};
pub use streaming::{drive_reply, PendingReply, ReplyOutcome, StreamEvent, StreamEventKind};
