//! Session store
//!
//! A string key-value store holding the conversation list, per-conversation
//! message logs and settings, and the preset list. Values are JSON text.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::presets::Preset;
use crate::state::{ChatMessage, Conversation};

pub const CONVERSATIONS_KEY: &str = "conversations";
pub const CONFIGS_KEY: &str = "configs";

const SYSTEM_PROMPT_SUFFIX: &str = "-sysprompt";
const TEMPERATURE_SUFFIX: &str = "-temp";
const MODEL_SUFFIX: &str = "-model";

/// Storage backend for the session store
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    fn keys(&self) -> Vec<String>;
}

/// In-process store; everything is lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Store backed by a single JSON file, written through on every change
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "session file is corrupt, starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, entries })
    }

    /// Default location under the platform data directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("ollama-chat").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.flush()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Typed access to the session key scheme
pub struct SessionStore {
    backend: Box<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(backend: Box<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.backend.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "ignoring unreadable stored value");
                None
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        debug!(key, bytes = raw.len(), "store write");
        self.backend.set(key, raw)
    }

    pub fn clear(&mut self) -> Result<()> {
        debug!("clearing session store");
        self.backend.clear()
    }

    pub fn load_conversations(&self) -> Vec<Conversation> {
        self.read_json(CONVERSATIONS_KEY).unwrap_or_default()
    }

    pub fn save_conversations(&mut self, conversations: &[Conversation]) -> Result<()> {
        self.write_json(CONVERSATIONS_KEY, conversations)
    }

    pub fn has_messages(&self, key: &str) -> bool {
        self.backend.get(key).is_some()
    }

    pub fn load_messages(&self, key: &str) -> Vec<ChatMessage> {
        self.read_json(key).unwrap_or_default()
    }

    pub fn save_messages(&mut self, key: &str, messages: &[ChatMessage]) -> Result<()> {
        self.write_json(key, messages)
    }

    pub fn load_system_prompt(&self, key: &str) -> Option<String> {
        self.read_json(&format!("{}{}", key, SYSTEM_PROMPT_SUFFIX))
    }

    pub fn save_system_prompt(&mut self, key: &str, prompt: &str) -> Result<()> {
        self.write_json(&format!("{}{}", key, SYSTEM_PROMPT_SUFFIX), prompt)
    }

    pub fn load_temperature(&self, key: &str) -> Option<f32> {
        self.read_json(&format!("{}{}", key, TEMPERATURE_SUFFIX))
    }

    pub fn save_temperature(&mut self, key: &str, temperature: f32) -> Result<()> {
        self.write_json(&format!("{}{}", key, TEMPERATURE_SUFFIX), &temperature)
    }

    pub fn load_model(&self, key: &str) -> Option<String> {
        self.read_json(&format!("{}{}", key, MODEL_SUFFIX))
    }

    pub fn save_model(&mut self, key: &str, model: &str) -> Result<()> {
        self.write_json(&format!("{}{}", key, MODEL_SUFFIX), model)
    }

    pub fn load_presets(&self) -> Option<Vec<Preset>> {
        self.read_json(CONFIGS_KEY)
    }

    pub fn save_presets(&mut self, presets: &[Preset]) -> Result<()> {
        self.write_json(CONFIGS_KEY, presets)
    }

    /// Remove the log and every setting stored for a conversation
    pub fn purge_conversation(&mut self, key: &str) -> Result<()> {
        self.backend.remove(key)?;
        for suffix in [SYSTEM_PROMPT_SUFFIX, TEMPERATURE_SUFFIX, MODEL_SUFFIX] {
            self.backend.remove(&format!("{}{}", key, suffix))?;
        }
        Ok(())
    }

    /// Give every listed conversation a stored log. Returns how many were missing.
    pub fn rehydrate(&mut self) -> Result<usize> {
        let mut repaired = 0;
        for conversation in self.load_conversations() {
            if !self.has_messages(&conversation.key) {
                self.save_messages(&conversation.key, &[])?;
                repaired += 1;
            }
        }
        if repaired > 0 {
            warn!(repaired, "restored missing conversation logs");
        }
        Ok(repaired)
    }

    pub fn keys(&self) -> Vec<String> {
        self.backend.keys()
    }
}
