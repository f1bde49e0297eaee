//! Application state and conversation controller
//!
//! `ChatSession` owns everything a front end displays: the conversation
//! list, the active conversation's log and settings, presets, image
//! attachments and in-flight replies. Every mutation that should outlive the
//! process goes through the `SessionStore`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::ai::{sort_by_size, ChatRequest, ModelInfo};
use crate::branching;
use crate::error::{ChatError, Result};
use crate::export;
use crate::images::ImageAttachments;
use crate::presets::PresetManager;
use crate::state::{clamp_temperature, AnswerSlot, ChatMessage, Conversation, Settings};
use crate::store::SessionStore;
use crate::streaming::{Generations, PendingReply, StreamEvent, StreamEventKind};

/// A reply that ended in an error and can be retried
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFailure {
    pub conversation: String,
    pub slot: AnswerSlot,
    pub reason: String,
}

pub struct ChatSession {
    store: SessionStore,
    conversations: Vec<Conversation>,
    active: Option<String>,
    messages: Vec<ChatMessage>,
    settings: Settings,
    defaults: Settings,
    presets: PresetManager,
    images: ImageAttachments,
    models: Vec<ModelInfo>,
    generations: Generations,
    created: u64,
    /// Latest failed reply per conversation key
    failures: HashMap<String, ReplyFailure>,
}

impl ChatSession {
    /// Load the session from `store`.
    ///
    /// Unless `keep_history` is set the store is wiped first, so every launch
    /// starts with no conversations and only the Default preset.
    pub fn open(mut store: SessionStore, defaults: Settings, keep_history: bool) -> Result<Self> {
        if keep_history {
            store.rehydrate()?;
        } else {
            store.clear()?;
        }

        let conversations = store.load_conversations();
        let presets = PresetManager::from_stored(store.load_presets().unwrap_or_default(), &defaults);
        store.save_presets(presets.presets())?;

        info!(
            conversations = conversations.len(),
            presets = presets.presets().len(),
            keep_history,
            "session loaded"
        );

        Ok(Self {
            store,
            created: conversations.len() as u64,
            conversations,
            active: None,
            messages: Vec::new(),
            settings: defaults.clone(),
            defaults,
            presets,
            images: ImageAttachments::new(),
            models: Vec::new(),
            generations: Generations::new(),
            failures: HashMap::new(),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn active_key(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        let key = self.active.as_deref()?;
        self.conversations.iter().find(|c| c.key == key)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn presets(&self) -> &PresetManager {
        &self.presets
    }

    pub fn images(&self) -> &ImageAttachments {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut ImageAttachments {
        &mut self.images
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    /// The failed reply of the active conversation, if any
    pub fn failure(&self) -> Option<&ReplyFailure> {
        self.active.as_deref().and_then(|key| self.failures.get(key))
    }

    /// First available model, or the configured default when none are known
    pub fn fallback_model(&self) -> &str {
        self.models
            .first()
            .map(|m| m.name.as_str())
            .unwrap_or(self.defaults.model.as_str())
    }

    /// Whether the active conversation is still receiving a reply
    pub fn is_generating(&self) -> bool {
        self.active
            .as_deref()
            .map(|key| self.generations.in_flight(key))
            .unwrap_or(false)
    }

    fn require_active(&self) -> Result<String> {
        self.active.clone().ok_or(ChatError::NoActiveConversation)
    }

    fn position(&self, key: &str) -> Result<usize> {
        self.conversations
            .iter()
            .position(|c| c.key == key)
            .ok_or_else(|| ChatError::UnknownConversation(key.to_string()))
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    fn next_key(&mut self) -> String {
        loop {
            let key = format!(
                "conversation-{}-{}",
                self.created,
                chrono::Utc::now().timestamp_millis()
            );
            self.created += 1;
            if !self.conversations.iter().any(|c| c.key == key) {
                return key;
            }
        }
    }

    /// Append a "New Chat" conversation and return its key
    pub fn create_conversation(&mut self) -> Result<String> {
        let key = self.next_key();
        self.conversations.push(Conversation::new(key.clone()));
        self.store.save_conversations(&self.conversations)?;
        self.store.save_messages(&key, &[])?;
        info!(conversation = %key, "conversation created");
        Ok(key)
    }

    /// Make `key` active, loading its log and settings
    pub fn switch_conversation(&mut self, key: &str) -> Result<()> {
        let conversation = self.conversations[self.position(key)?].clone();
        let fallback = self.fallback_model().to_string();

        self.messages = self.store.load_messages(key);
        self.settings = Settings {
            system_prompt: self
                .store
                .load_system_prompt(key)
                .or(conversation.system_prompt)
                .unwrap_or_else(|| self.defaults.system_prompt.clone()),
            temperature: self
                .store
                .load_temperature(key)
                .or(conversation.temperature)
                .map(clamp_temperature)
                .unwrap_or(self.defaults.temperature),
            model: self
                .store
                .load_model(key)
                .or(conversation.model)
                .filter(|m| !m.is_empty())
                .unwrap_or(fallback),
        };
        self.active = Some(key.to_string());

        debug!(conversation = key, messages = self.messages.len(), "conversation switched");
        Ok(())
    }

    /// Remove a conversation together with everything stored for it
    pub fn delete_conversation(&mut self, key: &str) -> Result<()> {
        let index = self.position(key)?;
        self.conversations.remove(index);
        self.store.save_conversations(&self.conversations)?;
        self.store.purge_conversation(key)?;
        self.generations.forget(key);

        self.failures.remove(key);
        if self.active.as_deref() == Some(key) {
            self.active = None;
            self.messages.clear();
            self.settings = Settings {
                model: self.fallback_model().to_string(),
                ..self.defaults.clone()
            };
        }

        info!(conversation = key, "conversation deleted");
        Ok(())
    }

    pub fn rename_conversation(&mut self, key: &str, label: &str) -> Result<()> {
        let index = self.position(key)?;
        let label = label.trim();
        if label.is_empty() {
            return Ok(());
        }
        self.conversations[index].label = label.to_string();
        self.store.save_conversations(&self.conversations)
    }

    /// Write the active log to the store
    pub fn persist_messages(&mut self) -> Result<()> {
        let key = self.require_active()?;
        self.store.save_messages(&key, &self.messages)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn set_system_prompt(&mut self, prompt: &str) -> Result<()> {
        self.settings.system_prompt = prompt.to_string();
        if let Some(key) = self.active.clone() {
            self.store.save_system_prompt(&key, prompt)?;
        }
        Ok(())
    }

    /// Set the temperature, clamped to 0.0 - 1.0. Returns the stored value.
    pub fn set_temperature(&mut self, temperature: f32) -> Result<f32> {
        let temperature = clamp_temperature(temperature);
        self.settings.temperature = temperature;
        if let Some(key) = self.active.clone() {
            self.store.save_temperature(&key, temperature)?;
        }
        Ok(temperature)
    }

    pub fn set_model(&mut self, model: &str) -> Result<()> {
        self.settings.model = model.to_string();
        if let Some(key) = self.active.clone() {
            self.store.save_model(&key, model)?;
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: Settings) -> Result<()> {
        self.set_system_prompt(&settings.system_prompt)?;
        self.set_temperature(settings.temperature)?;
        self.set_model(&settings.model)
    }

    /// Replace the known model list (kept largest first)
    pub fn set_available_models(&mut self, mut models: Vec<ModelInfo>) {
        sort_by_size(&mut models);
        self.models = models;

        if self.settings.model.is_empty() {
            self.settings.model = self.fallback_model().to_string();
        }
    }

    // ------------------------------------------------------------------
    // Presets
    // ------------------------------------------------------------------

    pub fn add_preset(&mut self, name: &str) -> Result<()> {
        self.presets.add(name, &self.settings)?;
        self.store.save_presets(self.presets.presets())
    }

    pub fn delete_preset(&mut self) -> Result<String> {
        let name = self.presets.delete_selected()?;
        self.store.save_presets(self.presets.presets())?;
        Ok(name)
    }

    pub fn select_preset(&mut self, name: &str) -> Result<()> {
        let fallback = self.fallback_model().to_string();
        let settings = self.presets.select(name, &fallback)?;
        info!(preset = name, model = %settings.model, "preset applied");
        self.apply_settings(settings)
    }

    // ------------------------------------------------------------------
    // Replies
    // ------------------------------------------------------------------

    fn begin_reply(&mut self, key: &str, slot: AnswerSlot) -> PendingReply {
        let request = ChatRequest::new(&self.settings, &self.messages[..slot.message]);
        let token = self.generations.begin(key);
        self.failures.remove(key);
        debug!(conversation = key, generation = token.generation(), ?slot, "reply started");
        PendingReply {
            conversation: key.to_string(),
            slot,
            token,
            request,
        }
    }

    /// Send a user message with the selected images attached.
    ///
    /// Returns the reply to fetch, or `None` when `text` is blank.
    pub fn send_message(&mut self, text: &str) -> Result<Option<PendingReply>> {
        self.require_active()?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let images = self.images.selected_payloads();
        self.messages.push(ChatMessage::user(text, images));
        self.persist_messages()?;

        self.reply_if_needed()
    }

    /// Start a reply when the log ends with a user turn
    pub fn reply_if_needed(&mut self) -> Result<Option<PendingReply>> {
        let key = self.require_active()?;
        if !self.messages.last().is_some_and(ChatMessage::is_user) {
            return Ok(None);
        }

        self.messages.push(ChatMessage::placeholder());
        let slot = AnswerSlot {
            message: self.messages.len() - 1,
            answer: 0,
        };
        let pending = self.begin_reply(&key, slot);
        self.persist_messages()?;
        Ok(Some(pending))
    }

    /// Apply a stream event. Returns false when it was stale and ignored.
    pub fn apply_stream_event(&mut self, event: &StreamEvent) -> Result<bool> {
        let key = event.conversation.as_str();
        if !self.generations.is_current(key, event.generation) {
            debug!(conversation = key, generation = event.generation, "dropping stale stream event");
            return Ok(false);
        }

        match &event.kind {
            StreamEventKind::Fragment(accumulated) => {
                self.write_answer(key, event.slot, accumulated)?;
            }
            StreamEventKind::Finished => {
                self.generations.finish(key, event.generation);
            }
            StreamEventKind::Failed(reason) => {
                self.generations.finish(key, event.generation);
                error!(conversation = key, reason = %reason, "reply failed");
                self.failures.insert(key.to_string(), ReplyFailure {
                    conversation: key.to_string(),
                    slot: event.slot,
                    reason: reason.clone(),
                });
            }
        }
        Ok(true)
    }

    fn write_answer(&mut self, key: &str, slot: AnswerSlot, text: &str) -> Result<()> {
        if self.active.as_deref() == Some(key) {
            if let Some(msg) = self.messages.get_mut(slot.message).filter(|m| m.is_assistant()) {
                msg.set_answer(slot.answer, text);
                return self.persist_messages();
            }
            warn!(conversation = key, ?slot, "reply target no longer exists");
            return Ok(());
        }

        if self.position(key).is_err() {
            return Ok(());
        }
        let mut log = self.store.load_messages(key);
        if let Some(msg) = log.get_mut(slot.message).filter(|m| m.is_assistant()) {
            msg.set_answer(slot.answer, text);
            self.store.save_messages(key, &log)?;
        }
        Ok(())
    }

    /// Re-run the reply that failed last, replacing its text
    pub fn retry_failed(&mut self) -> Result<Option<PendingReply>> {
        let key = self.require_active()?;
        let Some(failure) = self.failures.get(&key).cloned() else {
            return Ok(None);
        };
        if branching::answer_at(&self.messages, failure.slot.message).is_err() {
            self.failures.remove(&key);
            return Ok(None);
        }

        self.messages[failure.slot.message].set_answer(failure.slot.answer, "");
        self.messages[failure.slot.message].select_answer(failure.slot.answer);
        let pending = self.begin_reply(&key, failure.slot);
        self.persist_messages()?;
        info!(conversation = %key, "retrying failed reply");
        Ok(Some(pending))
    }

    // ------------------------------------------------------------------
    // Sibling answers
    // ------------------------------------------------------------------

    /// Generate another answer for the user turn before `index`
    pub fn regenerate(&mut self, index: usize) -> Result<PendingReply> {
        let key = self.require_active()?;
        let slot = branching::add_sibling(&mut self.messages, index)?;
        let pending = self.begin_reply(&key, slot);
        self.persist_messages()?;
        Ok(pending)
    }

    pub fn can_go_next(&self, index: usize) -> bool {
        branching::can_go_next(&self.messages, index)
    }

    pub fn can_go_previous(&self, index: usize) -> bool {
        branching::can_go_previous(&self.messages, index)
    }

    pub fn next_answer(&mut self, index: usize) -> Result<bool> {
        let moved = branching::next_answer(&mut self.messages, index)?;
        if moved {
            self.persist_messages()?;
        }
        Ok(moved)
    }

    pub fn previous_answer(&mut self, index: usize) -> Result<bool> {
        let moved = branching::previous_answer(&mut self.messages, index)?;
        if moved {
            self.persist_messages()?;
        }
        Ok(moved)
    }

    /// Delete a user turn and its answer. Any reply in flight is abandoned.
    pub fn delete_turn(&mut self, index: usize) -> Result<()> {
        let key = self.require_active()?;
        branching::delete_turn(&mut self.messages, index)?;
        self.generations.cancel(&key);
        self.failures.remove(&key);
        self.persist_messages()
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    pub fn to_markdown(&self) -> String {
        export::to_markdown(&self.messages)
    }

    pub fn export_markdown(&self, dir: &Path) -> Result<PathBuf> {
        self.require_active()?;
        export::export_markdown(&self.messages, dir)
    }
}
