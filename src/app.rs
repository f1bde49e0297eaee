use std::path::{Path, PathBuf};
use std::sync::Arc;

use ollama_chat_core::{
    drive_reply, encode_image, ChatError, ChatRole, ChatSession, Config, ModelClient, ModelInfo,
    PendingReply, StreamEvent, StreamEventKind,
};
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::tui::AppEvent;

/// How long a notification stays up, in ticks (300ms each)
const NOTIFICATION_TICKS: u8 = 12;
const TEMPERATURE_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Conversations,
    Chat,
    Input,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    SystemPrompt,
    Temperature,
    Model,
    Preset,
    Images,
}

impl SettingsField {
    pub const ALL: [SettingsField; 5] = [
        SettingsField::SystemPrompt,
        SettingsField::Temperature,
        SettingsField::Model,
        SettingsField::Preset,
        SettingsField::Images,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1).min(Self::ALL.len() - 1)]
    }

    pub fn prev(self) -> Self {
        Self::ALL[self.index().saturating_sub(1)]
    }
}

/// What a text prompt popup is collecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    RenameConversation(String),
    PresetName,
    ImagePath,
    SystemPrompt,
}

impl PromptKind {
    pub fn title(&self) -> &'static str {
        match self {
            PromptKind::RenameConversation(_) => " Rename Chat ",
            PromptKind::PresetName => " New Preset Name ",
            PromptKind::ImagePath => " Upload Image (file path) ",
            PromptKind::SystemPrompt => " System Prompt ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub text: String,
    pub level: NotificationLevel,
    ticks_left: u8,
}

/// Single-line text buffer with a character (not byte) cursor
#[derive(Debug, Clone, Default)]
pub struct TextInput {
    pub text: String,
    pub cursor: usize,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

impl TextInput {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            cursor: text.chars().count(),
        }
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.text, self.cursor);
        self.text.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.text.chars().count() {
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.text.chars().count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.text.chars().count();
    }

    /// Take the text out, leaving the buffer empty
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,
    pub session: ChatSession,

    // Background work
    client: Arc<dyn ModelClient>,
    events: UnboundedSender<AppEvent>,

    // Conversation sidebar
    pub conversation_state: ListState,

    // Chat pane
    pub message_cursor: Option<usize>,
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub input: TextInput,

    // Settings sidebar
    pub settings_field: SettingsField,
    pub image_cursor: usize,

    // Popups
    pub prompt: Option<PromptKind>,
    pub prompt_input: TextInput,
    pub show_model_picker: bool,
    pub model_picker_state: ListState,
    pub show_preset_picker: bool,
    pub preset_picker_state: ListState,
    pub notification: Option<Notification>,

    // Animation state
    pub animation_frame: u8,

    pub export_dir: PathBuf,

    // Panel areas for mouse hit-testing (updated during render)
    pub conversations_area: Option<Rect>,
    pub chat_area: Option<Rect>,
}

impl App {
    pub fn new(
        session: ChatSession,
        client: Arc<dyn ModelClient>,
        events: UnboundedSender<AppEvent>,
        export_dir: PathBuf,
    ) -> Self {
        let mut conversation_state = ListState::default();
        if !session.conversations().is_empty() {
            conversation_state.select(Some(0));
        }

        Self {
            should_quit: false,
            input_mode: InputMode::Normal,
            focus: FocusPane::Conversations,
            session,

            client,
            events,

            conversation_state,

            message_cursor: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            input: TextInput::default(),

            settings_field: SettingsField::SystemPrompt,
            image_cursor: 0,

            prompt: None,
            prompt_input: TextInput::default(),
            show_model_picker: false,
            model_picker_state: ListState::default(),
            show_preset_picker: false,
            preset_picker_state: ListState::default(),
            notification: None,

            animation_frame: 0,

            export_dir,

            conversations_area: None,
            chat_area: None,
        }
    }

    // Notifications
    pub fn notify(&mut self, text: impl Into<String>) {
        self.notification = Some(Notification {
            text: text.into(),
            level: NotificationLevel::Info,
            ticks_left: NOTIFICATION_TICKS,
        });
    }

    pub fn notify_error(&mut self, text: impl Into<String>) {
        self.notification = Some(Notification {
            text: text.into(),
            level: NotificationLevel::Error,
            ticks_left: NOTIFICATION_TICKS,
        });
    }

    /// Surface a core error: configuration mistakes become notifications,
    /// everything else is logged as well
    pub fn report(&mut self, err: ChatError) {
        if !err.is_user_facing() {
            error!(error = %err, "operation failed");
        }
        self.notify_error(err.to_string());
    }

    /// Tick animation frame and expire notifications (called by Tick event)
    pub fn tick(&mut self) {
        if self.session.is_generating() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        if let Some(notification) = &mut self.notification {
            notification.ticks_left = notification.ticks_left.saturating_sub(1);
            if notification.ticks_left == 0 {
                self.notification = None;
            }
        }
    }

    // Background tasks
    fn spawn_reply(&mut self, pending: PendingReply) {
        let client = Arc::clone(&self.client);
        let tx = self.events.clone();
        tokio::spawn(async move {
            drive_reply(client.as_ref(), pending, tx).await;
        });
        self.scroll_chat_to_bottom();
    }

    pub fn refresh_models(&self) {
        let client = Arc::clone(&self.client);
        let tx = self.events.clone();
        tokio::spawn(async move {
            match client.list_models().await {
                Ok(models) => {
                    let _ = tx.send(AppEvent::Models(models));
                }
                Err(e) => warn!(error = %e, "could not list models"),
            }
        });
    }

    /// Encode an image file in the background; failures only reach the log
    pub fn upload_image(&self, path: &Path) {
        let path = path.to_path_buf();
        let tx = self.events.clone();
        tokio::spawn(async move {
            match encode_image(&path).await {
                Ok(data_url) => {
                    let _ = tx.send(AppEvent::ImageLoaded(data_url));
                }
                Err(e) => error!(error = %e, "error processing file"),
            }
        });
    }

    pub fn on_models(&mut self, models: Vec<ModelInfo>) {
        info!(count = models.len(), "models listed");
        self.session.set_available_models(models);
        if self.show_model_picker {
            self.open_model_picker();
        }
    }

    pub fn on_image_loaded(&mut self, data_url: String) {
        let index = self.session.images_mut().push(data_url);
        self.image_cursor = index;
        self.notify(format!("Image {} uploaded", index + 1));
    }

    pub fn on_stream_event(&mut self, event: StreamEvent) {
        let for_active = self.session.active_key() == Some(event.conversation.as_str());
        match self.session.apply_stream_event(&event) {
            Ok(true) if for_active => {
                if matches!(event.kind, StreamEventKind::Failed(_)) {
                    self.notify_error("Reply failed - press t to retry");
                }
                self.scroll_chat_to_bottom();
            }
            Ok(_) => {}
            Err(e) => self.report(e),
        }
    }

    // Conversation sidebar
    pub fn conversations_nav_down(&mut self) {
        let len = self.session.conversations().len();
        if len > 0 {
            let i = self.conversation_state.selected().unwrap_or(0);
            self.conversation_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn conversations_nav_up(&mut self) {
        let i = self.conversation_state.selected().unwrap_or(0);
        self.conversation_state.select(Some(i.saturating_sub(1)));
    }

    fn selected_conversation_key(&self) -> Option<String> {
        self.conversation_state
            .selected()
            .and_then(|i| self.session.conversations().get(i))
            .map(|c| c.key.clone())
    }

    pub fn new_conversation(&mut self) {
        match self.session.create_conversation() {
            Ok(key) => {
                let index = self.session.conversations().len() - 1;
                self.conversation_state.select(Some(index));
                self.open_conversation(&key);
            }
            Err(e) => self.report(e),
        }
    }

    pub fn open_selected_conversation(&mut self) {
        if let Some(key) = self.selected_conversation_key() {
            self.open_conversation(&key);
        }
    }

    fn open_conversation(&mut self, key: &str) {
        match self.session.switch_conversation(key) {
            Ok(()) => {
                self.message_cursor = None;
                self.scroll_chat_to_bottom();
            }
            Err(e) => self.report(e),
        }
    }

    pub fn delete_selected_conversation(&mut self) {
        let Some(key) = self.selected_conversation_key() else {
            return;
        };
        if let Err(e) = self.session.delete_conversation(&key) {
            self.report(e);
            return;
        }
        let len = self.session.conversations().len();
        if len == 0 {
            self.conversation_state.select(None);
        } else if let Some(i) = self.conversation_state.selected() {
            self.conversation_state.select(Some(i.min(len - 1)));
        }
        if self.session.active_key().is_none() {
            self.message_cursor = None;
            self.chat_scroll = 0;
        }
    }

    pub fn begin_rename(&mut self) {
        if let Some(key) = self.selected_conversation_key() {
            let label = self
                .session
                .conversations()
                .iter()
                .find(|c| c.key == key)
                .map(|c| c.label.clone())
                .unwrap_or_default();
            self.open_prompt(PromptKind::RenameConversation(key), &label);
        }
    }

    // Chat pane
    pub fn send_input(&mut self) {
        if self.session.is_generating() {
            self.notify("Still answering the previous message");
            return;
        }
        if self.session.active_key().is_none() {
            self.notify("Select a chat to start");
            return;
        }
        let text = self.input.take();
        match self.session.send_message(&text) {
            Ok(Some(pending)) => {
                self.message_cursor = None;
                self.spawn_reply(pending);
            }
            Ok(None) => {}
            Err(e) => self.report(e),
        }
    }

    pub fn select_next_message(&mut self) {
        let len = self.session.messages().len();
        if len > 0 {
            let next = self.message_cursor.map(|i| (i + 1).min(len - 1)).unwrap_or(len - 1);
            self.message_cursor = Some(next);
        }
    }

    pub fn select_prev_message(&mut self) {
        let len = self.session.messages().len();
        if len > 0 {
            let prev = self.message_cursor.map(|i| i.saturating_sub(1)).unwrap_or(len - 1);
            self.message_cursor = Some(prev);
        }
    }

    /// The selected answer, or the last message when nothing is selected
    fn target_answer(&self) -> Option<usize> {
        let messages = self.session.messages();
        let index = self.message_cursor.or_else(|| messages.len().checked_sub(1))?;
        match messages.get(index)?.role {
            ChatRole::Assistant => Some(index),
            ChatRole::User if messages.get(index + 1).is_some_and(|m| m.is_assistant()) => {
                Some(index + 1)
            }
            _ => None,
        }
    }

    pub fn regenerate_selected(&mut self) {
        if self.session.is_generating() {
            self.notify("Still answering the previous message");
            return;
        }
        let Some(index) = self.target_answer() else {
            self.notify("Select an answer to regenerate");
            return;
        };
        match self.session.regenerate(index) {
            Ok(pending) => {
                self.message_cursor = Some(index);
                self.spawn_reply(pending);
            }
            Err(e) => self.report(e),
        }
    }

    pub fn next_answer(&mut self) {
        if let Some(index) = self.target_answer() {
            if let Err(e) = self.session.next_answer(index) {
                self.report(e);
            }
        }
    }

    pub fn previous_answer(&mut self) {
        if let Some(index) = self.target_answer() {
            if let Err(e) = self.session.previous_answer(index) {
                self.report(e);
            }
        }
    }

    pub fn delete_selected_turn(&mut self) {
        let Some(index) = self.message_cursor else {
            self.notify("Select a question to delete");
            return;
        };
        // Deleting from an answer removes the turn it belongs to
        let index = match self.session.messages().get(index).map(|m| m.role) {
            Some(ChatRole::Assistant) => index.saturating_sub(1),
            _ => index,
        };
        match self.session.delete_turn(index) {
            Ok(()) => {
                let len = self.session.messages().len();
                self.message_cursor = if len == 0 { None } else { Some(index.min(len - 1)) };
            }
            Err(e) => self.report(e),
        }
    }

    pub fn retry_failed(&mut self) {
        match self.session.retry_failed() {
            Ok(Some(pending)) => self.spawn_reply(pending),
            Ok(None) => self.notify("Nothing to retry"),
            Err(e) => self.report(e),
        }
    }

    pub fn export_conversation(&mut self) {
        match self.session.export_markdown(&self.export_dir) {
            Ok(path) => self.notify(format!("Exported to {}", path.display())),
            Err(e) => self.report(e),
        }
    }

    // Settings sidebar
    pub fn adjust_temperature(&mut self, steps: i8) {
        let current = self.session.settings().temperature;
        let target = ((current + TEMPERATURE_STEP * f32::from(steps)) * 10.0).round() / 10.0;
        if let Err(e) = self.session.set_temperature(target) {
            self.report(e);
        }
    }

    pub fn image_nav(&mut self, forward: bool) {
        let len = self.session.images().len();
        if len == 0 {
            return;
        }
        self.image_cursor = if forward {
            (self.image_cursor + 1).min(len - 1)
        } else {
            self.image_cursor.saturating_sub(1)
        };
    }

    pub fn toggle_image(&mut self) {
        let index = self.image_cursor;
        self.session.images_mut().toggle_selection(index);
    }

    pub fn clear_image_selection(&mut self) {
        self.session.images_mut().clear_selection();
    }

    pub fn remove_image(&mut self) {
        let index = self.image_cursor;
        if self.session.images_mut().remove(index).is_some() {
            let len = self.session.images().len();
            self.image_cursor = index.min(len.saturating_sub(1));
        }
    }

    pub fn delete_preset(&mut self) {
        match self.session.delete_preset() {
            Ok(name) => {
                self.notify(format!("Preset '{}' deleted", name));
                self.preset_picker_state.select(Some(0));
            }
            Err(e) => self.report(e),
        }
    }

    // Prompt popup
    pub fn open_prompt(&mut self, kind: PromptKind, initial: &str) {
        self.prompt = Some(kind);
        self.prompt_input = TextInput::with_text(initial);
    }

    pub fn cancel_prompt(&mut self) {
        self.prompt = None;
        self.prompt_input = TextInput::default();
    }

    pub fn submit_prompt(&mut self) {
        let Some(kind) = self.prompt.take() else {
            return;
        };
        let value = self.prompt_input.take();

        let result = match kind {
            PromptKind::RenameConversation(key) => self.session.rename_conversation(&key, &value),
            PromptKind::PresetName => self.session.add_preset(&value).map(|()| {
                self.notify(format!("Preset '{}' saved", value.trim()));
            }),
            PromptKind::SystemPrompt => self.session.set_system_prompt(&value),
            PromptKind::ImagePath => {
                let path = value.trim();
                if !path.is_empty() {
                    self.upload_image(Path::new(path));
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            self.report(e);
        }
    }

    // Model picker methods
    pub fn open_model_picker(&mut self) {
        let models = self.session.models();
        if models.is_empty() {
            self.notify("No models found. Pull one with: ollama pull llama3.2");
            self.show_model_picker = false;
            return;
        }
        let current_idx = models
            .iter()
            .position(|m| m.name == self.session.settings().model)
            .unwrap_or(0);
        self.model_picker_state.select(Some(current_idx));
        self.show_model_picker = true;
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.session.models().len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        let chosen = self
            .model_picker_state
            .selected()
            .and_then(|i| self.session.models().get(i))
            .map(|m| m.name.clone());
        if let Some(model) = chosen {
            self.show_model_picker = false;
            if let Err(e) = self.session.set_model(&model) {
                self.report(e);
                return;
            }
            // Remember the choice for new chats on the next launch
            if let Err(e) = Config::save_default_model(&model) {
                warn!(error = %e, "could not save default model");
            }
        }
    }

    // Preset picker methods
    pub fn open_preset_picker(&mut self) {
        let names = self.session.presets().names();
        let current_idx = self
            .session
            .presets()
            .selected()
            .and_then(|s| names.iter().position(|n| *n == s))
            .unwrap_or(0);
        self.preset_picker_state.select(Some(current_idx));
        self.show_preset_picker = true;
    }

    pub fn preset_picker_nav_down(&mut self) {
        let len = self.session.presets().presets().len();
        if len > 0 {
            let i = self.preset_picker_state.selected().unwrap_or(0);
            self.preset_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn preset_picker_nav_up(&mut self) {
        let i = self.preset_picker_state.selected().unwrap_or(0);
        self.preset_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_preset(&mut self) {
        let chosen = self
            .preset_picker_state
            .selected()
            .and_then(|i| self.session.presets().presets().get(i))
            .map(|p| p.name.clone());
        if let Some(name) = chosen {
            self.show_preset_picker = false;
            if let Err(e) = self.session.select_preset(&name) {
                self.report(e);
            }
        }
    }

    /// Scroll chat to bottom so the newest reply is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in self.session.messages() {
            total_lines = total_lines.saturating_add(1); // Role line
            for line in msg.content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 { 1 } else { char_count / wrap_width + 1 };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            if msg.content.is_empty() {
                total_lines = total_lines.saturating_add(1); // "Thinking..." line
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use ollama_chat_core::ai::FragmentStream;
    use ollama_chat_core::{AnswerSlot, ChatRequest, SessionStore, Settings};
    use tokio::sync::mpsc;

    /// Client for a server that is never there
    struct OfflineClient;

    #[async_trait]
    impl ModelClient for OfflineClient {
        async fn chat_stream(
            &self,
            _request: ChatRequest,
        ) -> ollama_chat_core::Result<FragmentStream> {
            Err(ChatError::Model("offline".to_string()))
        }

        async fn list_models(&self) -> ollama_chat_core::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    pub(crate) fn test_app() -> (App, mpsc::UnboundedReceiver<AppEvent>) {
        let session =
            ChatSession::open(SessionStore::in_memory(), Settings::new("llama3.2"), false).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let app = App::new(session, Arc::new(OfflineClient), tx, std::env::temp_dir());
        (app, rx)
    }

    #[test]
    fn test_text_input_is_utf8_safe() {
        let mut input = TextInput::default();
        for c in "héllo".chars() {
            input.insert(c);
        }
        input.left();
        input.left();
        input.left();
        input.backspace();
        assert_eq!(input.text, "hllo");
        input.home();
        input.delete();
        assert_eq!(input.text, "llo");
        input.end();
        input.insert('!');
        assert_eq!(input.take(), "llo!");
        assert_eq!(input.cursor, 0);
    }

    #[test]
    fn test_new_conversation_becomes_active() {
        let (mut app, _rx) = test_app();
        app.new_conversation();
        app.new_conversation();

        assert_eq!(app.conversation_state.selected(), Some(1));
        assert_eq!(
            app.session.active_key(),
            Some(app.session.conversations()[1].key.as_str())
        );
    }

    #[test]
    fn test_delete_selected_conversation_moves_selection() {
        let (mut app, _rx) = test_app();
        app.new_conversation();
        app.new_conversation();

        app.delete_selected_conversation();

        assert_eq!(app.session.conversations().len(), 1);
        assert_eq!(app.conversation_state.selected(), Some(0));
        assert!(app.session.active_key().is_none());
    }

    #[test]
    fn test_duplicate_preset_becomes_notification() {
        let (mut app, _rx) = test_app();
        app.open_prompt(PromptKind::PresetName, "Default");

        app.submit_prompt();

        let notification = app.notification.as_ref().unwrap();
        assert_eq!(notification.level, NotificationLevel::Error);
        assert!(notification.text.contains("already exists"));
        assert_eq!(app.session.presets().names(), vec!["Default"]);
    }

    #[test]
    fn test_deleting_default_preset_is_refused() {
        let (mut app, _rx) = test_app();
        app.open_preset_picker();
        app.select_preset();

        app.delete_preset();

        assert!(app.notification.as_ref().unwrap().text.contains("cannot be deleted"));
    }

    #[test]
    fn test_notification_expires() {
        let (mut app, _rx) = test_app();
        app.notify("hello");
        for _ in 0..NOTIFICATION_TICKS {
            app.tick();
        }
        assert!(app.notification.is_none());
    }

    #[test]
    fn test_temperature_steps_and_clamps() {
        let (mut app, _rx) = test_app();
        app.new_conversation();
        app.adjust_temperature(2);
        assert!((app.session.settings().temperature - 0.7).abs() < 1e-6);
        app.adjust_temperature(10);
        assert_eq!(app.session.settings().temperature, 1.0);
    }

    #[tokio::test]
    async fn test_send_and_stream_into_chat() {
        let (mut app, _rx) = test_app();
        app.new_conversation();
        for c in "Hi".chars() {
            app.input.insert(c);
        }

        app.send_input();

        assert_eq!(app.session.messages().len(), 2);
        assert!(app.input.text.is_empty());
        assert!(app.session.is_generating());

        let key = app.session.active_key().unwrap().to_string();
        app.on_stream_event(StreamEvent {
            conversation: key,
            generation: 1,
            slot: AnswerSlot { message: 1, answer: 0 },
            kind: StreamEventKind::Fragment("Hello!".into()),
        });
        assert_eq!(app.session.messages()[1].content, "Hello!");
    }

    fn stream_event(conversation: &str, generation: u64, kind: StreamEventKind) -> StreamEvent {
        StreamEvent {
            conversation: conversation.to_string(),
            generation,
            slot: AnswerSlot { message: 1, answer: 0 },
            kind,
        }
    }

    #[tokio::test]
    async fn test_failure_in_one_chat_does_not_follow_into_another() {
        let (mut app, _rx) = test_app();
        app.new_conversation();
        let first = app.session.active_key().unwrap().to_string();
        app.input = TextInput::with_text("Hi");
        app.send_input();
        app.on_stream_event(stream_event(&first, 1, StreamEventKind::Failed("refused".into())));
        assert_eq!(app.notification.as_ref().unwrap().level, NotificationLevel::Error);

        app.notification = None;
        app.new_conversation();
        let second = app.session.active_key().unwrap().to_string();
        app.input = TextInput::with_text("Hello?");
        app.send_input();
        app.on_stream_event(stream_event(&second, 1, StreamEventKind::Fragment("fine".into())));

        assert!(app.notification.is_none());
        assert!(app.session.failure().is_none());
        app.retry_failed();
        assert_eq!(app.notification.as_ref().unwrap().text, "Nothing to retry");

        app.conversation_state.select(Some(0));
        app.open_selected_conversation();
        app.retry_failed();
        assert!(app.session.is_generating());
        assert!(app.session.failure().is_none());
    }

    #[test]
    fn test_image_selection_from_sidebar() {
        let (mut app, _rx) = test_app();
        app.on_image_loaded("data:image/png;base64,AAA".to_string());
        app.on_image_loaded("data:image/png;base64,BBB".to_string());

        app.image_nav(false);
        app.toggle_image();

        assert_eq!(app.session.images().selected_payloads(), vec!["AAA"]);

        app.clear_image_selection();
        assert!(app.session.images().selected_payloads().is_empty());
        assert_eq!(app.session.images().len(), 2);
    }
}
