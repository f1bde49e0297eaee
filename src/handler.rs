use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, FocusPane, InputMode, PromptKind, SettingsField};
use crate::tui::AppEvent;

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize => {}
        AppEvent::Tick => app.tick(),
        AppEvent::Stream(event) => app.on_stream_event(event),
        AppEvent::ImageLoaded(data_url) => app.on_image_loaded(data_url),
        AppEvent::Models(models) => app.on_models(models),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    // Popups take all input while open
    if app.prompt.is_some() {
        handle_prompt(app, key);
        return;
    }
    if app.show_model_picker {
        handle_model_picker(app, key);
        return;
    }
    if app.show_preset_picker {
        handle_preset_picker(app, key);
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    // Keys shared by every pane
    let control = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        _ if control => {}
        KeyCode::Char('q') => {
            app.should_quit = true;
            return;
        }
        KeyCode::Tab => {
            app.focus = next_focus(app.focus);
            return;
        }
        KeyCode::BackTab => {
            app.focus = prev_focus(app.focus);
            return;
        }
        KeyCode::Char('i') => {
            app.focus = FocusPane::Input;
            app.input_mode = InputMode::Editing;
            return;
        }
        KeyCode::Char('n') => {
            app.new_conversation();
            return;
        }
        KeyCode::Char('M') => {
            app.refresh_models();
            app.open_model_picker();
            return;
        }
        KeyCode::Char('P') => {
            app.open_preset_picker();
            return;
        }
        KeyCode::Char('u') => {
            app.open_prompt(PromptKind::ImagePath, "");
            return;
        }
        KeyCode::Char('e') => {
            app.export_conversation();
            return;
        }
        _ => {}
    }

    match app.focus {
        FocusPane::Chat => handle_chat(app, key),
        // Only the chat pane has Ctrl bindings
        _ if control => {}
        FocusPane::Conversations => handle_conversations(app, key),
        FocusPane::Input => {
            if key.code == KeyCode::Enter {
                app.input_mode = InputMode::Editing;
            }
        }
        FocusPane::Settings => handle_settings(app, key),
    }
}

fn handle_conversations(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.conversations_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.conversations_nav_up(),
        KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => {
            app.open_selected_conversation();
            app.focus = FocusPane::Input;
            app.input_mode = InputMode::Editing;
        }
        KeyCode::Char('d') | KeyCode::Delete => app.delete_selected_conversation(),
        KeyCode::Char('r') => app.begin_rename(),
        _ => {}
    }
}

fn handle_chat(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.chat_scroll = app.chat_scroll.saturating_add(app.chat_height / 2);
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.chat_scroll = app.chat_scroll.saturating_sub(app.chat_height / 2);
        }
        KeyCode::Char('j') | KeyCode::Down => app.select_next_message(),
        KeyCode::Char('k') | KeyCode::Up => app.select_prev_message(),
        KeyCode::Char('G') => {
            app.message_cursor = None;
            app.scroll_chat_to_bottom();
        }
        KeyCode::Char('r') => app.regenerate_selected(),
        KeyCode::Char(']') | KeyCode::Char('l') | KeyCode::Right => app.next_answer(),
        KeyCode::Char('[') | KeyCode::Char('h') | KeyCode::Left => app.previous_answer(),
        KeyCode::Char('d') | KeyCode::Delete => app.delete_selected_turn(),
        KeyCode::Char('t') => app.retry_failed(),
        KeyCode::Esc => app.message_cursor = None,
        _ => {}
    }
}

fn handle_settings(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.settings_field = app.settings_field.next(),
        KeyCode::Char('k') | KeyCode::Up => app.settings_field = app.settings_field.prev(),
        _ => match app.settings_field {
            SettingsField::SystemPrompt => {
                if key.code == KeyCode::Enter {
                    let current = app.session.settings().system_prompt.clone();
                    app.open_prompt(PromptKind::SystemPrompt, &current);
                }
            }
            SettingsField::Temperature => match key.code {
                KeyCode::Char('+') | KeyCode::Char('l') | KeyCode::Right => app.adjust_temperature(1),
                KeyCode::Char('-') | KeyCode::Char('h') | KeyCode::Left => app.adjust_temperature(-1),
                _ => {}
            },
            SettingsField::Model => {
                if key.code == KeyCode::Enter {
                    app.refresh_models();
                    app.open_model_picker();
                }
            }
            SettingsField::Preset => match key.code {
                KeyCode::Enter => app.open_preset_picker(),
                KeyCode::Char('a') => app.open_prompt(PromptKind::PresetName, ""),
                KeyCode::Char('d') => app.delete_preset(),
                _ => {}
            },
            SettingsField::Images => match key.code {
                KeyCode::Char('l') | KeyCode::Right => app.image_nav(true),
                KeyCode::Char('h') | KeyCode::Left => app.image_nav(false),
                KeyCode::Char(' ') | KeyCode::Enter => app.toggle_image(),
                KeyCode::Char('x') | KeyCode::Delete => app.remove_image(),
                KeyCode::Char('c') => app.clear_image_selection(),
                _ => {}
            },
        },
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Enter => app.send_input(),
        KeyCode::Backspace => app.input.backspace(),
        KeyCode::Delete => app.input.delete(),
        KeyCode::Left => app.input.left(),
        KeyCode::Right => app.input.right(),
        KeyCode::Home => app.input.home(),
        KeyCode::End => app.input.end(),
        KeyCode::Char(c) => app.input.insert(c),
        _ => {}
    }
}

fn handle_prompt(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.cancel_prompt(),
        KeyCode::Enter => app.submit_prompt(),
        KeyCode::Backspace => app.prompt_input.backspace(),
        KeyCode::Delete => app.prompt_input.delete(),
        KeyCode::Left => app.prompt_input.left(),
        KeyCode::Right => app.prompt_input.right(),
        KeyCode::Home => app.prompt_input.home(),
        KeyCode::End => app.prompt_input.end(),
        KeyCode::Char(c) => app.prompt_input.insert(c),
        _ => {}
    }
}

fn handle_model_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => app.show_model_picker = false,
        KeyCode::Char('j') | KeyCode::Down => app.model_picker_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.model_picker_nav_up(),
        KeyCode::Enter => app.select_model(),
        _ => {}
    }
}

fn handle_preset_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => app.show_preset_picker = false,
        KeyCode::Char('j') | KeyCode::Down => app.preset_picker_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.preset_picker_nav_up(),
        KeyCode::Enter => app.select_preset(),
        KeyCode::Char('a') => {
            app.show_preset_picker = false;
            app.open_prompt(PromptKind::PresetName, "");
        }
        KeyCode::Char('d') => app.delete_preset(),
        _ => {}
    }
}

fn next_focus(focus: FocusPane) -> FocusPane {
    match focus {
        FocusPane::Conversations => FocusPane::Chat,
        FocusPane::Chat => FocusPane::Input,
        FocusPane::Input => FocusPane::Settings,
        FocusPane::Settings => FocusPane::Conversations,
    }
}

fn prev_focus(focus: FocusPane) -> FocusPane {
    match focus {
        FocusPane::Conversations => FocusPane::Settings,
        FocusPane::Chat => FocusPane::Conversations,
        FocusPane::Input => FocusPane::Chat,
        FocusPane::Settings => FocusPane::Input,
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    // Determine which area the mouse is in (position-based scrolling)
    let in_conversations = app
        .conversations_area
        .map(|r| point_in_rect(x, y, r))
        .unwrap_or(false);
    let in_chat = app.chat_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_chat {
                app.chat_scroll = app.chat_scroll.saturating_add(3);
            } else if in_conversations {
                app.conversations_nav_down();
            }
        }
        MouseEventKind::ScrollUp => {
            if in_chat {
                app.chat_scroll = app.chat_scroll.saturating_sub(3);
            } else if in_conversations {
                app.conversations_nav_up();
            }
        }
        _ => {}
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::test_app;
    use crossterm::event::{KeyEventKind, KeyEventState};

    fn press(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            handle_event(app, press(KeyCode::Char(c)));
        }
    }

    #[test]
    fn test_ctrl_c_quits_from_popup() {
        let (mut app, _rx) = test_app();
        app.open_prompt(PromptKind::ImagePath, "");
        handle_event(
            &mut app,
            AppEvent::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
        );
        assert!(app.should_quit);
    }

    #[test]
    fn test_tab_cycles_focus() {
        let (mut app, _rx) = test_app();
        for expected in [
            FocusPane::Chat,
            FocusPane::Input,
            FocusPane::Settings,
            FocusPane::Conversations,
        ] {
            handle_event(&mut app, press(KeyCode::Tab));
            assert_eq!(app.focus, expected);
        }
    }

    #[test]
    fn test_rename_through_prompt() {
        let (mut app, _rx) = test_app();
        handle_event(&mut app, press(KeyCode::Char('n')));
        app.focus = FocusPane::Conversations;
        app.input_mode = InputMode::Normal;

        handle_event(&mut app, press(KeyCode::Char('r')));
        for _ in 0.."New Chat".len() {
            handle_event(&mut app, press(KeyCode::Backspace));
        }
        type_text(&mut app, "Rust questions");
        handle_event(&mut app, press(KeyCode::Enter));

        assert!(app.prompt.is_none());
        assert_eq!(app.session.conversations()[0].label, "Rust questions");
    }

    #[test]
    fn test_add_preset_from_settings() {
        let (mut app, _rx) = test_app();
        app.focus = FocusPane::Settings;
        app.settings_field = SettingsField::Preset;

        handle_event(&mut app, press(KeyCode::Char('a')));
        type_text(&mut app, "Creative");
        handle_event(&mut app, press(KeyCode::Enter));

        assert_eq!(app.session.presets().names(), vec!["Default", "Creative"]);
        assert_eq!(app.session.presets().selected(), Some("Creative"));
    }

    #[test]
    fn test_editing_mode_escape_keeps_draft() {
        let (mut app, _rx) = test_app();
        handle_event(&mut app, press(KeyCode::Char('i')));
        assert_eq!(app.input_mode, InputMode::Editing);

        type_text(&mut app, "draft q");
        handle_event(&mut app, press(KeyCode::Esc));

        assert_eq!(app.input_mode, InputMode::Normal);
        assert_eq!(app.input.text, "draft q");
        assert!(!app.should_quit);
    }

    #[test]
    fn test_ctrl_keys_do_not_delete_outside_chat() {
        let (mut app, _rx) = test_app();
        app.new_conversation();
        app.focus = FocusPane::Conversations;
        let ctrl_d = || AppEvent::Key(KeyEvent::new(KeyCode::Char('d'), KeyModifiers::CONTROL));

        handle_event(&mut app, ctrl_d());
        assert_eq!(app.session.conversations().len(), 1);

        app.open_prompt(PromptKind::PresetName, "Creative");
        app.submit_prompt();
        app.focus = FocusPane::Settings;
        app.settings_field = SettingsField::Preset;
        handle_event(&mut app, ctrl_d());
        assert_eq!(app.session.presets().names(), vec!["Default", "Creative"]);

        handle_event(&mut app, press(KeyCode::Char('d')));
        assert_eq!(app.session.presets().names(), vec!["Default"]);
    }

    #[test]
    fn test_point_in_rect() {
        let rect = Rect::new(2, 2, 4, 4);
        assert!(point_in_rect(2, 2, rect));
        assert!(point_in_rect(5, 5, rect));
        assert!(!point_in_rect(6, 2, rect));
        assert!(!point_in_rect(1, 3, rect));
    }
}
