use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use ollama_chat_core::{ChatRole, ImageAttachments};
use crate::app::{App, FocusPane, InputMode, NotificationLevel, SettingsField};

const SIDEBAR_WIDTH: u16 = 24;
const SETTINGS_WIDTH: u16 = 34;

/// Parse a line of text and convert **bold** and `code` markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                // Consume the second *
                chars.next();

                // Find closing **
                let mut bold_text = String::new();
                let mut found_close = false;
                while let Some(c) = chars.next() {
                    if c == '*' && chars.peek() == Some(&'*') {
                        chars.next();
                        found_close = true;
                        break;
                    }
                    bold_text.push(c);
                }

                if found_close && !bold_text.is_empty() {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(
                        bold_text,
                        Style::default().add_modifier(Modifier::BOLD),
                    ));
                } else {
                    // No closing **, treat as literal
                    current_text.push_str("**");
                    current_text.push_str(&bold_text);
                }
            }
            '`' => {
                let mut code = String::new();
                let mut found_close = false;
                for c in chars.by_ref() {
                    if c == '`' {
                        found_close = true;
                        break;
                    }
                    code.push(c);
                }

                if found_close && !code.is_empty() {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(code, Style::default().fg(Color::Yellow)));
                } else {
                    current_text.push('`');
                    current_text.push_str(&code);
                    if found_close {
                        current_text.push('`');
                    }
                }
            }
            _ => current_text.push(c),
        }
    }

    // Push any remaining text
    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// Render a markdown answer: headings, fenced code blocks, then inline styles
fn markdown_lines(content: &str) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut in_fence = false;

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            lines.push(Line::from(Span::styled(
                line.to_string(),
                Style::default().fg(Color::DarkGray),
            )));
        } else if in_fence {
            lines.push(Line::from(Span::styled(
                line.to_string(),
                Style::default().fg(Color::Green),
            )));
        } else if line.starts_with('#') {
            let heading = line.trim_start_matches('#').trim_start();
            lines.push(Line::from(Span::styled(
                heading.to_string(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )));
        } else {
            lines.push(parse_markdown_line(line));
        }
    }

    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let [conversations_area, chat_column, settings_area] = Layout::horizontal([
        Constraint::Length(SIDEBAR_WIDTH),
        Constraint::Min(0),
        Constraint::Length(SETTINGS_WIDTH),
    ])
    .areas(body_area);

    let [chat_area, input_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(3)]).areas(chat_column);

    render_conversations(app, frame, conversations_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_settings(app, frame, settings_area);
    render_footer(app, frame, footer_area);

    // Render popups (in order of priority)
    if app.prompt.is_some() {
        render_prompt(app, frame, area);
    } else if app.show_model_picker {
        render_model_picker(app, frame, area);
    } else if app.show_preset_picker {
        render_preset_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let label = app
        .session
        .active_conversation()
        .map(|c| format!(" {} ", c.label))
        .unwrap_or_default();

    let title = Line::from(vec![
        Span::styled(" Ollama Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(label, Style::default().fg(Color::White)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn border_color(focused: bool) -> Color {
    if focused {
        Color::Cyan
    } else {
        Color::DarkGray
    }
}

fn render_conversations(app: &mut App, frame: &mut Frame, area: Rect) {
    app.conversations_area = Some(area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color(app.focus == FocusPane::Conversations)))
        .title(" Chats ");

    let active = app.session.active_key().map(str::to_string);
    let items: Vec<ListItem> = app
        .session
        .conversations()
        .iter()
        .map(|c| {
            let style = if active.as_deref() == Some(c.key.as_str()) {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", c.label)).style(style)
        })
        .collect();

    if items.is_empty() {
        let hint = Paragraph::new(Span::styled(
            "Press n for a new chat",
            Style::default().fg(Color::DarkGray),
        ))
        .wrap(Wrap { trim: true })
        .block(block);
        frame.render_widget(hint, area);
        return;
    }

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.conversation_state);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store areas for mouse hit-testing and scroll calculations (inner size minus borders)
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color(app.focus == FocusPane::Chat)))
        .title(format!(" {} ", app.session.settings().model));

    let chat_text = if app.session.active_key().is_none() {
        Text::from(Span::styled(
            "Select or create a chat to start",
            Style::default().fg(Color::DarkGray),
        ))
    } else if app.session.messages().is_empty() {
        Text::from(Span::styled(
            "Ask anything...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(chat_lines(app))
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn chat_lines(app: &App) -> Vec<Line<'static>> {
    let session = &app.session;
    let generating = session.is_generating();
    let active = session.active_key();
    let failure = session.failure().filter(|f| Some(f.conversation.as_str()) == active);
    let last = session.messages().len().saturating_sub(1);
    let mut lines: Vec<Line> = Vec::new();

    for (i, msg) in session.messages().iter().enumerate() {
        let marker = if app.message_cursor == Some(i) { "▶ " } else { "" };

        match msg.role {
            ChatRole::User => {
                let mut header = vec![Span::styled(
                    format!("{}You:", marker),
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )];
                if !msg.images.is_empty() {
                    header.push(Span::styled(
                        format!(" [{} image(s)]", msg.images.len()),
                        Style::default().fg(Color::Magenta),
                    ));
                }
                lines.push(Line::from(header));
                for line in msg.content.lines() {
                    lines.push(Line::from(line.to_string()));
                }
            }
            ChatRole::Assistant => {
                let mut header = vec![Span::styled(
                    format!("{}AI:", marker),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )];
                if msg.sibling_count() > 1 {
                    let prev = if session.can_go_previous(i) { "<" } else { " " };
                    let next = if session.can_go_next(i) { ">" } else { " " };
                    header.push(Span::styled(
                        format!(" {}{}/{}{}", prev, msg.selected + 1, msg.sibling_count(), next),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
                lines.push(Line::from(header));

                if msg.content.is_empty() && generating && i == last {
                    // Animated ellipsis: cycles through ".", "..", "..."
                    let dots = ".".repeat((app.animation_frame as usize) + 1);
                    lines.push(Line::from(Span::styled(
                        format!("Thinking{}", dots),
                        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                    )));
                } else {
                    lines.extend(markdown_lines(&msg.content));
                }

                if let Some(failure) = failure.filter(|f| f.slot.message == i) {
                    lines.push(Line::from(Span::styled(
                        format!("Reply failed: {} (t to retry)", failure.reason),
                        Style::default().fg(Color::Red),
                    )));
                }
            }
            ChatRole::System => continue,
        }
        lines.push(Line::default());
    }

    lines
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let input_border_color = if app.focus == FocusPane::Input || editing {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let attached = app.session.images().selected_count();
    let title = if attached > 0 {
        format!(" Message ({} image(s) attached) ", attached)
    } else {
        " Message (i to type) ".to_string()
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(input_border_color))
        .title(title);

    // Calculate visible portion of input with horizontal scrolling
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input.cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .input
        .text
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    // Show cursor when editing
    if editing && app.prompt.is_none() {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

/// Mime type and approximate decoded size of a data URL
fn describe_image(data_url: &str) -> String {
    let mime = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .unwrap_or("image");
    let encoded = data_url.split_once(',').map(|(_, b)| b.len()).unwrap_or(0);
    format!("{} {}KB", mime, (encoded * 3 / 4).div_ceil(1024))
}

fn image_lines(images: &ImageAttachments, cursor: Option<usize>) -> Vec<Line<'static>> {
    if images.is_empty() {
        return vec![Line::from(Span::styled(
            "  none (u to upload)",
            Style::default().fg(Color::DarkGray),
        ))];
    }

    images
        .uploaded()
        .iter()
        .enumerate()
        .map(|(i, data_url)| {
            let mark = if images.is_selected(i) { "[x]" } else { "[ ]" };
            let style = if cursor == Some(i) {
                Style::default().bg(Color::Blue).fg(Color::White)
            } else {
                Style::default()
            };
            Line::from(Span::styled(
                format!(" {} {}. {}", mark, i + 1, describe_image(data_url)),
                style,
            ))
        })
        .collect()
}

fn render_settings(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Settings;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color(focused)))
        .title(" Settings ");

    let label = |field: SettingsField, text: &str| {
        let style = if focused && app.settings_field == field {
            Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        };
        Line::from(Span::styled(text.to_string(), style))
    };

    let settings = app.session.settings();
    let value_style = Style::default().fg(Color::White);
    let mut lines = vec![
        label(SettingsField::SystemPrompt, "System Prompt"),
        Line::from(Span::styled(settings.system_prompt.clone(), value_style)),
        Line::default(),
        label(SettingsField::Temperature, "Temperature"),
        Line::from(vec![
            Span::styled(format!("{:.1}", settings.temperature), value_style),
            Span::styled("  (-/+)", Style::default().fg(Color::DarkGray)),
        ]),
        Line::default(),
        label(SettingsField::Model, "Model"),
        Line::from(Span::styled(settings.model.clone(), value_style)),
        Line::default(),
        label(SettingsField::Preset, "Preset"),
        Line::from(Span::styled(
            app.session.presets().selected().unwrap_or("(none)").to_string(),
            value_style,
        )),
        Line::default(),
        label(SettingsField::Images, "Images"),
    ];

    let image_cursor = (focused && app.settings_field == SettingsField::Images).then_some(app.image_cursor);
    lines.extend(image_lines(app.session.images(), image_cursor));

    let paragraph = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    if let Some(notification) = &app.notification {
        let style = match notification.level {
            NotificationLevel::Info => Style::default().bg(Color::Green).fg(Color::Black),
            NotificationLevel::Error => Style::default().bg(Color::Red).fg(Color::White),
        };
        let line = Paragraph::new(format!(" {} ", notification.text)).style(style);
        frame.render_widget(line, area);
        return;
    }

    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);
    let hint = |key: &'static str, label: &'static str| {
        [
            Span::styled(format!(" {} ", key), key_style),
            Span::styled(format!(" {} ", label), label_style),
        ]
    };

    let pairs: Vec<(&str, &str)> = match (app.input_mode, app.focus) {
        (InputMode::Editing, _) => vec![("Enter", "send"), ("Esc", "normal")],
        (_, FocusPane::Conversations) => vec![
            ("j/k", "nav"),
            ("Enter", "open"),
            ("n", "new"),
            ("r", "rename"),
            ("d", "delete"),
        ],
        (_, FocusPane::Chat) => vec![
            ("j/k", "message"),
            ("r", "regenerate"),
            ("h/l", "answers"),
            ("d", "delete"),
            ("t", "retry"),
            ("e", "export"),
        ],
        (_, FocusPane::Input) => vec![("i", "type")],
        (_, FocusPane::Settings) => match app.settings_field {
            SettingsField::SystemPrompt => vec![("j/k", "field"), ("Enter", "edit")],
            SettingsField::Temperature => vec![("j/k", "field"), ("-/+", "adjust")],
            SettingsField::Model => vec![("j/k", "field"), ("Enter", "choose")],
            SettingsField::Preset => vec![
                ("j/k", "field"),
                ("Enter", "choose"),
                ("a", "save as"),
                ("d", "delete"),
            ],
            SettingsField::Images => vec![
                ("h/l", "image"),
                ("Space", "attach"),
                ("x", "remove"),
                ("c", "clear"),
                ("u", "upload"),
            ],
        },
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in pairs {
        spans.extend(hint(key, label));
    }
    if app.input_mode == InputMode::Normal {
        spans.extend(hint("Tab", "focus"));
        spans.extend(hint("q", "quit"));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Centered popup rectangle clamped to the frame
fn popup_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    let x = area.width.saturating_sub(width) / 2;
    let y = area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width, height)
}

fn render_prompt(app: &App, frame: &mut Frame, area: Rect) {
    let Some(kind) = &app.prompt else {
        return;
    };

    let popup_area = popup_rect(area, 60, 3);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(kind.title());

    let inner_width = popup_area.width.saturating_sub(2) as usize;
    let cursor_pos = app.prompt_input.cursor;
    let scroll_offset = if inner_width > 0 && cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };
    let visible_text: String = app
        .prompt_input
        .text
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    frame.render_widget(Paragraph::new(visible_text).block(block), popup_area);

    let cursor_x = (cursor_pos - scroll_offset) as u16;
    frame.set_cursor_position((popup_area.x + cursor_x + 1, popup_area.y + 1));
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let models = app.session.models();
    let popup_area = popup_rect(area, 44, models.len() as u16 + 2);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model (Enter to select, Esc to cancel) ");

    let current = &app.session.settings().model;
    let items: Vec<ListItem> = models
        .iter()
        .map(|model| {
            let style = if &model.name == current {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let gigabytes = model.size as f64 / 1_000_000_000.0;
            ListItem::new(format!(" {} ({:.1} GB) ", model.name, gigabytes)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

fn render_preset_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let presets = app.session.presets();
    let popup_area = popup_rect(area, 44, presets.presets().len() as u16 + 2);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Presets (Enter apply, a add, d delete) ");

    let selected = presets.selected();
    let items: Vec<ListItem> = presets
        .presets()
        .iter()
        .map(|preset| {
            let style = if Some(preset.name.as_str()) == selected {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", preset.name)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.preset_picker_state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::test_app;
    use ratatui::{backend::TestBackend, Terminal};

    fn screen_text(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_bold_and_code_spans() {
        let line = parse_markdown_line("use **cargo** and `rustc` here");
        let texts: Vec<&str> = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(texts, vec!["use ", "cargo", " and ", "rustc", " here"]);
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line.spans[3].style.fg, Some(Color::Yellow));
    }

    #[test]
    fn test_unclosed_markers_are_literal() {
        let line = parse_markdown_line("a **b and `c");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "a **b and `c");
    }

    #[test]
    fn test_fenced_code_is_not_parsed() {
        let lines = markdown_lines("# Title\n```\nlet **x** = 1;\n```");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].spans[0].content, "Title");
        assert_eq!(lines[2].spans[0].content, "let **x** = 1;");
        assert_eq!(lines[2].spans[0].style.fg, Some(Color::Green));
    }

    #[test]
    fn test_describe_image() {
        assert_eq!(describe_image("data:image/png;base64,AAAA"), "image/png 1KB");
    }

    #[test]
    fn test_render_shows_chats_and_settings() {
        let (mut app, _rx) = test_app();
        app.new_conversation();

        let text = screen_text(&mut app);

        assert!(text.contains("New Chat"));
        assert!(text.contains("You are a helpful assistant."));
        assert!(text.contains("0.5"));
        assert!(text.contains("(none)"));
        assert!(text.contains("llama3.2"));
        assert_eq!(app.chat_height, 30 - 2 - 3 - 2);
    }

    #[tokio::test]
    async fn test_failed_reply_only_shows_in_its_chat() {
        use ollama_chat_core::{AnswerSlot, StreamEvent, StreamEventKind};

        let (mut app, _rx) = test_app();
        app.new_conversation();
        let first = app.session.active_key().unwrap().to_string();
        app.input = crate::app::TextInput::with_text("Hi");
        app.send_input();
        app.on_stream_event(StreamEvent {
            conversation: first,
            generation: 1,
            slot: AnswerSlot { message: 1, answer: 0 },
            kind: StreamEventKind::Failed("refused".into()),
        });
        assert!(screen_text(&mut app).contains("Reply failed: refused"));

        app.new_conversation();
        app.input = crate::app::TextInput::with_text("Hello?");
        app.send_input();
        app.notification = None;

        assert!(!screen_text(&mut app).contains("Reply failed"));
    }

    #[test]
    fn test_render_marks_selected_images() {
        let (mut app, _rx) = test_app();
        app.on_image_loaded("data:image/png;base64,AAAA".to_string());
        app.on_image_loaded("data:image/jpeg;base64,BBBB".to_string());
        app.session.images_mut().toggle_selection(1);
        app.notification = None;

        let text = screen_text(&mut app);

        assert!(text.contains("[ ] 1. image/png"));
        assert!(text.contains("[x] 2. image/jpeg"));
    }
}
