use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use ollama_chat_core::{
    ChatSession, Config, FileStore, ModelClient, OllamaClient, SessionStore,
};
use tracing::info;

mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;

#[derive(Parser)]
#[command(name = "ollama-chat")]
#[command(version, about = "Chat with local Ollama models in the terminal")]
struct Cli {
    /// Ollama server URL (defaults to OLLAMA_HOST, then the config file)
    #[arg(long)]
    host: Option<String>,

    /// Model new chats start with
    #[arg(short, long)]
    model: Option<String>,

    /// Keep nothing on disk for this run
    #[arg(long, conflicts_with = "keep_history")]
    ephemeral: bool,

    /// Reload chats from the previous run instead of starting fresh
    #[arg(long, env = "OLLAMA_CHAT_KEEP_HISTORY")]
    keep_history: bool,

    /// Directory chats are exported to (defaults to the current directory)
    #[arg(long)]
    export_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    let _log_guard = logging::init(config.log_level.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "ollama-chat starting");

    let mut defaults = config.defaults();
    if let Some(model) = cli.model {
        defaults.model = model;
    }

    let store = if cli.ephemeral {
        SessionStore::in_memory()
    } else {
        let path = FileStore::default_path()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        let file = FileStore::open(path)?;
        info!(path = %file.path().display(), "session file");
        SessionStore::new(Box::new(file))
    };
    let keep_history = cli.keep_history || config.keep_history;
    let session = ChatSession::open(store, defaults, keep_history)?;

    let ollama = OllamaClient::new(&config.base_url(cli.host.as_deref()));
    info!(base_url = ollama.base_url(), "using Ollama server");
    let client: Arc<dyn ModelClient> = Arc::new(ollama);

    let export_dir = match cli.export_dir.or(config.export_dir) {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let mut app = App::new(session, client, events.sender(), export_dir);
    app.refresh_models();

    let result = run(&mut terminal, &mut events, &mut app).await;

    tui::restore()?;
    info!("ollama-chat exiting");
    result
}

async fn run(terminal: &mut tui::Tui, events: &mut tui::EventHandler, app: &mut App) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}
