mod audio;
mod config;

use crate::audio::{CpalMicrophone, RodioSpeaker};
use crate::config::Config;
use alim_core::Notice;
use alim_core::api::HttpBackend;
use alim_core::conversation::{Message, Sender};
use alim_core::engine::{ChatEngine, MessageOrigin, Outcome};
use alim_core::identity::FileIdentityStore;
use alim_core::segment::{Inline, Line, classify_lines, segment};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(about = "Assistant conversationnel Alim", version)]
struct Cli {
    /// Base URL of the backend service; overrides ALIM_BACKEND_URL.
    #[arg(long)]
    backend_url: Option<String>,
}

const HELP_TEXT: &str = "\
Commandes :
  /new          démarrer une nouvelle conversation
  /sessions     lister les conversations connues
  /open N       ouvrir la conversation numéro N
  /voice        démarrer ou arrêter un enregistrement vocal
  /play N       lire ou arrêter le texte original du message N
  /stop         arrêter la lecture audio en cours
  /help         afficher cette aide
  /quit         quitter
Tout autre texte est envoyé comme message.";

type Engine = ChatEngine<HttpBackend, FileIdentityStore>;

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    let backend_url = args.backend_url.unwrap_or(config.backend_url);
    tracing::info!(backend_url, "starting the Alim client");

    // --- 4. Assemble the Engine ---
    let mut engine = ChatEngine::new(
        HttpBackend::new(backend_url),
        FileIdentityStore::in_user_config_dir(),
        Box::new(CpalMicrophone::new()),
        Box::new(RodioSpeaker::new()),
    );

    // --- 5. Resume or Start a Conversation ---
    engine.startup().await;
    let mut printed = 0;
    printed = render_new_messages(&engine, printed);
    println!("{HELP_TEXT}");

    // --- 6. Command Loop ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        engine.refresh_playback();
        engine.poll_capture();
        prompt(&engine).await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = dispatch(&mut engine, line).await {
            tracing::error!("command failed: {e:#}");
            println!("! {e:#}");
        }
        printed = match dispatch_kind(line) {
            // The transcript was replaced, not appended to.
            CommandKind::NewChat | CommandKind::Open => render_all(&engine),
            CommandKind::Other => render_new_messages(&engine, printed),
        };
    }

    engine.stop_playback();
    Ok(())
}

enum CommandKind {
    NewChat,
    Open,
    Other,
}

fn dispatch_kind(line: &str) -> CommandKind {
    if line == "/new" {
        CommandKind::NewChat
    } else if line.starts_with("/open") {
        CommandKind::Open
    } else {
        CommandKind::Other
    }
}

async fn dispatch(engine: &mut Engine, line: &str) -> Result<()> {
    match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest)) {
        ("/help", _) => println!("{HELP_TEXT}"),
        ("/new", _) => report(engine.start_new_chat().await),
        ("/sessions", _) => render_sessions(engine),
        ("/open", rest) => {
            let index: usize = rest.trim().parse().context("usage: /open N")?;
            let id = engine
                .sessions()
                .get(index)
                .map(|s| s.session_id.clone())
                .context("numéro de conversation inconnu")?;
            report(engine.select_session(id).await);
        }
        ("/voice", _) => {
            report(engine.toggle_voice_capture().await);
            if engine.capture_state() == alim_core::capture::CaptureState::Recording {
                println!("Enregistrement en cours. /voice pour arrêter.");
            }
        }
        ("/play", rest) => {
            let index: usize = rest.trim().parse().context("usage: /play N")?;
            report(engine.play_original(index).await?);
        }
        ("/stop", _) => engine.stop_playback(),
        _ => report(engine.send(line, MessageOrigin::Typed).await),
    }
    Ok(())
}

fn report(outcome: Outcome) {
    if let Outcome::Refused(notice) = outcome {
        print_notice(&notice);
    }
}

fn print_notice(notice: &Notice) {
    println!("! {notice}");
}

async fn prompt(engine: &Engine) -> Result<()> {
    let marker = if engine.capture_state() == alim_core::capture::CaptureState::Recording {
        "[rec] > "
    } else {
        "> "
    };
    let mut stdout = tokio::io::stdout();
    stdout.write_all(marker.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

fn render_sessions(engine: &Engine) {
    if engine.sessions().is_empty() {
        println!("Aucune conversation connue.");
        return;
    }
    for (index, session) in engine.sessions().iter().enumerate() {
        let timestamp = session.timestamp.as_deref().unwrap_or("");
        let preview = session.last_message_preview.as_deref().unwrap_or("");
        println!("  {index}. {timestamp}  {preview}");
    }
}

fn render_all(engine: &Engine) -> usize {
    render_from(engine, 0)
}

fn render_new_messages(engine: &Engine, printed: usize) -> usize {
    render_from(engine, printed)
}

fn render_from(engine: &Engine, from: usize) -> usize {
    for (index, message) in engine.transcript().iter().enumerate().skip(from) {
        render_message(index, message);
    }
    engine.transcript().len()
}

fn render_message(index: usize, message: &Message) {
    match message.sender {
        Sender::User => println!("[{index}] vous : {}", message.text),
        Sender::Assistant => {
            println!("[{index}] alim :");
            render_reply(index, &message.text);
        }
    }
}

/// Pretty-prints one assistant reply: the narrative answer line by line, then
/// the citations, then a hint when an original-language excerpt exists.
fn render_reply(index: usize, raw: &str) {
    let reply = segment(raw);
    for line in classify_lines(&reply.answer) {
        match line {
            Line::Blank => println!(),
            Line::NumberedRow {
                number,
                title,
                description,
            } => println!("  {number}. {title} : {description}"),
            Line::BulletRow { title, description } => println!("  - {title} : {description}"),
            Line::Text(spans) => println!("  {}", flatten_spans(&spans)),
        }
    }
    if let Some(sources) = &reply.sources {
        println!("  Sources :");
        for source in sources {
            println!("    - {source}");
        }
    }
    if reply.original.is_some() {
        println!("  (texte original disponible : /play {index})");
    }
}

fn flatten_spans(spans: &[Inline]) -> String {
    spans
        .iter()
        .map(|span| match span {
            Inline::Text(text) => text.as_str(),
            Inline::Bold(text) => text.as_str(),
        })
        .collect()
}
