//! Console front end for the Annapoorna client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (defaults on first run).
//! 3. Build the HTTP backend and the cpal microphone.
//! 4. Load the user's threads, or open a fresh session when there are none.
//! 5. Read commands from stdin while applying backend completions as they
//!    arrive.
//!
//! The user id is taken from the first argument, falling back to
//! `session.user_id` in the settings file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, BufReader};

use annapoorna_client::{
    audio::{AudioSource, CpalMicrophone},
    backend::{Backend, HttpBackend},
    capture::{ImageState, SelectedFile},
    config::AppConfig,
    session::{
        Event, Message, Origin, SessionController, SessionState, ThreadId, ThreadSummary, UserId,
    },
};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Threads,
    Reload,
    Switch(ThreadId),
    New,
    Image(PathBuf),
    Record,
    Stop,
    Cancel,
    Status,
    /// Send whatever is in the buffer (e.g. a transcript).
    SendBuffer,
    /// Replace the buffer text with this line and send.
    Send(String),
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match head {
        "/threads" => Command::Threads,
        "/reload" => Command::Reload,
        "/switch" if !rest.is_empty() => Command::Switch(ThreadId::from(rest)),
        "/new" => Command::New,
        "/image" if !rest.is_empty() => Command::Image(PathBuf::from(rest)),
        "/rec" => Command::Record,
        "/stop" => Command::Stop,
        "/cancel" => Command::Cancel,
        "/status" => Command::Status,
        "/send" => Command::SendBuffer,
        "/quit" | "/exit" => Command::Quit,
        "/help" | "/switch" | "/image" => Command::Help,
        _ => Command::Send(line.to_string()),
    };
    Some(command)
}

const HELP: &str = "\
commands:
  /threads        list threads
  /reload         fetch the thread list again
  /switch <id>    show a thread
  /new            start a new session
  /image <path>   attach an image
  /rec /stop      record a voice message (/cancel discards it)
  /send           send the buffer as it is
  /status         show the session state
  /quit           leave
anything else is sent as a message";

async fn run_command(controller: &mut SessionController, command: Command, user: Option<&UserId>) {
    let result = match command {
        Command::Threads => {
            print_threads(&controller.state().summaries());
            Ok(())
        }
        Command::Reload => match user {
            Some(user) => controller
                .load_roster(user)
                .await
                .map(|threads| print_threads(&threads)),
            None => {
                println!("! no user id configured");
                Ok(())
            }
        },
        Command::Switch(id) => controller.switch_thread(&id),
        Command::New => {
            controller.start_new_session(user);
            Ok(())
        }
        Command::Image(path) => match SelectedFile::from_path(&path) {
            Ok(file) => controller.select_file(Some(file)),
            Err(e) => {
                println!("! cannot read {}: {e}", path.display());
                Ok(())
            }
        },
        Command::Record => controller
            .begin_capture()
            .await
            .map(|()| println!("(recording, /stop to finish)")),
        Command::Stop => controller.end_capture().await,
        Command::Cancel => controller.cancel_capture().await,
        Command::Status => {
            println!("{}", status_line(controller.state()));
            Ok(())
        }
        Command::SendBuffer => {
            if !controller.dispatch() {
                println!("(nothing to send)");
            }
            Ok(())
        }
        Command::Send(text) => {
            controller.set_text(text);
            controller.dispatch();
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(e) = result {
        println!("! {e}");
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_threads(threads: &[ThreadSummary]) {
    if threads.is_empty() {
        println!("(no threads)");
    }
    for t in threads {
        println!("  {}  {} ({} messages)", t.id, t.display_name, t.message_count);
    }
}

/// One line summarising the active thread, the input channels and any
/// replies still outstanding.
fn status_line(state: &SessionState) -> String {
    let thread = match (state.active_thread(), state.roster().is_empty()) {
        (Some(id), _) => format!("thread {id}"),
        (None, true) => "new session, no saved threads".to_string(),
        (None, false) => "new session".to_string(),
    };
    let mut parts = vec![thread];
    let audio = state.audio_state();
    if audio.is_busy() {
        parts.push(format!("voice {}", audio.label()));
    }
    if state.image_state() == ImageState::Uploading {
        parts.push("uploading image".to_string());
    }
    if state.buffer().attachment().is_some() {
        parts.push("image attached".to_string());
    }
    if state.awaiting_replies() > 0 {
        parts.push(format!("{} replies pending", state.awaiting_replies()));
    }
    parts.join(" | ")
}

fn print_message(message: &Message) {
    let who = match message.origin {
        Origin::User => "you",
        Origin::Assistant => "annapoorna",
    };
    match &message.attachment {
        Some(image) => println!("{who}: {} [{image}]", message.text),
        None => println!("{who}: {}", message.text),
    }
}

fn report(event: &Event) {
    match event {
        Event::Warning(e) => println!("! {e}"),
        Event::TranscriptApplied(text) => println!("(transcript in buffer, /send to send) {text}"),
        Event::AttachmentReady(attachment) => match &attachment.prediction {
            Some(p) => println!("(image attached: {})", p.label),
            None => println!("(image attached)"),
        },
        Event::StaleDiscarded(what) => log::info!("discarded late {what}"),
        other => log::debug!("{other:?}"),
    }
}

/// Prints the visible history incrementally.
#[derive(Default)]
struct HistoryView {
    shown: Vec<Message>,
}

impl HistoryView {
    fn render(&mut self, history: &[Message]) {
        if history == self.shown.as_slice() {
            return;
        }
        let start = if history.starts_with(&self.shown) {
            self.shown.len()
        } else {
            println!("--------");
            0
        };
        for message in &history[start..] {
            print_message(message);
        }
        self.shown = history.to_vec();
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Annapoorna client starting up");

    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    let user = std::env::args()
        .nth(1)
        .or_else(|| config.session.user_id.clone())
        .map(UserId::new);

    let backend: Arc<dyn Backend> =
        Arc::new(HttpBackend::from_config(&config).context("invalid backend configuration")?);
    let microphone: Arc<dyn AudioSource> = Arc::new(CpalMicrophone::new(config.audio.device.clone()));
    let mut controller = SessionController::new(&config, backend, microphone);

    match &user {
        Some(user) => match controller.load_roster(user).await {
            Ok(threads) => print_threads(&threads),
            Err(e) => println!("! {e}"),
        },
        None => log::info!("No user id given; chats will not be archived"),
    }
    if controller.state().active_thread().is_none() {
        controller.start_new_session(user.as_ref());
    }

    let mut view = HistoryView::default();
    view.render(controller.state().history());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => run_command(&mut controller, command, user.as_ref()).await,
                    None => {}
                }
            }
            Some(events) = controller.process_next(), if controller.is_busy() => {
                for event in &events {
                    report(event);
                }
            }
        }
        view.render(controller.state().history());
    }

    log::info!("Annapoorna client shutting down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
