//! Console front-end: reads lines from stdin, drives the controller, prints
//! replies to stdout.
//!
//! Plain text is sent as a question; lines starting with `/` are commands.
//! Runs until the `shutdown` token is cancelled (Ctrl-C), `/quit`, or stdin
//! is closed.

use std::io::Write as _;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{ChatController, ChatEvents};
use crate::error::AppError;
use crate::store::models::display_name;

const HELP: &str = "\
Commands:
  /models             list registered models (* = active)
  /add <path>         register a model file
  /use <name>         make a model active and load it
  /remove <name>      forget a model
  /history            list chat sessions with a preview
  /show <session_id>  print a session transcript
  /status             show the active model and controller state
  /help               this text
  /quit               exit
Anything else is sent to the active model.";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Models,
    Add(PathBuf),
    Use(String),
    Remove(String),
    History,
    Show(i64),
    Status,
    Help,
    Quit,
    /// Unknown command or bad argument; carries the message to print.
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        let need_arg = |what: &str| Command::Invalid(format!("usage: /{name} <{what}>"));
        match name {
            "models" => Command::Models,
            "history" => Command::History,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "add" if arg.is_empty() => need_arg("path"),
            "add" => Command::Add(crate::config::expand_home(arg)),
            "use" if arg.is_empty() => need_arg("name"),
            "use" => Command::Use(arg.to_string()),
            "remove" if arg.is_empty() => need_arg("name"),
            "remove" => Command::Remove(arg.to_string()),
            "show" => match arg.parse::<i64>() {
                Ok(id) => Command::Show(id),
                Err(_) => need_arg("session_id"),
            },
            other => Command::Invalid(format!("unknown command: /{other} (try /help)")),
        }
    }
}

/// Prints controller events to stdout.
#[derive(Debug, Default)]
pub struct ConsoleEvents;

impl ChatEvents for ConsoleEvents {
    fn on_response_ready(&self, _session_id: i64, text: &str) {
        println!("AI: {text}");
    }

    fn on_error(&self, err: &AppError) {
        println!("[error] {err}");
    }
}

pub async fn run(controller: ChatController, shutdown: CancellationToken) -> Result<(), AppError> {
    info!("console started");
    println!("─────────────────────────────────");
    println!(" chatdesk console  (/help, Ctrl-C to quit)");
    println!("─────────────────────────────────");
    print_status(&controller);

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                println!();
                info!("console shutting down");
                break;
            }

            line = lines.next_line() => line,
        };

        let input = match line {
            Err(e) => {
                warn!("console read error: {e}");
                break;
            }
            Ok(None) => {
                info!("console stdin closed");
                break;
            }
            Ok(Some(input)) => input,
        };
        if input.trim().is_empty() {
            continue;
        }

        let command = Command::parse(&input);
        debug!(?command, "console command");
        if command == Command::Quit {
            break;
        }
        if !handle(&controller, command, &shutdown).await {
            break;
        }
    }

    Ok(())
}

/// Run one command. Returns `false` when the console should stop.
async fn handle(controller: &ChatController, command: Command, shutdown: &CancellationToken) -> bool {
    let result = match command {
        Command::Say(text) => ask(controller, &text, shutdown).await,
        Command::Models => list_models(controller),
        Command::Add(path) => controller.add_model(&path).map(|m| {
            println!("added {} ({})", m.name, m.path.display());
        }),
        Command::Use(name) => controller.activate_model(&name).await.map(|m| {
            println!("active model: {}", m.display_name());
        }),
        Command::Remove(name) => controller.remove_model(&name).await.map(|removed| {
            if removed {
                println!("removed {name}");
            } else {
                println!("no model named {name}");
            }
            if matches!(controller.active_model(), Ok(None)) {
                println!("{}", AppError::NoActiveModel);
            }
        }),
        Command::History => list_history(controller),
        Command::Show(session_id) => show_transcript(controller, session_id),
        Command::Status => {
            print_status(controller);
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Invalid(msg) => {
            println!("{msg}");
            Ok(())
        }
        Command::Quit => return false,
    };

    match result {
        Ok(()) => true,
        Err(e) if e.is_user_notice() => {
            println!("{e}");
            true
        }
        Err(e) => {
            println!("[error] {e}");
            true
        }
    }
}

/// Send a question and wait for the answer, which `ConsoleEvents` prints.
async fn ask(controller: &ChatController, text: &str, shutdown: &CancellationToken) -> Result<(), AppError> {
    let pending = controller.send(text)?;
    println!("…thinking");

    tokio::select! {
        _ = shutdown.cancelled() => {
            println!("[interrupted] the answer will still be saved when it arrives");
        }
        // Already reported through ConsoleEvents.
        _ = pending.wait() => {}
    }
    Ok(())
}

fn list_models(controller: &ChatController) -> Result<(), AppError> {
    let models = controller.models()?;
    if models.is_empty() {
        println!("no models registered; use /add <path>");
    }
    for m in models {
        let marker = if m.is_active { "*" } else { " " };
        println!("{marker} {}  {}", m.name, m.path.display());
    }
    Ok(())
}

fn list_history(controller: &ChatController) -> Result<(), AppError> {
    let sessions = controller.history()?;
    if sessions.is_empty() {
        println!("no chat history yet");
    }
    for s in sessions {
        let preview = s.preview.as_deref().map(preview_line).unwrap_or_else(|| "(empty)".into());
        println!("#{:<4} {}  {preview}", s.session_id, s.date);
    }
    Ok(())
}

fn show_transcript(controller: &ChatController, session_id: i64) -> Result<(), AppError> {
    if !controller.context().conversations.session_exists(session_id)? {
        println!("no session #{session_id}");
        return Ok(());
    }
    for m in controller.transcript(session_id)? {
        println!("[{}] {}: {}", m.timestamp, m.sender, m.text);
    }
    Ok(())
}

fn print_status(controller: &ChatController) {
    match controller.active_model() {
        Ok(Some(m)) => println!("active model: {}", display_name(&m.name)),
        Ok(None) => println!("no active model; /add a model file, then /use it"),
        Err(e) => println!("[error] {e}"),
    }
    let ctx = controller.context();
    println!(
        "engine: {}  state: {:?}  answers this run: {}",
        ctx.gateway.engine_name(),
        controller.state(),
        ctx.gateway.completions_served()
    );
}

/// First line of `text`, cut to 60 characters.
fn preview_line(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    let mut out: String = first.chars().take(60).collect();
    if first.chars().count() > 60 || text.lines().nth(1).is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_question() {
        assert_eq!(Command::parse("  hello there "), Command::Say("hello there".into()));
    }

    #[test]
    fn commands_parse() {
        assert_eq!(Command::parse("/models"), Command::Models);
        assert_eq!(Command::parse("/use m1.gguf"), Command::Use("m1.gguf".into()));
        assert_eq!(Command::parse("/remove  m1.gguf "), Command::Remove("m1.gguf".into()));
        assert_eq!(Command::parse("/add /models/m1.gguf"), Command::Add(PathBuf::from("/models/m1.gguf")));
        assert_eq!(Command::parse("/show 7"), Command::Show(7));
        assert_eq!(Command::parse("/exit"), Command::Quit);
    }

    #[test]
    fn missing_or_bad_arguments_are_invalid() {
        assert!(matches!(Command::parse("/use"), Command::Invalid(ref m) if m.contains("usage")));
        assert!(matches!(Command::parse("/show abc"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/frobnicate"), Command::Invalid(ref m) if m.contains("unknown")));
    }

    #[test]
    fn preview_is_first_line_truncated() {
        assert_eq!(preview_line("short"), "short");
        assert_eq!(preview_line("line one\nline two"), "line one…");
        let long = "x".repeat(80);
        assert_eq!(preview_line(&long).chars().count(), 61);
    }
}
