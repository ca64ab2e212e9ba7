//! chatbot-session - terminal client for chatbot conversation sessions
//!
//! Lists, deletes, resumes and starts sessions against the chatbot backend.
//! An open session runs a line-based prompt: plain lines are sent as
//! messages, `/like N`, `/dislike N`, `/regenerate` and `/quit` act on the
//! conversation.

mod config;
mod model;
mod runtime;
mod state_machine;
mod tools;
mod transport;
mod view;

use clap::{Parser, Subcommand};
use config::{ClientConfig, StaticToken};
use model::body::Segment;
use model::Rating;
use runtime::{open_page, PageTarget, SessionController, SessionHandle};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tools::{ToolBinding, ToolRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{HttpSessionApi, SessionDirectory};
use view::{ConversationView, MessageView, SourceTarget};

/// Terminal client for chatbot sessions
#[derive(Parser, Debug)]
#[command(name = "chatbot-session")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored sessions
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        size: u32,
    },
    /// Delete a session
    Delete { session_id: String },
    /// Continue an existing session
    Resume { session_id: String },
    /// Start a conversation with a tool; the session is created on first message
    New { tool_id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatbot_session=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let args = Args::parse();
    let config = ClientConfig::from_env()?;
    tracing::debug!(api_url = %config.api_url, "Configuration loaded");
    let registry = ToolRegistry::default().with_history_limit(config.history_limit);
    let api = Arc::new(HttpSessionApi::new(config, StaticToken::from_env()));

    match args.command {
        Command::List { page, size } => {
            let listing = api.list_sessions(page, size).await?;
            for session in &listing.items {
                println!("{}  {}  {}", session.id, session.tool_id, session.title);
            }
            println!(
                "page {}/{} ({} sessions)",
                listing.page,
                listing.pages.unwrap_or(1),
                listing.total
            );
        }
        Command::Delete { session_id } => {
            api.delete_session(&session_id).await?;
            println!("deleted {session_id}");
        }
        Command::Resume { session_id } => {
            let page = open_page(api.as_ref(), &registry, PageTarget::Existing { session_id }).await?;
            run_page(api, page).await?;
        }
        Command::New { tool_id } => {
            let page = open_page(api.as_ref(), &registry, PageTarget::New { tool_id }).await?;
            run_page(api, page).await?;
        }
    }

    Ok(())
}

async fn run_page(
    api: Arc<HttpSessionApi>,
    page: runtime::ToolPage,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("== {} ==", page.tool.title);

    let context = match page.binding {
        ToolBinding::Conversation(context) => context,
        ToolBinding::Unsupported { name } => {
            println!("Tool '{name}' has no terminal page.");
            return Ok(());
        }
    };

    let controller = SessionController::new(context, api, page.session_id);
    let handle = controller.handle();
    let controller_task = tokio::spawn(controller.run());
    let render_task = tokio::spawn(render(handle.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !dispatch(&handle, line.trim()) {
            break;
        }
    }

    handle.unmount();
    controller_task.await?;
    render_task.abort();
    Ok(())
}

/// Act on one input line. Returns false to leave the session.
fn dispatch(handle: &SessionHandle, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let result = match words.next() {
        None => return true,
        Some("/quit") => return false,
        Some("/regenerate") => {
            let target = handle
                .views()
                .borrow()
                .regenerable()
                .and_then(|m| m.id.clone());
            match target {
                Some(id) => handle.regenerate(id),
                None => {
                    println!("Nothing to regenerate.");
                    Ok(())
                }
            }
        }
        Some(cmd @ ("/like" | "/dislike")) => {
            let rating = if cmd == "/like" {
                Rating::Like
            } else {
                Rating::Dislike
            };
            match words.next().and_then(|n| n.parse::<usize>().ok()) {
                Some(position) => match message_id_at(&handle.views().borrow().clone(), position) {
                    Some(id) => handle.rate(id, rating),
                    None => {
                        println!("No message {position}.");
                        Ok(())
                    }
                },
                None => {
                    println!("Usage: {cmd} N");
                    Ok(())
                }
            }
        }
        Some(_) => handle.send(line),
    };
    result.is_ok()
}

/// Id of the message shown as `[position]`
fn message_id_at(view: &ConversationView, position: usize) -> Option<String> {
    view.messages
        .get(position.checked_sub(1)?)
        .and_then(|m| m.id.clone())
}

async fn render(handle: SessionHandle) {
    let mut views = handle.views();
    let mut notifications = handle.notifications();
    let mut shown: Vec<MessageView> = Vec::new();
    let mut was_waiting = false;
    let mut session_id: Option<String> = None;

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                if view.session_id != session_id {
                    if let Some(id) = &view.session_id {
                        println!("  (session {id})");
                    }
                    session_id = view.session_id.clone();
                }
                print_changes(&shown, &view);
                if view.waiting && !was_waiting {
                    println!("  ... waiting for reply");
                }
                was_waiting = view.waiting;
                shown = view.messages;
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => println!("! {notification}"),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

fn print_changes(shown: &[MessageView], view: &ConversationView) {
    if view.messages.len() < shown.len() {
        println!("  (last reply withdrawn)");
    }
    for (index, message) in view.messages.iter().enumerate() {
        match shown.get(index) {
            Some(previous) if previous.id == message.id => {
                if previous.rating != message.rating {
                    if let Some(rating) = message.rating {
                        println!("  [{}] {}", index + 1, rating_label(rating));
                    }
                }
            }
            _ => print_message(index + 1, message),
        }
    }
}

fn print_message(position: usize, message: &MessageView) {
    let who = match (message.is_system, message.is_error) {
        (true, true) => "error",
        (true, false) => "assistant",
        (false, _) => "you",
    };
    let time = message
        .created_at
        .map(|ts| ts.format("%H:%M").to_string())
        .unwrap_or_default();
    match &message.created_by {
        Some(author) if !message.is_system => println!("[{position}] {who} ({author}) {time}"),
        _ => println!("[{position}] {who} {time}"),
    }

    let mut text = String::new();
    for segment in &message.segments {
        match segment {
            Segment::Text(t) => text.push_str(t),
            Segment::InlineCode(code) => {
                text.push('`');
                text.push_str(code);
                text.push('`');
            }
            Segment::CodeBlock { language, code } => {
                text.push_str(&format!(
                    "\n  --- {} ---\n{}  ---\n",
                    language.as_deref().unwrap_or("code"),
                    code
                ));
            }
        }
    }
    for line in text.lines() {
        println!("  {line}");
    }

    for source in &message.sources {
        let target = match &source.target {
            SourceTarget::Link(url) => url.clone(),
            SourceTarget::Reference(Some(reference)) => reference.clone(),
            SourceTarget::Reference(None) => String::new(),
        };
        let position = source
            .position
            .as_deref()
            .map(|p| format!(" #{p}"))
            .unwrap_or_default();
        println!("    - {}{position} ({}) {target}", source.title, source.caption);
    }
    if let Some(rating) = message.rating {
        println!("  {}", rating_label(rating));
    }
}

fn rating_label(rating: Rating) -> &'static str {
    match rating {
        Rating::Like => "liked",
        Rating::Dislike => "disliked",
    }
}
