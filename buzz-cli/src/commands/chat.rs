use std::{collections::HashSet, path::PathBuf};

use anyhow::{Context, Result};
use clap::{ArgGroup, Args};
use client::{ChatSync, ClientError, StoreEvent, SwitchReport};
use shared::{
    config::ClientConfig,
    models::{ConversationId, Direction, Message, MessageId, UserId},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

use super::session::{explain, restore_session};

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["with", "conversation"])))]
pub struct ChatArgs {
    /// Username of the person to chat with
    #[arg(long)]
    pub with: Option<String>,

    /// Conversation identifier to open
    #[arg(long, alias = "conv")]
    pub conversation: Option<i64>,
}

const HELP: &str = "Commands: /image <path>, /switch <username>, /status, /help, /quit";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Text(String),
    Image(PathBuf),
    Switch(String),
    Status,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Text(line.trim_end_matches(['\r', '\n']).to_string());
    };

    let (name, argument) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));
    match (name, argument) {
        ("quit" | "exit", _) => Input::Quit,
        ("help", _) => Input::Help,
        ("status", _) => Input::Status,
        ("image", "") => Input::Invalid("usage: /image <path>".to_string()),
        ("image", path) => Input::Image(PathBuf::from(path)),
        ("switch", "") => Input::Invalid("usage: /switch <username>".to_string()),
        ("switch", username) => Input::Switch(username.to_string()),
        (other, _) => Input::Invalid(format!("unknown command /{other}; {HELP}")),
    }
}

fn format_message(message: &Message, me: UserId) -> String {
    let author = match message.direction(me) {
        Direction::Sent => "you".to_string(),
        Direction::Received => format!("user {}", message.sender_id),
    };
    match &message.timestamp {
        Some(timestamp) => format!(
            "[{}] {author}: {}",
            timestamp.0.format("%H:%M"),
            message.preview()
        ),
        None => format!("{author}: {}", message.preview()),
    }
}

/// Prints store changes, each message once.
struct Renderer {
    me: UserId,
    printed: HashSet<MessageId>,
}

impl Renderer {
    fn new(me: UserId) -> Self {
        Self {
            me,
            printed: HashSet::new(),
        }
    }

    fn print(&mut self, message: &Message) {
        if self.printed.insert(message.message_id.clone()) {
            println!("{}", format_message(message, self.me));
        }
    }

    async fn apply(&mut self, event: StoreEvent, sync: &ChatSync) {
        match event {
            StoreEvent::Reset(Some(conversation_id)) => {
                self.printed.clear();
                println!("=== conversation {conversation_id} ===");
            }
            StoreEvent::Reset(None) => self.printed.clear(),
            StoreEvent::Seeded { .. } => self.catch_up(sync).await,
            StoreEvent::Appended(message) => self.print(&message),
        }
    }

    async fn catch_up(&mut self, sync: &ChatSync) {
        for message in sync.snapshot().await {
            self.print(&message);
        }
    }
}

/// What to tell the user about the history part of a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HistoryNotice {
    Empty,
    Unavailable(String),
}

fn history_notice(report: &SwitchReport) -> Option<HistoryNotice> {
    match report.history_error.as_ref()? {
        // The server answers 404 for a conversation without messages.
        ClientError::NotFound(_) => Some(HistoryNotice::Empty),
        err => Some(HistoryNotice::Unavailable(err.user_message())),
    }
}

fn report_switch(report: &SwitchReport) {
    match history_notice(report) {
        Some(HistoryNotice::Empty) => println!("No messages yet."),
        Some(HistoryNotice::Unavailable(message)) => eprintln!("history unavailable: {message}"),
        None => {}
    }
}

pub async fn run(args: ChatArgs, config: &ClientConfig) -> Result<()> {
    let (context, _session) = restore_session()?;
    let sync = ChatSync::connect(config, context).context("failed to set up chat client")?;
    let me = sync.me().map_err(explain)?;
    let mut renderer = Renderer::new(me);
    let mut events = sync.subscribe();

    let report = match (args.with, args.conversation) {
        (Some(username), _) => sync.open_with(&username).await,
        (None, Some(id)) => sync.activate(ConversationId(id)).await,
        (None, None) => missing_target(),
    }
    .map_err(explain)?;
    report_switch(&report);
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Help => println!("{HELP}"),
                    Input::Invalid(message) => eprintln!("{message}"),
                    Input::Status => {
                        let state = sync.stream_state().await;
                        match sync.active_conversation().await {
                            Some(id) => println!("conversation {id}, live updates {}", state.as_str()),
                            None => println!("no active conversation"),
                        }
                    }
                    Input::Text(text) => {
                        if let Err(err) = sync.send_text(&text).await {
                            eprintln!("not sent: {}", err.user_message());
                        }
                    }
                    Input::Image(path) => match tokio::fs::read(&path).await {
                        Ok(bytes) => {
                            if let Err(err) = sync.send_image(&bytes).await {
                                eprintln!("not sent: {}", err.user_message());
                            }
                        }
                        Err(err) => eprintln!("cannot read {}: {err}", path.display()),
                    },
                    Input::Switch(username) => match sync.open_with(&username).await {
                        Ok(report) => report_switch(&report),
                        Err(err) => eprintln!("cannot open conversation: {}", err.user_message()),
                    },
                }
            }
            event = events.recv() => match event {
                Ok(event) => renderer.apply(event, &sync).await,
                Err(RecvError::Lagged(_)) => renderer.catch_up(&sync).await,
                Err(RecvError::Closed) => break,
            },
        }
    }

    sync.deactivate().await;
    Ok(())
}

fn missing_target() -> client::ClientResult<SwitchReport> {
    Err(ClientError::Validation(
        "either --with or --conversation is required".to_string(),
    ))
}
