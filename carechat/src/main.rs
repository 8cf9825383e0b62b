//! `CareChat`: line-oriented chat client.
//!
//! Connects to a relay, opens the conversation with `--partner`, prints its
//! history and live messages, and sends every typed line.
//!
//! ```bash
//! cargo run --bin carechat -- --relay-url ws://127.0.0.1:9000/ws \
//!     --token tok-u1 --participant-id u1 --role client --partner c1
//! ```
//!
//! Commands: `/partner <id> <role> [name]`, `/reconnect`, `/quit`.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use carechat::channel::ws::WsConnector;
use carechat::config::{CliArgs, ClientConfig, is_valid_timestamp_format};
use carechat::history::HttpHistoryLoader;
use carechat::scope::{ConversationScope, ScopeStatus, ScopeUpdate};
use carechat_proto::message::Message;
use carechat_proto::participant::{RawParticipant, Role};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

type Scope = ConversationScope<WsConnector, HttpHistoryLoader>;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    if cli
        .timestamp_format
        .as_deref()
        .is_some_and(|f| !is_valid_timestamp_format(f))
    {
        eprintln!(
            "Warning: invalid --timestamp-format, using {}",
            config.timestamp_format
        );
    }

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("carechat starting");

    let Some(session) = config.session() else {
        eprintln!("A session token and participant id are required (--token, --participant-id).");
        return Ok(());
    };
    let Some(relay_url) = config.relay_url.clone() else {
        eprintln!("A relay URL is required (--relay-url or RELAY_URL).");
        return Ok(());
    };
    let Some(history_url) = config.history_base_url() else {
        eprintln!("Cannot determine the history URL; pass --history-url.");
        return Ok(());
    };

    let loader = HttpHistoryLoader::new(&history_url, config.history_timeout)
        .map_err(io::Error::other)?;
    let connector = WsConnector::new(relay_url)
        .with_timeouts(config.connect_timeout, config.auth_timeout)
        .with_capacity(config.channel_capacity);

    let mut scope = ConversationScope::new(session, connector, Arc::new(loader), config.scope_config());
    if let Err(e) = scope.connect().await {
        eprintln!("! could not connect: {e}");
    }
    if let Some(partner) = &config.partner {
        select(&mut scope, partner);
    }

    let result = run(&mut scope, &config.timestamp_format).await;
    scope.end_session().await;
    tracing::info!("carechat exiting");
    result
}

/// Initializes file-based logging so stdout stays free for the conversation.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("carechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(scope: &mut Scope, timestamp_format: &str) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                if !handle_line(scope, line.trim()).await {
                    return Ok(());
                }
            }
            update = scope.next_update() => render(scope, &update, timestamp_format)?,
        }
    }
}

/// Returns `false` when the user asked to quit.
async fn handle_line(scope: &mut Scope, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let mut words = line.split_whitespace();
    match words.next() {
        Some("/quit") => return false,
        Some("/reconnect") => match scope.reconnect().await {
            Ok(_) => println!("* reconnected"),
            Err(e) => println!("! reconnect failed: {e}"),
        },
        Some("/partner") => {
            let id = words.next();
            let role = words.next().map(str::parse::<Role>);
            match (id, role) {
                (Some(id), Some(Ok(role))) => {
                    let name = words.collect::<Vec<_>>().join(" ");
                    let partner = RawParticipant {
                        id: Some(id.to_string()),
                        legacy_id: None,
                        role,
                        name: (!name.is_empty()).then_some(name),
                    };
                    select(scope, &partner);
                }
                (_, Some(Err(e))) => println!("! {e}"),
                _ => println!("! usage: /partner <id> <role> [name]"),
            }
        }
        _ => {
            if let Err(e) = scope.send(line).await {
                println!("! not sent: {e}");
            }
        }
    }
    true
}

fn select(scope: &mut Scope, partner: &RawParticipant) {
    match scope.select_partner(partner) {
        Ok(_) => {
            if let Some(p) = scope.partner() {
                println!("* loading conversation with {p}");
            }
        }
        Err(e) => println!("! cannot open conversation: {e}"),
    }
}

fn render(scope: &Scope, update: &ScopeUpdate, timestamp_format: &str) -> io::Result<()> {
    let mut out = io::stdout().lock();
    match update {
        ScopeUpdate::HistoryLoaded { .. } => {
            writeln!(out, "--- {} ---", scope.channel_state())?;
            for message in scope.messages() {
                print_message(&mut out, message, timestamp_format)?;
            }
        }
        ScopeUpdate::Appended { .. } => {
            if let Some(message) = scope.messages().last() {
                print_message(&mut out, message, timestamp_format)?;
            }
        }
        ScopeUpdate::HistoryFailed(e) => {
            let hint = match scope.status() {
                ScopeStatus::Unauthorized => "sign in again",
                _ => "reselect the partner to retry",
            };
            writeln!(out, "! history unavailable ({e}); {hint}")?;
        }
        ScopeUpdate::ChannelFault(e) => {
            writeln!(out, "! live updates paused: {e} (/reconnect to resume)")?;
        }
        ScopeUpdate::SendRejected(reason) => writeln!(out, "! not sent: {reason}")?,
        ScopeUpdate::StaleHistoryDiscarded { .. }
        | ScopeUpdate::StaleFaultDiscarded
        | ScopeUpdate::Queued
        | ScopeUpdate::Duplicate
        | ScopeUpdate::StaleLiveDiscarded
        | ScopeUpdate::Ignored => {}
    }
    out.flush()
}

fn print_message(out: &mut impl Write, message: &Message, timestamp_format: &str) -> io::Result<()> {
    let who = if message.sender.display_name.is_empty() {
        message.sender.id.as_str()
    } else {
        message.sender.display_name.as_str()
    };
    writeln!(
        out,
        "[{}] {who}: {}",
        message.sent_at.with_timezone(&chrono::Local).format(timestamp_format),
        message.body
    )
}
