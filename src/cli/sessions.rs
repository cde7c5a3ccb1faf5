use std::sync::Arc;

use ansi_term::Style;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, Utc};
use clap::Subcommand;

use crate::{
    daemon::{
        protocol::Request,
        storage::{
            entities::{CounterRecord, RecordId, SessionRecord},
            store::Store,
        },
    },
    utils::time::{format_elapsed, to_local_display},
};

use super::client::TimerControl;

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    #[command(about = "Capture the current stopwatch time and counters")]
    Save {
        #[arg(help = "Session name. Defaults to \"Session <date>\"")]
        name: Option<String>,
    },
    #[command(about = "Show saved sessions, oldest first")]
    List,
    #[command(about = "Show the counters captured by a session")]
    Show { id: RecordId },
    #[command(about = "Stop the stopwatch and replace the current time and counters with a session")]
    Load { id: RecordId },
    #[command(about = "Remove a session")]
    Delete { id: RecordId },
}

impl SessionCommand {
    /// Only saving and loading talk to the daemon. The rest works on the store alone.
    pub fn uses_timer(&self) -> bool {
        matches!(self, SessionCommand::Save { .. } | SessionCommand::Load { .. })
    }
}

pub async fn process_session_command(
    command: SessionCommand,
    store: &dyn Store,
    timer: Option<&mut dyn TimerControl>,
    now: DateTime<Utc>,
) -> Result<()> {
    let no_daemon = || anyhow!("This command needs a running daemon");
    match command {
        SessionCommand::Save { name } => {
            let timer = timer.ok_or_else(no_daemon)?;
            let id = save_session(store, timer, name, now).await?;
            println!("Saved session {id}");
        }
        SessionCommand::List => {
            let sessions = store.get_sessions().await?;
            if sessions.is_empty() {
                println!("No saved sessions");
            }
            for session in sessions {
                print_session(&session);
            }
        }
        SessionCommand::Show { id } => {
            let session = find_session(store, id).await?;
            print_session(&session);
            for counter in session.counters.iter() {
                println!("      {:<24} {:>6}", counter.name, counter.value);
            }
        }
        SessionCommand::Load { id } => {
            let timer = timer.ok_or_else(no_daemon)?;
            let session = load_session(store, timer, id, now).await?;
            println!(
                "Loaded session {} at {}",
                session.name,
                format_elapsed(session.elapsed_ms_at_capture)
            );
        }
        SessionCommand::Delete { id } => {
            store.delete_session(id).await?;
            println!("Deleted session {id}");
        }
    }
    Ok(())
}

fn default_session_name(now: DateTime<Utc>) -> String {
    format!("Session {}", now.with_timezone(&Local).format("%Y-%m-%d %H:%M"))
}

/// Captures the daemon's elapsed time together with the stored counters.
pub async fn save_session(
    store: &dyn Store,
    timer: &mut dyn TimerControl,
    name: Option<String>,
    now: DateTime<Utc>,
) -> Result<RecordId> {
    let name: Arc<str> = name
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default_session_name(now))
        .into();
    let elapsed_ms = timer.state().await?.elapsed_ms;
    let counters = store.get_counters().await?;
    Ok(store
        .put_session(SessionRecord::capture(name, now, elapsed_ms, &counters))
        .await?)
}

async fn find_session(store: &dyn Store, id: RecordId) -> Result<SessionRecord> {
    store
        .get_session(id)
        .await?
        .ok_or_else(|| anyhow!("No session with id {id}"))
}

/// Timer changes go through the daemon so it stays the only writer of the timer record.
pub async fn load_session(
    store: &dyn Store,
    timer: &mut dyn TimerControl,
    id: RecordId,
    now: DateTime<Utc>,
) -> Result<SessionRecord> {
    let session = find_session(store, id).await?;

    timer.apply(Request::Stop).await?;
    timer.apply(Request::Reset).await?;
    timer
        .apply(Request::SetElapsed {
            elapsed_ms: session.elapsed_ms_at_capture,
        })
        .await?;

    let counters = session
        .counters
        .iter()
        .map(|v| CounterRecord {
            id: None,
            name: v.name.clone(),
            value: v.value,
            last_modified: now,
        })
        .collect();
    store.replace_counters(counters).await?;
    Ok(session)
}

fn print_session(session: &SessionRecord) {
    println!(
        "{:>4}  {:<24} {}  {}  {} counters",
        session.id.map(|v| v.to_string()).unwrap_or_default(),
        Style::new().bold().paint(session.name.as_ref()),
        to_local_display(session.created_at),
        format_elapsed(session.elapsed_ms_at_capture),
        session.counters.len()
    );
}
