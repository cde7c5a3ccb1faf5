pub mod client;
pub mod counters;
pub mod daemon_path;
pub mod export;
pub mod process;
pub mod sessions;

use std::path::PathBuf;

use ansi_term::{Colour, Style};
use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use client::{DaemonClient, TimerControl};
use counters::{process_counter_command, CounterCommand};
use export::export_counters;
use process::{current_daemon_path, kill_previous_servers, restart_server};
use sessions::{process_session_command, SessionCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{
        config::DaemonConfig, protocol::Request, start_daemon, storage::store::FileStore,
        timer::TimerSnapshot, STORE_DIR,
    },
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, CLI_PREFIX},
        time::format_elapsed_precise,
    },
};

#[derive(Parser, Debug)]
#[command(name = "Tallywatch", version, long_about = None)]
#[command(about = "Stopwatch with tally counters that keeps running in the background", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application, replacing a running one")]
    Init {},
    #[command(about = "Stop currently running daemon")]
    Shutdown {},
    #[command(about = "Run a daemon directly in current console. Used for debugging")]
    Serve {},
    #[command(about = "Show the stopwatch")]
    Status {},
    #[command(about = "Start the stopwatch")]
    Start {},
    #[command(about = "Pause the stopwatch")]
    Stop {},
    #[command(about = "Stop the stopwatch and set it to zero")]
    Reset {},
    #[command(about = "Dump timer, counters and sessions as JSON")]
    Backup {
        #[arg(long, help = "Write into a file instead of stdout")]
        out: Option<PathBuf>,
    },
    #[command(about = "Manage tally counters")]
    Counter {
        #[command(subcommand)]
        command: CounterCommand,
    },
    #[command(about = "Save and restore snapshots of the stopwatch and counters")]
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    #[command(about = "Export counters as CSV")]
    Export {
        #[arg(long, help = "Target file. Defaults to stopwatch-counters-<date>.csv")]
        out: Option<PathBuf>,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = match args.dir {
        Some(dir) => ensure_dir(dir)?.canonicalize()?,
        None => create_application_default_path()?,
    };

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir.join("logs"), logging_level, args.log)?;

    match args.commands {
        Commands::Init {} => restart_server(Some(&app_dir)),
        Commands::Shutdown {} => {
            let stopped = kill_previous_servers(&current_daemon_path()?)?;
            println!("Stopped {stopped} daemon(s)");
            Ok(())
        }
        Commands::Serve {} => {
            let config = DaemonConfig::load(&app_dir)?;
            start_daemon(app_dir, config).await
        }
        Commands::Status {} => {
            let mut client = DaemonClient::connect(&app_dir).await?;
            print_state(&client.state().await?);
            Ok(())
        }
        Commands::Start {} => transition(&app_dir, Request::Start).await,
        Commands::Stop {} => transition(&app_dir, Request::Stop).await,
        Commands::Reset {} => transition(&app_dir, Request::Reset).await,
        Commands::Backup { out } => {
            let mut client = DaemonClient::connect(&app_dir).await?;
            let backup = serde_json::to_string_pretty(&client.backup().await?)?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, backup).await?;
                    println!("Backup written to {}", path.display());
                }
                None => println!("{backup}"),
            }
            Ok(())
        }
        Commands::Counter { command } => {
            let store = FileStore::new(&app_dir.join(STORE_DIR))?;
            process_counter_command(command, &store, Utc::now()).await
        }
        Commands::Session { command } => {
            let store = FileStore::new(&app_dir.join(STORE_DIR))?;
            let mut client = match command.uses_timer() {
                true => Some(DaemonClient::connect(&app_dir).await?),
                false => None,
            };
            let timer = client.as_mut().map(|v| v as &mut dyn TimerControl);
            process_session_command(command, &store, timer, Utc::now()).await
        }
        Commands::Export { out } => {
            let store = FileStore::new(&app_dir.join(STORE_DIR))?;
            let mut client = DaemonClient::connect(&app_dir).await?;
            let path = export_counters(&store, &mut client, out.as_deref(), Utc::now()).await?;
            println!("Exported counters to {}", path.display());
            Ok(())
        }
    }
}

async fn transition(app_dir: &std::path::Path, request: Request) -> Result<()> {
    let mut client = DaemonClient::connect(app_dir).await?;
    client.apply(request).await?;
    print_state(&client.state().await?);
    Ok(())
}

fn print_state(state: &TimerSnapshot) {
    let indicator = if state.running {
        Colour::Green.paint("running")
    } else {
        Colour::Red.paint("stopped")
    };
    println!(
        "{}  {indicator}",
        Style::new()
            .bold()
            .paint(format_elapsed_precise(state.elapsed_ms))
    );
}
