use std::env::args;

use anyhow::Result;
use clap::Parser;
use tallywatch::{
    daemon::{args::DaemonArgs, config::DaemonConfig, start_daemon},
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, DAEMON_PREFIX},
        runtime::single_thread_runtime,
    },
};

fn main() -> Result<()> {
    run_service(args().collect::<Vec<_>>())
}

fn run_service(command_args: Vec<String>) -> Result<()> {
    let args = DaemonArgs::parse_from(&command_args);

    // Resolve before detaching: the daemon changes its working directory.
    let app_dir = match args.dir.clone() {
        Some(dir) => ensure_dir(dir)?.canonicalize()?,
        None => create_application_default_path()?,
    };

    if !args.force {
        #[cfg(unix)]
        {
            use daemonize::Daemonize;

            let daemonize = Daemonize::new()
                .working_directory("/")
                .stdout(daemonize::Stdio::devnull())
                .stderr(daemonize::Stdio::devnull())
                .execute();
            match daemonize {
                daemonize::Outcome::Parent(parent) => {
                    parent.inspect_err(|e| eprintln!("Failed to create daemon {e:?}"))?;
                    println!("Created daemon");
                    return Ok(());
                }
                daemonize::Outcome::Child(child) => {
                    child?;
                }
            }
        }
    }

    run(args, app_dir)
}

fn run(args: DaemonArgs, app_dir: std::path::PathBuf) -> Result<()> {
    enable_logging(DAEMON_PREFIX, &app_dir.join("logs"), args.log, args.log_console)?;
    let config = DaemonConfig::load(&app_dir)?.with_overrides(&args);
    single_thread_runtime()?.block_on(async move { start_daemon(app_dir, config).await })?;
    Ok(())
}
