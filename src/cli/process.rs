use std::{
    env,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{anyhow, bail, Result};
use sysinfo::{get_current_pid, Signal, System};
use tracing::{debug, info};

use super::daemon_path::to_daemon_path;

pub fn current_daemon_path() -> Result<PathBuf> {
    Ok(to_daemon_path(env::current_exe()?))
}

/// Stops every process running the executable at `name` and waits for each to exit. A daemon
/// handles SIGTERM by flushing its timer state first. Returns how many were stopped.
pub fn kill_previous_servers(name: &Path) -> Result<usize> {
    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't find own process id: {e}"))?;
    let mut stopped = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            debug!("Stopping daemon {pid}");
            // On Windows there is no SIGTERM; this falls back to a forced kill.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            stopped += 1;
        }
    }
    Ok(stopped)
}

/// Stops previous daemons and starts a new detached one for `dir`.
pub fn restart_server(dir: Option<&Path>) -> Result<()> {
    let daemon_path = current_daemon_path()?;
    if !daemon_path.exists() {
        bail!("Daemon executable not found at {daemon_path:?}");
    }
    let stopped = kill_previous_servers(&daemon_path)?;
    if stopped > 0 {
        info!("Stopped {stopped} previous daemon(s)");
    }

    let mut command = Command::new(&daemon_path);
    if let Some(dir) = dir {
        command.arg("--dir").arg(dir);
    }
    command.stdin(Stdio::null());

    // On unix the daemon detaches itself and the launched process exits right away.
    #[cfg(unix)]
    {
        let status = command.status()?;
        if !status.success() {
            bail!("Daemon failed to start: {status}");
        }
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;

        command.arg("--force");
        command.creation_flags(DETACHED_PROCESS);
        command.stdout(Stdio::null());
        #[allow(clippy::zombie_processes)]
        let _ = command.spawn()?;
    }

    println!("Started daemon");
    Ok(())
}
