use std::{io::ErrorKind, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    args::DaemonArgs,
    timer::{TimerSettings, DEFAULT_PERSIST_GRANULARITY_MS, DEFAULT_TICK_PERIOD},
};

pub const CONFIG_FILE: &str = "config.toml";

/// Daemon settings read from `config.toml` in the application directory. Every field is optional
/// in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub tick_period_ms: u64,
    pub persist_granularity_ms: u64,
    /// Localhost port of the command channel. 0 lets the OS pick one.
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_PERIOD.as_millis() as u64,
            persist_granularity_ms: DEFAULT_PERSIST_GRANULARITY_MS,
            port: 0,
        }
    }
}

impl DaemonConfig {
    /// Reads `config.toml` from `dir`. A missing file means defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                debug!("Loading config from {path:?}");
                toml::from_str(&contents).with_context(|| format!("Invalid config at {path:?}"))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn with_overrides(mut self, args: &DaemonArgs) -> Self {
        if let Some(tick_period_ms) = args.tick_period_ms {
            self.tick_period_ms = tick_period_ms;
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        self
    }

    pub fn timer_settings(&self) -> Result<TimerSettings> {
        if self.tick_period_ms == 0 {
            bail!("tick_period_ms must be positive");
        }
        if self.persist_granularity_ms == 0 {
            bail!("persist_granularity_ms must be positive");
        }
        Ok(TimerSettings {
            tick_period: Duration::from_millis(self.tick_period_ms),
            persist_granularity_ms: self.persist_granularity_ms,
        })
    }
}
