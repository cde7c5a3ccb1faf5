//! The timer authority: sole owner and writer of the stopwatch state.
//!
//! ```text
//! Stopped --start--> Running --stop--> Stopped
//!    ^                  |
//!    +------reset-------+
//! ```
//!
//! Elapsed time is always derived from the wall clock (`now - start_epoch_ms`), never accumulated
//! from tick counts, so a late or skipped tick costs display freshness but never accuracy.

pub mod service;
pub mod ticker;

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{daemon::mirror::MirrorSender, utils::clock::Clock};

use super::storage::entities::TimerRecord;
use ticker::{Tick, Ticker};

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(100);
pub const DEFAULT_PERSIST_GRANULARITY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    /// How often elapsed time is recomputed while running.
    pub tick_period: Duration,
    /// Ticks persist only when elapsed time crosses a multiple of this many milliseconds.
    pub persist_granularity_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            persist_granularity_ms: DEFAULT_PERSIST_GRANULARITY_MS,
        }
    }
}

/// What clients see when they ask for the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub elapsed_ms: u64,
    pub running: bool,
}

/// The start epoch only exists while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Running { start_epoch_ms: i64 },
}

pub struct TimerAuthority {
    elapsed_ms: u64,
    phase: Phase,
    /// Elapsed value carried by the most recent record handed to the mirror.
    last_persisted_ms: u64,
    ticker: Option<Ticker>,
    next_generation: u64,
    settings: TimerSettings,
    clock: Arc<dyn Clock>,
    mirror: MirrorSender,
    ticks: mpsc::Sender<Tick>,
}

impl TimerAuthority {
    pub fn new(
        settings: TimerSettings,
        clock: Arc<dyn Clock>,
        mirror: MirrorSender,
        ticks: mpsc::Sender<Tick>,
    ) -> Self {
        Self {
            elapsed_ms: 0,
            phase: Phase::Stopped,
            last_persisted_ms: 0,
            ticker: None,
            next_generation: 0,
            settings,
            clock,
            mirror,
            ticks,
        }
    }

    pub fn query(&self) -> TimerSnapshot {
        TimerSnapshot {
            elapsed_ms: self.elapsed_ms,
            running: self.is_running(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    /// The state in its persisted shape.
    pub fn record(&self) -> TimerRecord {
        let start_epoch_ms = match self.phase {
            Phase::Running { start_epoch_ms } => Some(start_epoch_ms),
            Phase::Stopped => None,
        };
        TimerRecord::new(self.elapsed_ms, self.is_running(), start_epoch_ms)
    }

    /// Adopts the state found in the store at process start. With no record this is the first
    /// activation and a zeroed record is written. A running record resumes from its own start
    /// epoch, so the time the process spent unloaded counts as elapsed.
    pub fn restore(&mut self, persisted: Option<TimerRecord>) {
        self.cancel_ticker();
        let Some(record) = persisted else {
            info!("No persisted timer state, starting from zero");
            self.elapsed_ms = 0;
            self.phase = Phase::Stopped;
            self.persist();
            return;
        };

        self.elapsed_ms = record.elapsed_ms;
        self.last_persisted_ms = record.elapsed_ms;
        if !record.running {
            self.phase = Phase::Stopped;
            info!("Restored stopped timer at {}ms", self.elapsed_ms);
            return;
        }

        let now = self.clock.epoch_ms();
        let start_epoch_ms = match record.start_epoch_ms {
            Some(start) if start <= now => start,
            other => {
                warn!("Persisted start epoch {other:?} is unusable, resuming from elapsed time");
                start_epoch_for(now, self.elapsed_ms)
            }
        };
        self.phase = Phase::Running { start_epoch_ms };
        self.recompute();
        info!(
            "Resumed running timer, {}ms elapsed since {start_epoch_ms}",
            self.elapsed_ms
        );
        self.spawn_ticker();
        self.persist();
    }

    /// Returns whether anything changed. Starting a running timer is a no-op.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            debug!("Start ignored, timer is already running");
            return false;
        }
        let start_epoch_ms = start_epoch_for(self.clock.epoch_ms(), self.elapsed_ms);
        self.phase = Phase::Running { start_epoch_ms };
        info!("Timer started at {}ms", self.elapsed_ms);
        self.persist();
        self.spawn_ticker();
        true
    }

    /// Returns whether anything changed. Stopping a stopped timer is a no-op.
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            debug!("Stop ignored, timer is not running");
            return false;
        }
        self.recompute();
        self.cancel_ticker();
        self.phase = Phase::Stopped;
        info!("Timer stopped at {}ms", self.elapsed_ms);
        self.persist();
        true
    }

    pub fn reset(&mut self) {
        self.cancel_ticker();
        self.elapsed_ms = 0;
        self.phase = Phase::Stopped;
        info!("Timer reset");
        self.persist();
    }

    /// Replaces the elapsed time and leaves the timer stopped. Used when a saved session is
    /// loaded back.
    pub fn set_elapsed(&mut self, elapsed_ms: u64) {
        self.cancel_ticker();
        self.elapsed_ms = elapsed_ms;
        self.phase = Phase::Stopped;
        info!("Timer set to {elapsed_ms}ms");
        self.persist();
    }

    /// Recomputes elapsed time. Persists only when a granularity boundary was crossed since the
    /// last persisted value, which bounds writes to roughly one per boundary.
    pub fn tick(&mut self, tick: Tick) {
        let current = self.ticker.as_ref().map(Ticker::generation);
        if current != Some(tick.generation) {
            debug!("Ignoring stale tick from generation {}", tick.generation);
            return;
        }
        self.recompute();

        let granularity = self.settings.persist_granularity_ms.max(1);
        if self.elapsed_ms / granularity != self.last_persisted_ms / granularity {
            self.persist();
        }
    }

    /// Final flush before the process goes away. A running timer stays running in the record so
    /// the next start resumes it.
    pub fn shutdown(&mut self) {
        self.cancel_ticker();
        if self.is_running() {
            self.recompute();
        }
        info!("Timer authority shutting down at {}ms", self.elapsed_ms);
        self.persist();
    }

    fn recompute(&mut self) {
        if let Phase::Running { start_epoch_ms } = self.phase {
            let measured = self.clock.epoch_ms().saturating_sub(start_epoch_ms).max(0) as u64;
            // A wall clock stepping backwards must not make the stopwatch run backwards.
            self.elapsed_ms = self.elapsed_ms.max(measured);
        }
    }

    fn persist(&mut self) {
        self.last_persisted_ms = self.elapsed_ms;
        self.mirror.submit(self.record());
    }

    fn spawn_ticker(&mut self) {
        self.cancel_ticker();
        let generation = self.next_generation;
        self.next_generation += 1;
        self.ticker = Some(Ticker::spawn(
            generation,
            self.settings.tick_period,
            self.clock.clone(),
            self.ticks.clone(),
        ));
    }

    fn cancel_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            debug!("Cancelling ticker {}", ticker.generation());
        }
    }
}

/// The epoch a run must have started at to have accumulated `elapsed_ms` by `now`. Elapsed
/// values beyond the epoch range pin the start to the earliest representable moment.
fn start_epoch_for(now: i64, elapsed_ms: u64) -> i64 {
    now.saturating_sub(i64::try_from(elapsed_ms).unwrap_or(i64::MAX))
}
