use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The only key the timer record is ever stored under.
pub const TIMER_KEY: &str = "current";

/// Store-assigned identity of counters and sessions.
pub type RecordId = u64;

/// Durable mirror of the stopwatch. Field names match the record layout used by the extension
/// so existing backups stay readable.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TimerRecord {
    #[serde(default = "timer_key")]
    pub id: Arc<str>,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub start_epoch_ms: Option<i64>,
}

fn timer_key() -> Arc<str> {
    TIMER_KEY.into()
}

impl TimerRecord {
    pub fn new(elapsed_ms: u64, running: bool, start_epoch_ms: Option<i64>) -> Self {
        Self {
            id: timer_key(),
            elapsed_ms,
            running,
            start_epoch_ms,
        }
    }

    pub fn zero() -> Self {
        Self::new(0, false, None)
    }
}

impl Default for TimerRecord {
    fn default() -> Self {
        Self::zero()
    }
}

/// A named tally. `id` is `None` until the store assigns one.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CounterRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: Arc<str>,
    pub value: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_modified: DateTime<Utc>,
}

impl CounterRecord {
    pub fn new(name: impl Into<Arc<str>>, moment: DateTime<Utc>) -> Self {
        Self {
            id: None,
            name: name.into(),
            value: 0,
            last_modified: moment,
        }
    }

    pub fn increment(&mut self, moment: DateTime<Utc>) {
        self.value = self.value.saturating_add(1);
        self.last_modified = moment;
    }

    /// Counters never go below zero. Returns whether the value changed.
    pub fn decrement(&mut self, moment: DateTime<Utc>) -> bool {
        if self.value == 0 {
            return false;
        }
        self.value -= 1;
        self.last_modified = moment;
        true
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            name: self.name.clone(),
            value: self.value,
        }
    }
}

/// Counter value captured inside a session.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct CounterSnapshot {
    pub name: Arc<str>,
    pub value: u64,
}

/// Immutable snapshot of stopwatch and counters at a point in time.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: Arc<str>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub counters: Vec<CounterSnapshot>,
    pub elapsed_ms_at_capture: u64,
}

impl SessionRecord {
    pub fn capture(
        name: impl Into<Arc<str>>,
        created_at: DateTime<Utc>,
        elapsed_ms: u64,
        counters: &[CounterRecord],
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            created_at,
            counters: counters.iter().map(CounterRecord::snapshot).collect(),
            elapsed_ms_at_capture: elapsed_ms,
        }
    }
}

/// Everything the store holds, as returned by the `backup` command.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BackupData {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub timer_state: TimerRecord,
    pub counters: Vec<CounterRecord>,
    pub sessions: Vec<SessionRecord>,
}
