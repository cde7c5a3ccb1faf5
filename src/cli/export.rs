use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Local, Utc};
use tracing::info;

use crate::{
    daemon::storage::{entities::CounterRecord, store::Store},
    utils::time::{format_elapsed, to_local_display},
};

use super::client::TimerControl;

const HEADER: &str = "Name,Value,Timestamp,Elapsed Time";

pub fn default_export_name(now: DateTime<Utc>) -> String {
    format!(
        "stopwatch-counters-{}.csv",
        now.with_timezone(&Local).format("%Y-%m-%d")
    )
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// One row per counter. Every row carries the same stopwatch time.
pub fn counters_csv(counters: &[CounterRecord], elapsed_ms: u64) -> String {
    let elapsed = format_elapsed(elapsed_ms);
    let mut csv = String::from(HEADER);
    csv.push('\n');
    for counter in counters {
        csv.push_str(&format!(
            "{},{},{},{}\n",
            quote(&counter.name),
            counter.value,
            quote(&to_local_display(counter.last_modified)),
            elapsed
        ));
    }
    csv
}

/// Writes the counters to `out`, or to a dated file in the current directory.
pub async fn export_counters(
    store: &dyn Store,
    timer: &mut dyn TimerControl,
    out: Option<&Path>,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let counters = store.get_counters().await?;
    if counters.is_empty() {
        bail!("There are no counters to export");
    }
    let elapsed_ms = timer.state().await?.elapsed_ms;

    let path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(default_export_name(now)));
    tokio::fs::write(&path, counters_csv(&counters, elapsed_ms)).await?;
    info!("Exported {} counters to {path:?}", counters.len());
    Ok(path)
}
