use std::sync::Arc;

use ansi_term::Style;
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;

use crate::{
    daemon::storage::{
        entities::{CounterRecord, RecordId},
        store::Store,
    },
    utils::time::to_local_display,
};

#[derive(Subcommand, Debug)]
pub enum CounterCommand {
    #[command(about = "Create a counter starting at zero")]
    Add { name: String },
    #[command(about = "Increase a counter by one")]
    Inc { id: RecordId },
    #[command(about = "Decrease a counter by one. Counters stop at zero")]
    Dec { id: RecordId },
    #[command(about = "Give a counter a new name")]
    Rename { id: RecordId, name: String },
    #[command(about = "Remove a counter")]
    Delete { id: RecordId },
    #[command(about = "Show all counters")]
    List,
}

pub async fn process_counter_command(
    command: CounterCommand,
    store: &dyn Store,
    now: DateTime<Utc>,
) -> Result<()> {
    match command {
        CounterCommand::Add { name } => {
            let id = add_counter(store, &name, now).await?;
            println!("Added counter {id}");
        }
        CounterCommand::Inc { id } => {
            let counter = update_counter(store, id, |v| {
                v.increment(now);
                true
            })
            .await?;
            print_counter(&counter);
        }
        CounterCommand::Dec { id } => {
            let counter = update_counter(store, id, |v| v.decrement(now)).await?;
            print_counter(&counter);
        }
        CounterCommand::Rename { id, name } => {
            let name = validate_name(&name)?;
            let counter = update_counter(store, id, |v| {
                v.name = name;
                v.last_modified = now;
                true
            })
            .await?;
            print_counter(&counter);
        }
        CounterCommand::Delete { id } => {
            store.delete_counter(id).await?;
            println!("Deleted counter {id}");
        }
        CounterCommand::List => {
            let counters = store.get_counters().await?;
            if counters.is_empty() {
                println!("No counters yet");
            }
            for counter in counters {
                print_counter(&counter);
            }
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<Arc<str>> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Counter name can't be empty");
    }
    Ok(name.into())
}

pub async fn add_counter(store: &dyn Store, name: &str, now: DateTime<Utc>) -> Result<RecordId> {
    let name = validate_name(name)?;
    Ok(store.put_counter(CounterRecord::new(name, now)).await?)
}

/// Loads a counter, applies `change` and writes it back if `change` reports a modification.
pub async fn update_counter(
    store: &dyn Store,
    id: RecordId,
    change: impl FnOnce(&mut CounterRecord) -> bool,
) -> Result<CounterRecord> {
    let mut counter = store
        .get_counter(id)
        .await?
        .ok_or_else(|| anyhow!("No counter with id {id}"))?;
    if change(&mut counter) {
        store.put_counter(counter.clone()).await?;
    }
    Ok(counter)
}

fn print_counter(counter: &CounterRecord) {
    println!(
        "{:>4}  {:<24} {:>6}  {}",
        counter.id.map(|v| v.to_string()).unwrap_or_default(),
        Style::new().bold().paint(counter.name.as_ref()),
        counter.value,
        to_local_display(counter.last_modified)
    );
}
