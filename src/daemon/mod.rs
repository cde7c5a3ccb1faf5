use std::{net::Ipv4Addr, path::PathBuf, sync::Arc};

use anyhow::Result;
use config::DaemonConfig;
use mirror::{mirror_channel, store_writer::StoreWriter, MirrorModule};
use server::{remove_address, CommandServer, Responder};
use storage::{
    entities::TimerRecord,
    store::{FileStore, Store},
};
use timer::service::TimerService;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::utils::clock::{Clock, DefaultClock};

pub mod args;
pub mod config;
pub mod mirror;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod storage;
pub mod timer;

/// Subdirectory of the application directory holding the record documents.
pub const STORE_DIR: &str = "store";

/// Represents the starting point for the daemon. Runs until Ctrl-C or SIGTERM.
pub async fn start_daemon(dir: PathBuf, config: DaemonConfig) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let (_, result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        run_daemon(dir, config, Arc::new(DefaultClock), shutdown_token.clone()),
    );
    result
}

/// Wires store, mirror, timer service and command server together and runs them until
/// `shutdown_token` is cancelled.
pub async fn run_daemon(
    dir: PathBuf,
    config: DaemonConfig,
    clock: Arc<dyn Clock>,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let settings = config.timer_settings()?;
    let store: Arc<dyn Store> = Arc::new(FileStore::new(&dir.join(STORE_DIR))?);

    let (mirror, mirror_receiver) = mirror_channel();
    let mirror_module = MirrorModule::new(mirror_receiver, StoreWriter::new(store.clone()));

    let mut service = TimerService::new(settings, clock.clone(), mirror, shutdown_token.clone());
    service.restore(load_persisted(store.as_ref()).await);

    let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            // The service already resumed a running timer; let it flush before bailing out.
            shutdown_token.cancel();
            tokio::join!(service.run(), mirror_module.run());
            return Err(e.into());
        }
    };
    let responder = Responder::new(service.handle(), store.clone(), clock);
    let server = CommandServer::new(listener, responder, shutdown_token.clone());
    server.publish_address(&dir)?;

    let (_, _, server_result) = tokio::join!(service.run(), mirror_module.run(), server.run());

    remove_address(&dir);
    if let Err(e) = &server_result {
        error!("Command server got an error {e:?}");
    }
    info!("Daemon stopped");
    server_result
}

/// A store that can't be read is not fatal: the timer starts from zero and the first write
/// replaces whatever was there.
async fn load_persisted(store: &dyn Store) -> Option<TimerRecord> {
    match store.get_timer().await {
        Ok(record) => record,
        Err(e) => {
            error!("Failed to load persisted timer state, starting from zero {e:?}");
            None
        }
    }
}
