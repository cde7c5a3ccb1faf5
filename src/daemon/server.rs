use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{
    codec::{Framed, LinesCodec},
    sync::CancellationToken,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::utils::clock::Clock;

use super::{
    protocol::{Ack, BackupReply, Request},
    storage::{entities::BackupData, store::Store},
    timer::service::{TimerHandle, Transition},
};

/// File inside the application directory holding the address the daemon listens on.
pub const ADDRESS_FILE: &str = "daemon.addr";

/// Requests are tiny; anything longer than this is not a client of ours.
const MAX_LINE_LENGTH: usize = 64 * 1024;

pub fn address_file(dir: &Path) -> PathBuf {
    dir.join(ADDRESS_FILE)
}

pub fn read_address(dir: &Path) -> Result<SocketAddr> {
    let path = address_file(dir);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("No daemon address at {path:?}, is the daemon running?"))?;
    contents
        .trim()
        .parse()
        .with_context(|| format!("Malformed daemon address in {path:?}"))
}

/// Everything a connection needs to answer requests.
#[derive(Clone)]
pub struct Responder {
    handle: TimerHandle,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Responder {
    pub fn new(handle: TimerHandle, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            handle,
            store,
            clock,
        }
    }

    /// Answers one request line. Never fails: problems are reported inside the reply.
    pub async fn respond(&self, line: &str) -> String {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!("Received {request:?}");
                self.dispatch(request).await
            }
            Err(e) => {
                warn!("Rejecting malformed request {line:?}: {e}");
                encode(&Ack::failed(format!("Malformed request: {e}")))
            }
        }
    }

    async fn dispatch(&self, request: Request) -> String {
        let transition = match request {
            Request::GetState => {
                return match self.handle.query().await {
                    Ok(snapshot) => encode(&snapshot),
                    Err(e) => encode(&Ack::failed(e)),
                };
            }
            Request::Backup => {
                return match self.backup().await {
                    Ok(data) => encode(&BackupReply {
                        success: true,
                        data: Some(data),
                        error: None,
                    }),
                    Err(e) => {
                        error!("Error creating backup {e:?}");
                        encode(&BackupReply {
                            success: false,
                            data: None,
                            error: Some(e.to_string()),
                        })
                    }
                };
            }
            Request::Start => Transition::Start,
            Request::Stop => Transition::Stop,
            Request::Reset => Transition::Reset,
            Request::SetElapsed { elapsed_ms } => Transition::SetElapsed(elapsed_ms),
        };

        match self.handle.apply(transition).await {
            Ok(_) => encode(&Ack::ok()),
            Err(e) => encode(&Ack::failed(e)),
        }
    }

    /// The timer part comes from the authority, not the store: in-memory state is the truth.
    async fn backup(&self) -> Result<BackupData> {
        let timer_state = self.handle.record().await?;
        let counters = self.store.get_counters().await?;
        let sessions = self.store.get_sessions().await?;
        Ok(BackupData {
            timestamp: self.clock.time(),
            timer_state,
            counters,
            sessions,
        })
    }
}

fn encode(reply: &impl Serialize) -> String {
    serde_json::to_string(reply).unwrap_or_else(|e| {
        error!("Failed to encode reply: {e}");
        r#"{"success":false,"error":"Failed to encode reply"}"#.into()
    })
}

/// Accepts client connections on localhost and answers newline-delimited JSON requests.
pub struct CommandServer {
    listener: TcpListener,
    responder: Responder,
    shutdown: CancellationToken,
}

impl CommandServer {
    pub fn new(listener: TcpListener, responder: Responder, shutdown: CancellationToken) -> Self {
        Self {
            listener,
            responder,
            shutdown,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Writes the listening address where clients look for it.
    pub fn publish_address(&self, dir: &Path) -> Result<()> {
        let address = self.local_addr()?;
        std::fs::write(address_file(dir), address.to_string())?;
        info!("Listening on {address}");
        Ok(())
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let responder = self.responder.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(
                        async move {
                            if let Err(e) = serve_connection(stream, responder, shutdown).await {
                                warn!("Connection ended with an error {e:?}");
                            }
                        }
                        .instrument(info_span!("connection", %peer)),
                    );
                }
                Err(e) => error!("Failed to accept a connection {e:?}"),
            }
        }
        info!("Command server stopped");
        Ok(())
    }
}

pub fn remove_address(dir: &Path) {
    match std::fs::remove_file(address_file(dir)) {
        Ok(_) => (),
        Err(e) if e.kind() == ErrorKind::NotFound => (),
        Err(e) => warn!("Failed to remove daemon address file {e:?}"),
    }
}

async fn serve_connection(
    stream: TcpStream,
    responder: Responder,
    shutdown: CancellationToken,
) -> Result<()> {
    debug!("Client connected");
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next() => line,
        };
        let Some(line) = line else {
            break;
        };
        let reply = responder.respond(&line?).await;
        lines.send(reply).await?;
    }
    debug!("Client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::Utc;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::{
        codec::{Framed, LinesCodec},
        sync::CancellationToken,
    };

    use crate::{
        daemon::{
            mirror::mirror_channel,
            storage::{
                entities::{CounterRecord, SessionRecord},
                memory::MemoryStore,
                store::{MockStore, Store},
                error::StoreError,
            },
            timer::{service::TimerService, TimerSettings},
        },
        utils::clock::DefaultClock,
    };

    use super::{CommandServer, Responder};

    fn responder_for(store: Arc<dyn Store>, shutdown: &CancellationToken) -> Responder {
        // The mirror is irrelevant here; the receiver is dropped and submissions are discarded.
        let (mirror, _) = mirror_channel();
        let mut service = TimerService::new(
            TimerSettings::default(),
            Arc::new(DefaultClock),
            mirror,
            shutdown.clone(),
        );
        service.restore(None);
        let responder = Responder::new(service.handle(), store, Arc::new(DefaultClock));
        tokio::spawn(service.run());
        responder
    }

    async fn ask(responder: &Responder, request: Value) -> Value {
        serde_json::from_str(&responder.respond(&request.to_string()).await).unwrap()
    }

    #[tokio::test]
    async fn test_command_replies() {
        let shutdown = CancellationToken::new();
        let responder = responder_for(Arc::new(MemoryStore::default()), &shutdown);

        assert_eq!(
            ask(&responder, json!({"action": "getState"})).await,
            json!({"elapsedMs": 0, "running": false})
        );
        assert_eq!(
            ask(&responder, json!({"action": "start"})).await,
            json!({"success": true})
        );
        assert_eq!(ask(&responder, json!({"action": "getState"})).await["running"], true);
        assert_eq!(
            ask(&responder, json!({"action": "stop"})).await,
            json!({"success": true})
        );
        assert_eq!(
            ask(&responder, json!({"action": "setElapsed", "elapsedMs": 4200})).await,
            json!({"success": true})
        );
        assert_eq!(
            ask(&responder, json!({"action": "getState"})).await,
            json!({"elapsedMs": 4200, "running": false})
        );
        assert_eq!(
            ask(&responder, json!({"action": "reset"})).await,
            json!({"success": true})
        );
        assert_eq!(
            ask(&responder, json!({"action": "getState"})).await,
            json!({"elapsedMs": 0, "running": false})
        );
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let shutdown = CancellationToken::new();
        let responder = responder_for(Arc::new(MemoryStore::default()), &shutdown);

        let reply: Value = serde_json::from_str(&responder.respond("{\"action\":").await).unwrap();
        assert_eq!(reply["success"], false);
        assert!(reply["error"].is_string());

        let reply = ask(&responder, json!({"action": "launch"})).await;
        assert_eq!(reply["success"], false);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_backup_collects_everything() -> Result<()> {
        let shutdown = CancellationToken::new();
        let store = Arc::new(MemoryStore::default());
        let mut counter = CounterRecord::new("laps", Utc::now());
        counter.increment(Utc::now());
        store.put_counter(counter.clone()).await?;
        store
            .put_session(SessionRecord::capture("run", Utc::now(), 1_000, &[counter]))
            .await?;
        let responder = responder_for(store, &shutdown);

        ask(&responder, json!({"action": "setElapsed", "elapsedMs": 777})).await;
        let reply = ask(&responder, json!({"action": "backup"})).await;

        assert_eq!(reply["success"], true);
        let data = &reply["data"];
        assert_eq!(data["timerState"]["id"], "current");
        assert_eq!(data["timerState"]["elapsedMs"], 777);
        assert_eq!(data["counters"][0]["name"], "laps");
        assert_eq!(data["counters"][0]["value"], 1);
        assert_eq!(data["sessions"][0]["counters"][0]["value"], 1);
        assert!(data["timestamp"].is_i64());
        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_failure_is_reported() {
        let shutdown = CancellationToken::new();
        let mut store = MockStore::new();
        store
            .expect_get_counters()
            .returning(|| Err(StoreError::Io(std::io::Error::other("unreadable"))));
        let responder = responder_for(Arc::new(store), &shutdown);

        let reply = ask(&responder, json!({"action": "backup"})).await;
        assert_eq!(reply["success"], false);
        assert!(reply["error"].as_str().unwrap().contains("unreadable"));
        assert!(reply.get("data").is_none());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_socket_roundtrip() -> Result<()> {
        let shutdown = CancellationToken::new();
        let responder = responder_for(Arc::new(MemoryStore::default()), &shutdown);
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let server = CommandServer::new(listener, responder, shutdown.clone());
        let address = server.local_addr()?;
        let server = tokio::spawn(server.run());

        let mut lines = Framed::new(TcpStream::connect(address).await?, LinesCodec::new());
        for request in [json!({"action": "start"}), json!({"action": "getState"})] {
            lines.send(request.to_string()).await?;
        }
        let started: Value = serde_json::from_str(&lines.next().await.unwrap()?)?;
        let state: Value = serde_json::from_str(&lines.next().await.unwrap()?)?;
        assert_eq!(started, json!({"success": true}));
        assert_eq!(state["running"], true);

        shutdown.cancel();
        server.await??;
        Ok(())
    }
}
