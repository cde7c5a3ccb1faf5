use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use crate::daemon::{
    protocol::{Ack, BackupReply, Request},
    server::read_address,
    storage::entities::BackupData,
    timer::TimerSnapshot,
};

/// What the CLI needs from the timer authority. Lets session handling be tested without a
/// daemon.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimerControl: Send {
    async fn state(&mut self) -> Result<TimerSnapshot>;

    /// Sends a request that is answered with a plain acknowledgement.
    async fn apply(&mut self, request: Request) -> Result<()>;

    async fn backup(&mut self) -> Result<BackupData>;
}

/// Connection to a running daemon's command channel.
pub struct DaemonClient {
    lines: Framed<TcpStream, LinesCodec>,
}

impl DaemonClient {
    pub async fn connect(app_dir: &Path) -> Result<Self> {
        let address = read_address(app_dir)?;
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("Daemon is not answering on {address}, try `init`"))?;
        debug!("Connected to daemon at {address}");
        Ok(Self {
            lines: Framed::new(stream, LinesCodec::new()),
        })
    }

    async fn request<T: DeserializeOwned>(&mut self, request: Request) -> Result<T> {
        self.lines.send(serde_json::to_string(&request)?).await?;
        let line = self
            .lines
            .next()
            .await
            .ok_or_else(|| anyhow!("Daemon closed the connection"))??;
        debug!("Daemon replied {line}");

        let reply: Value = serde_json::from_str(&line)?;
        if reply.get("success") == Some(&Value::Bool(false)) {
            let error = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("Daemon refused {request:?}: {error}");
        }
        Ok(serde_json::from_value(reply)?)
    }
}

#[async_trait]
impl TimerControl for DaemonClient {
    async fn state(&mut self) -> Result<TimerSnapshot> {
        self.request(Request::GetState).await
    }

    async fn apply(&mut self, request: Request) -> Result<()> {
        let _: Ack = self.request(request).await?;
        Ok(())
    }

    async fn backup(&mut self) -> Result<BackupData> {
        let reply: BackupReply = self.request(Request::Backup).await?;
        reply
            .data
            .ok_or_else(|| anyhow!("Daemon sent an empty backup"))
    }
}
