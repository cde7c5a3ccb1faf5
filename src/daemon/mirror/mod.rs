use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use module::RecordWriter;

use super::storage::entities::TimerRecord;

pub mod module;
pub mod store_writer;

/// Creates the channel between the timer authority and the mirror writer.
pub fn mirror_channel() -> (MirrorSender, UnboundedReceiver<TimerRecord>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (MirrorSender(sender), receiver)
}

/// Fire-and-forget side of the mirror. Submitting never waits for the write.
#[derive(Clone)]
pub struct MirrorSender(UnboundedSender<TimerRecord>);

impl MirrorSender {
    pub fn submit(&self, record: TimerRecord) {
        if let Err(e) = self.0.send(record) {
            warn!("Mirror writer is gone, dropping {:?}", e.0);
        }
    }
}

/// Copies timer state into durable storage. Runs until every [MirrorSender] is dropped, then
/// drains what is left. Failed writes are logged and skipped; the next record reconciles the
/// store.
pub struct MirrorModule<Writer> {
    receiver: UnboundedReceiver<TimerRecord>,
    writer: Writer,
}

impl<W: RecordWriter> MirrorModule<W> {
    pub fn new(receiver: UnboundedReceiver<TimerRecord>, writer: W) -> Self {
        Self { receiver, writer }
    }

    pub async fn run(mut self) {
        while let Some(mut record) = self.receiver.recv().await {
            // Only the newest state matters once several are queued.
            while let Ok(newer) = self.receiver.try_recv() {
                record = newer;
            }
            debug!("Mirroring {:?}", record);
            match self.writer.write(record.clone()).await {
                Ok(_) => debug!("Mirrored {:?}", record),
                Err(e) => error!("Failed to mirror timer state {:?}: {e:?}", record),
            }
        }
        info!("Mirror writer finished");
    }
}
