use std::sync::Arc;

use crate::daemon::storage::{entities::TimerRecord, error::StoreError, store::Store};

use super::module::RecordWriter;

/// Bridges [MirrorModule](super::MirrorModule) and [Store].
pub struct StoreWriter {
    store: Arc<dyn Store>,
}

impl StoreWriter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl RecordWriter for StoreWriter {
    async fn write(&mut self, record: TimerRecord) -> Result<(), StoreError> {
        self.store.put_timer(record).await
    }
}
