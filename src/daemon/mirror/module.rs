use std::future::Future;

use crate::daemon::storage::{entities::TimerRecord, error::StoreError};

/// Destination of mirrored timer state. Realistically this abstracts over where the durable copy
/// lives; the daemon only ever uses [StoreWriter](super::store_writer::StoreWriter).
pub trait RecordWriter {
    fn write(&mut self, record: TimerRecord) -> impl Future<Output = Result<(), StoreError>> + Send;
}
