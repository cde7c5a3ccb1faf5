use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;

use super::{
    entities::{CounterRecord, RecordId, SessionRecord, TimerRecord, TIMER_KEY},
    error::StoreError,
    store::Store,
};

/// In-process [Store] that counts timer writes. Lets timing tests run on tokio's paused clock
/// without touching the blocking file pool.
#[derive(Default)]
pub struct MemoryStore {
    timer: Mutex<Option<TimerRecord>>,
    counters: Mutex<Vec<CounterRecord>>,
    sessions: Mutex<Vec<SessionRecord>>,
    next_id: AtomicUsize,
    timer_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn with_timer(record: TimerRecord) -> Self {
        let store = Self::default();
        *store.timer.lock().unwrap() = Some(record);
        store
    }

    pub fn timer_writes(&self) -> usize {
        self.timer_writes.load(Ordering::SeqCst)
    }

    pub fn stored_timer(&self) -> Option<TimerRecord> {
        self.timer.lock().unwrap().clone()
    }

    fn fresh_id(&self) -> RecordId {
        self.next_id.fetch_add(1, Ordering::SeqCst) as RecordId + 1
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_timer(&self, mut record: TimerRecord) -> Result<(), StoreError> {
        record.id = TIMER_KEY.into();
        *self.timer.lock().unwrap() = Some(record);
        self.timer_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_timer(&self) -> Result<Option<TimerRecord>, StoreError> {
        Ok(self.stored_timer())
    }

    async fn put_counter(&self, mut counter: CounterRecord) -> Result<RecordId, StoreError> {
        let id = *counter.id.get_or_insert_with(|| self.fresh_id());
        let mut counters = self.counters.lock().unwrap();
        counters.retain(|v| v.id != Some(id));
        counters.push(counter);
        Ok(id)
    }

    async fn get_counter(&self, id: RecordId) -> Result<Option<CounterRecord>, StoreError> {
        let counters = self.counters.lock().unwrap();
        Ok(counters.iter().find(|v| v.id == Some(id)).cloned())
    }

    async fn get_counters(&self) -> Result<Vec<CounterRecord>, StoreError> {
        Ok(self.counters.lock().unwrap().clone())
    }

    async fn replace_counters(
        &self,
        counters: Vec<CounterRecord>,
    ) -> Result<Vec<RecordId>, StoreError> {
        let counters = counters
            .into_iter()
            .map(|mut v| {
                v.id.get_or_insert_with(|| self.fresh_id());
                v
            })
            .collect::<Vec<_>>();
        let ids = counters.iter().filter_map(|v| v.id).collect();
        *self.counters.lock().unwrap() = counters;
        Ok(ids)
    }

    async fn delete_counter(&self, id: RecordId) -> Result<(), StoreError> {
        self.counters.lock().unwrap().retain(|v| v.id != Some(id));
        Ok(())
    }

    async fn put_session(&self, mut session: SessionRecord) -> Result<RecordId, StoreError> {
        let id = *session.id.get_or_insert_with(|| self.fresh_id());
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|v| v.id != Some(id));
        sessions.push(session);
        Ok(id)
    }

    async fn get_session(&self, id: RecordId) -> Result<Option<SessionRecord>, StoreError> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.iter().find(|v| v.id == Some(id)).cloned())
    }

    async fn get_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let mut sessions = self.sessions.lock().unwrap().clone();
        sessions.sort_by_key(|v| (v.created_at, v.id));
        Ok(sessions)
    }

    async fn delete_session(&self, id: RecordId) -> Result<(), StoreError> {
        self.sessions.lock().unwrap().retain(|v| v.id != Some(id));
        Ok(())
    }
}
