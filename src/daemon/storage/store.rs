use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::fs::operations::{read_locked, update_locked};

use super::{
    collection::JsonCollection,
    entities::{CounterRecord, RecordId, SessionRecord, TimerRecord, TIMER_KEY},
    error::StoreError,
};

const TIMER_FILE: &str = "timer.json";
const COUNTERS_FILE: &str = "counters.json";
const SESSIONS_FILE: &str = "sessions.json";

/// Interface for abstracting storage of the three record kinds. Pure storage: no method looks at
/// what a record means.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Upserts the timer record. It is always stored under [TIMER_KEY], whatever `id` it carries.
    async fn put_timer(&self, record: TimerRecord) -> Result<(), StoreError>;

    async fn get_timer(&self) -> Result<Option<TimerRecord>, StoreError>;

    /// Upsert. A counter without an id is inserted and gets a fresh one.
    async fn put_counter(&self, counter: CounterRecord) -> Result<RecordId, StoreError>;

    async fn get_counter(&self, id: RecordId) -> Result<Option<CounterRecord>, StoreError>;

    async fn get_counters(&self) -> Result<Vec<CounterRecord>, StoreError>;

    /// Replaces the whole counter list in one write.
    async fn replace_counters(
        &self,
        counters: Vec<CounterRecord>,
    ) -> Result<Vec<RecordId>, StoreError>;

    async fn delete_counter(&self, id: RecordId) -> Result<(), StoreError>;

    async fn put_session(&self, session: SessionRecord) -> Result<RecordId, StoreError>;

    async fn get_session(&self, id: RecordId) -> Result<Option<SessionRecord>, StoreError>;

    /// Sessions ordered by creation time, oldest first.
    async fn get_sessions(&self) -> Result<Vec<SessionRecord>, StoreError>;

    async fn delete_session(&self, id: RecordId) -> Result<(), StoreError>;
}

/// The main realization of [Store]: one JSON document per record kind inside a directory.
/// Every access takes a file lock, so the daemon and CLI processes can share the directory.
pub struct FileStore {
    timer_path: PathBuf,
    counters: JsonCollection<CounterRecord>,
    sessions: JsonCollection<SessionRecord>,
}

impl FileStore {
    pub fn new(store_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(store_dir)?;

        Ok(Self {
            timer_path: store_dir.join(TIMER_FILE),
            counters: JsonCollection::new(store_dir.join(COUNTERS_FILE)),
            sessions: JsonCollection::new(store_dir.join(SESSIONS_FILE)),
        })
    }
}

#[async_trait]
impl Store for FileStore {
    async fn put_timer(&self, mut record: TimerRecord) -> Result<(), StoreError> {
        record.id = TIMER_KEY.into();
        let bytes = serde_json::to_vec_pretty(&record).map_err(StoreError::Serialize)?;
        update_locked(&self.timer_path, |_| async move { Ok::<_, StoreError>((bytes, ())) })
            .await?;
        debug!("Stored timer record {:?}", record);
        Ok(())
    }

    async fn get_timer(&self) -> Result<Option<TimerRecord>, StoreError> {
        match read_locked(&self.timer_path).await? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    path: self.timer_path.clone(),
                    source,
                }),
        }
    }

    async fn put_counter(&self, counter: CounterRecord) -> Result<RecordId, StoreError> {
        self.counters.put(counter).await
    }

    async fn get_counter(&self, id: RecordId) -> Result<Option<CounterRecord>, StoreError> {
        self.counters.get(id).await
    }

    async fn get_counters(&self) -> Result<Vec<CounterRecord>, StoreError> {
        self.counters.get_all().await
    }

    async fn replace_counters(
        &self,
        counters: Vec<CounterRecord>,
    ) -> Result<Vec<RecordId>, StoreError> {
        self.counters.replace_all(counters).await
    }

    async fn delete_counter(&self, id: RecordId) -> Result<(), StoreError> {
        self.counters.delete(id).await
    }

    async fn put_session(&self, session: SessionRecord) -> Result<RecordId, StoreError> {
        self.sessions.put(session).await
    }

    async fn get_session(&self, id: RecordId) -> Result<Option<SessionRecord>, StoreError> {
        self.sessions.get(id).await
    }

    async fn get_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let mut sessions = self.sessions.get_all().await?;
        sessions.sort_by_key(|v| (v.created_at, v.id));
        Ok(sessions)
    }

    async fn delete_session(&self, id: RecordId) -> Result<(), StoreError> {
        self.sessions.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use crate::daemon::storage::entities::{SessionRecord, TimerRecord};

    use super::{FileStore, Store};

    #[tokio::test]
    async fn test_timer_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path())?;

        assert_eq!(store.get_timer().await?, None);

        let mut record = TimerRecord::new(1_200, true, Some(10_000));
        record.id = "something-else".into();
        store.put_timer(record).await?;
        store.put_timer(TimerRecord::new(900, false, None)).await?;

        let stored = store.get_timer().await?.unwrap();
        assert_eq!(stored, TimerRecord::new(900, false, None));
        assert_eq!(&*stored.id, "current");
        Ok(())
    }

    #[tokio::test]
    async fn test_sessions_ordered_by_creation() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path())?;
        let at = |ms| Utc.timestamp_millis_opt(ms).unwrap();

        store
            .put_session(SessionRecord::capture("late", at(3_000), 0, &[]))
            .await?;
        let early = store
            .put_session(SessionRecord::capture("early", at(1_000), 0, &[]))
            .await?;
        store
            .put_session(SessionRecord::capture("middle", at(2_000), 0, &[]))
            .await?;

        let names = store
            .get_sessions()
            .await?
            .into_iter()
            .map(|v| v.name.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["early", "middle", "late"]);

        store.delete_session(early).await?;
        store.delete_session(early).await?;
        assert_eq!(store.get_session(early).await?, None);
        assert_eq!(store.get_sessions().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = FileStore::new(dir.path())?;
            store.put_timer(TimerRecord::new(5_000, true, Some(1))).await?;
        }
        let store = FileStore::new(dir.path())?;
        assert_eq!(
            store.get_timer().await?,
            Some(TimerRecord::new(5_000, true, Some(1)))
        );
        Ok(())
    }
}
