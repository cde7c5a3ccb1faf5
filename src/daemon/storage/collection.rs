use std::{marker::PhantomData, path::PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::fs::operations::{read_locked, update_locked};

use super::{
    entities::{CounterRecord, RecordId, SessionRecord},
    error::StoreError,
};

/// Records whose key is assigned by the store.
pub trait Keyed {
    fn id(&self) -> Option<RecordId>;

    fn set_id(&mut self, id: RecordId);
}

impl Keyed for CounterRecord {
    fn id(&self) -> Option<RecordId> {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }
}

impl Keyed for SessionRecord {
    fn id(&self) -> Option<RecordId> {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document<R> {
    #[serde(default = "first_id")]
    next_id: RecordId,
    #[serde(default = "Vec::new")]
    records: Vec<R>,
}

fn first_id() -> RecordId {
    1
}

impl<R> Default for Document<R> {
    fn default() -> Self {
        Self {
            next_id: first_id(),
            records: Vec::new(),
        }
    }
}

impl<R: Keyed> Document<R> {
    fn assign(&mut self, record: &mut R) -> RecordId {
        match record.id() {
            Some(id) => {
                self.next_id = self.next_id.max(id.saturating_add(1));
                id
            }
            None => {
                let id = self.next_id;
                self.next_id = self.next_id.saturating_add(1);
                record.set_id(id);
                id
            }
        }
    }

    fn upsert(&mut self, mut record: R) -> RecordId {
        let id = self.assign(&mut record);
        match self.records.iter_mut().find(|v| v.id() == Some(id)) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
        id
    }
}

/// A collection of auto-keyed records stored as one JSON document. Ids are never reused, even
/// after deletion.
pub struct JsonCollection<R> {
    path: PathBuf,
    _records: PhantomData<fn() -> R>,
}

impl<R> JsonCollection<R>
where
    R: Keyed + Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _records: PhantomData,
        }
    }

    fn parse(&self, contents: Option<Vec<u8>>) -> Result<Document<R>, StoreError> {
        match contents {
            None => Ok(Document::default()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Applies `change` to the stored document under an exclusive lock.
    async fn modify<T>(
        &self,
        change: impl FnOnce(&mut Document<R>) -> T,
    ) -> Result<T, StoreError> {
        update_locked(&self.path, |contents| async move {
            let mut document = self.parse(contents)?;
            let value = change(&mut document);
            let bytes = serde_json::to_vec_pretty(&document).map_err(StoreError::Serialize)?;
            Ok((bytes, value))
        })
        .await
    }

    pub async fn get_all(&self) -> Result<Vec<R>, StoreError> {
        let contents = read_locked(&self.path).await?;
        Ok(self.parse(contents)?.records)
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<R>, StoreError> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .find(|v| v.id() == Some(id)))
    }

    /// Upsert. Records without an id get a fresh one, which is returned.
    pub async fn put(&self, record: R) -> Result<RecordId, StoreError> {
        let id = self.modify(|document| document.upsert(record)).await?;
        debug!("Stored record {id} in {:?}", self.path);
        Ok(id)
    }

    /// Removing an id that is not present is not an error.
    pub async fn delete(&self, id: RecordId) -> Result<(), StoreError> {
        self.modify(|document| document.records.retain(|v| v.id() != Some(id)))
            .await
    }

    /// Replaces every record. Records without an id are assigned one.
    pub async fn replace_all(&self, records: Vec<R>) -> Result<Vec<RecordId>, StoreError> {
        self.modify(|document| {
            document.records.clear();
            records
                .into_iter()
                .map(|record| document.upsert(record))
                .collect()
        })
        .await
    }
}
