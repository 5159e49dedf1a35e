//! In-memory metadata store.
//!
//! Stores all metadata in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<HashMap>` for thread-safe access.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::store::{FileId, FileQuery, FileRecord, FileUpdate, MetadataStore, NewFileRecord};

#[derive(Debug)]
struct Entry {
    /// Insertion order, to break `uploaded_at` ties.
    seq: u64,
    record: FileRecord,
}

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<FileId, Entry>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn create(
        &self,
        record: NewFileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>> {
        Box::pin(async move {
            let created = FileRecord {
                id: Uuid::new_v4(),
                filename: record.filename,
                storage_key: record.storage_key,
                provider: record.provider,
                owner: record.owner,
                access_list: record.access_list,
                delete_on_access_by: record.delete_on_access_by,
                uploaded_at: Utc::now(),
                deleted_at: None,
            };
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.files.insert(
                created.id,
                Entry {
                    seq,
                    record: created.clone(),
                },
            );
            Ok(created)
        })
    }

    fn find_by_id(
        &self,
        id: FileId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.files.get(&id).map(|e| e.record.clone()))
        })
    }

    fn find_all(
        &self,
        query: FileQuery,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FileRecord>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let mut matched: Vec<&Entry> = inner
                .files
                .values()
                .filter(|e| query.matches(&e.record))
                .collect();
            matched.sort_by(|a, b| {
                b.record
                    .uploaded_at
                    .cmp(&a.record.uploaded_at)
                    .then(b.seq.cmp(&a.seq))
            });
            Ok(matched.into_iter().map(|e| e.record.clone()).collect())
        })
    }

    fn update(
        &self,
        id: FileId,
        update: FileUpdate,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Ok(match inner.files.get_mut(&id) {
                Some(entry) => update.apply(&mut entry.record),
                None => false,
            })
        })
    }

    fn hard_remove(
        &self,
        id: FileId,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let expired = inner
                .files
                .get(&id)
                .is_some_and(|entry| FileQuery::deleted_before(cutoff).matches(&entry.record));
            if expired {
                inner.files.remove(&id);
            }
            Ok(expired)
        })
    }
}
