//! File lifecycle engine.
//!
//! Owns upload, listing, access-gated download, soft-delete, restore and
//! cleanup.  A record moves `Active -> SoftDeleted -> purged`, and back
//! from `SoftDeleted` to `Active` on restore.  Every state change runs
//! under the record's lock from [`RecordLocks`].

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, TryStreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::errors::GatewayError;
use crate::identity::Caller;
use crate::locks::RecordLocks;
use crate::metadata::store::{FileId, FileQuery, FileRecord, FileUpdate, MetadataStore, NewFileRecord};
use crate::metrics::{record_batch_outcome, record_file_operation};
use crate::storage::backend::ByteStream;
use crate::storage::keys::KeyGenerator;
use crate::storage::registry::ProviderRegistry;

/// Download body handed to the transport.
pub type DownloadStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// Characters left bare in an RFC 5987 `filename*` value.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Bytes and display name for a new file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub data: Bytes,
    pub access_list: Option<String>,
    pub delete_on_access_by: Option<String>,
}

/// A successful download: the record as it was when access was granted,
/// plus its byte stream.
pub struct Download {
    pub record: FileRecord,
    pub body: DownloadStream,
}

impl Download {
    /// `Content-Disposition` value naming the original file.
    pub fn content_disposition(&self) -> String {
        content_disposition(&self.record.filename)
    }

    /// Drain the body into memory.
    pub async fn collect(mut self) -> Result<Bytes, GatewayError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

/// One record a batch could not process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub id: FileId,
    pub provider: String,
    pub storage_key: String,
    pub error: String,
}

/// Outcome of a cleanup run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub purged: Vec<FileId>,
    pub failures: Vec<RecordFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct FileService {
    metadata: Arc<dyn MetadataStore>,
    providers: Arc<ProviderRegistry>,
    locks: Arc<RecordLocks>,
    keys: Arc<KeyGenerator>,
    retention: chrono::Duration,
}

impl FileService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        providers: Arc<ProviderRegistry>,
        locks: Arc<RecordLocks>,
        keys: Arc<KeyGenerator>,
        retention_days: u32,
    ) -> Self {
        Self {
            metadata,
            providers,
            locks,
            keys,
            retention: chrono::Duration::days(i64::from(retention_days)),
        }
    }

    // -- Upload ---------------------------------------------------------------

    /// Store `request.data` on a randomly chosen provider and record it.
    ///
    /// If the record cannot be created the just-written object is deleted
    /// before the error is returned.
    pub async fn upload(
        &self,
        caller: &Caller,
        request: UploadRequest,
    ) -> Result<FileRecord, GatewayError> {
        let result = self.upload_inner(caller, request).await;
        record_file_operation("upload", result.is_ok());
        result
    }

    async fn upload_inner(
        &self,
        caller: &Caller,
        request: UploadRequest,
    ) -> Result<FileRecord, GatewayError> {
        if request.filename.trim().is_empty() {
            return Err(GatewayError::validation("uploaded file has no filename"));
        }

        let provider = self.providers.select()?;
        let adapter = self.providers.resolve(&provider)?;
        let storage_key = self.keys.generate(&request.filename);
        let size = request.data.len();

        if let Err(e) = adapter.put(&storage_key, request.data).await {
            warn!(provider = %provider, key = %storage_key, "upload failed: {e}");
            return Err(e.into());
        }

        let created = self
            .metadata
            .create(NewFileRecord {
                filename: request.filename,
                storage_key: storage_key.clone(),
                provider: provider.clone(),
                owner: caller.name.clone(),
                access_list: non_empty(request.access_list),
                delete_on_access_by: non_empty(request.delete_on_access_by),
            })
            .await;

        match created {
            Ok(record) => {
                info!(
                    id = %record.id,
                    provider = %provider,
                    key = %storage_key,
                    size,
                    owner = %caller.name,
                    "file uploaded"
                );
                Ok(record)
            }
            Err(e) => {
                if let Err(rollback) = adapter.delete(&storage_key).await {
                    error!(
                        provider = %provider,
                        key = %storage_key,
                        "orphaned object after metadata failure, rollback failed: {rollback}"
                    );
                }
                Err(GatewayError::Internal(e.context("recording uploaded file")))
            }
        }
    }

    // -- Queries --------------------------------------------------------------

    /// Active records the caller owns or has been granted, newest first.
    pub async fn list(&self, caller: &Caller) -> Result<Vec<FileRecord>, GatewayError> {
        Ok(self
            .metadata
            .find_all(FileQuery::visible_to(&caller.name))
            .await?)
    }

    /// Unrestricted query for administrative tooling.
    pub async fn list_all(&self, query: FileQuery) -> Result<Vec<FileRecord>, GatewayError> {
        Ok(self.metadata.find_all(query).await?)
    }

    // -- Download -------------------------------------------------------------

    /// Open a record's bytes for `caller`.
    ///
    /// When the caller is the record's `delete_on_access_by` identity, the
    /// record is soft-deleted once the stream has delivered its final
    /// byte.  A stream dropped early leaves the record untouched.
    pub async fn download(&self, caller: &Caller, id: FileId) -> Result<Download, GatewayError> {
        let result = self.download_inner(caller, id).await;
        record_file_operation("download", result.is_ok());
        result
    }

    async fn download_inner(&self, caller: &Caller, id: FileId) -> Result<Download, GatewayError> {
        let record = self
            .metadata
            .find_by_id(id)
            .await?
            .filter(FileRecord::is_active)
            .ok_or_else(|| GatewayError::not_found("File not found"))?;

        if !record.can_read(&caller.name) {
            return Err(GatewayError::forbidden("Access denied"));
        }

        let adapter = self.providers.resolve(&record.provider)?;
        let inner = adapter.get(&record.storage_key).await?;
        debug!(id = %id, provider = %record.provider, key = %record.storage_key, "download started");

        let body = if record.delete_on_access_by.as_deref() == Some(caller.name.as_str()) {
            let hook = AccessHook {
                metadata: self.metadata.clone(),
                locks: self.locks.clone(),
                id,
                caller: caller.name.clone(),
            };
            delete_on_complete(inner, hook)
        } else {
            Box::pin(inner.map_err(GatewayError::from))
        };

        Ok(Download { record, body })
    }

    // -- Soft-delete / restore ------------------------------------------------

    /// Mark an active record deleted.  Only the owner may do this.
    pub async fn soft_delete(&self, caller: &Caller, id: FileId) -> Result<(), GatewayError> {
        let result = self.soft_delete_inner(caller, id).await;
        record_file_operation("soft_delete", result.is_ok());
        result
    }

    async fn soft_delete_inner(&self, caller: &Caller, id: FileId) -> Result<(), GatewayError> {
        let _guard = self.locks.lock(id).await;
        let gone = || GatewayError::not_found("File not found or already deleted");

        let record = self
            .metadata
            .find_by_id(id)
            .await?
            .filter(FileRecord::is_active)
            .ok_or_else(gone)?;

        if record.owner != caller.name {
            return Err(GatewayError::forbidden("Only the owner can delete this file"));
        }

        let applied = self
            .metadata
            .update(id, FileUpdate::SoftDelete { at: Utc::now() })
            .await?;
        if !applied {
            return Err(gone());
        }
        info!(id = %id, owner = %caller.name, "file soft-deleted");
        Ok(())
    }

    /// Bring a soft-deleted record back.
    pub async fn restore(&self, id: FileId) -> Result<FileRecord, GatewayError> {
        let result = self.restore_inner(id).await;
        record_file_operation("restore", result.is_ok());
        result
    }

    async fn restore_inner(&self, id: FileId) -> Result<FileRecord, GatewayError> {
        let _guard = self.locks.lock(id).await;
        let gone = || GatewayError::not_found("File not found or not deleted");

        let mut record = self
            .metadata
            .find_by_id(id)
            .await?
            .filter(|r| !r.is_active())
            .ok_or_else(gone)?;

        if !self.metadata.update(id, FileUpdate::Restore).await? {
            return Err(gone());
        }
        record.deleted_at = None;
        info!(id = %id, "file restored");
        Ok(record)
    }

    // -- Cleanup --------------------------------------------------------------

    /// Purge records soft-deleted longer ago than the retention period.
    pub async fn cleanup(&self) -> Result<CleanupReport, GatewayError> {
        self.cleanup_at(Utc::now()).await
    }

    /// [`cleanup`](Self::cleanup) as if the current time were `now`.
    ///
    /// Each record's object is deleted before its metadata.  When the
    /// object delete fails the record stays, so a later run retries it.
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<CleanupReport, GatewayError> {
        let cutoff = now.checked_sub_signed(self.retention).ok_or_else(|| {
            GatewayError::Internal(anyhow::anyhow!(
                "retention of {} days reaches past the earliest representable time",
                self.retention.num_days()
            ))
        })?;
        let expired = self
            .metadata
            .find_all(FileQuery::deleted_before(cutoff))
            .await?;

        let mut report = CleanupReport::default();
        for candidate in expired {
            match self.purge(candidate.id, cutoff).await {
                Ok(true) => {
                    record_batch_outcome("cleanup", "purged");
                    report.purged.push(candidate.id);
                }
                Ok(false) => {
                    record_batch_outcome("cleanup", "skipped");
                    debug!(id = %candidate.id, "record changed before purge, skipped");
                }
                Err(e) => {
                    record_batch_outcome("cleanup", "failed");
                    warn!(
                        id = %candidate.id,
                        provider = %candidate.provider,
                        key = %candidate.storage_key,
                        "cleanup failed: {e}"
                    );
                    report.failures.push(RecordFailure {
                        id: candidate.id,
                        provider: candidate.provider,
                        storage_key: candidate.storage_key,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            purged = report.purged.len(),
            failed = report.failures.len(),
            "cleanup finished"
        );
        Ok(report)
    }

    /// Remove one expired record.  Returns `false` if it was restored or
    /// removed since the batch query.
    async fn purge(&self, id: FileId, cutoff: DateTime<Utc>) -> Result<bool, GatewayError> {
        let _guard = self.locks.lock(id).await;
        let Some(record) = self.metadata.find_by_id(id).await? else {
            return Ok(false);
        };
        if !FileQuery::deleted_before(cutoff).matches(&record) {
            return Ok(false);
        }

        let adapter = self.providers.resolve(&record.provider)?;
        adapter.delete(&record.storage_key).await?;
        if !self.metadata.hard_remove(id, cutoff).await? {
            // Only another process can get here, since we hold the record lock.
            error!(
                id = %id,
                provider = %record.provider,
                key = %record.storage_key,
                "record changed after its object was purged"
            );
            return Err(GatewayError::Internal(anyhow::anyhow!(
                "record {id} changed after its object was purged"
            )));
        }
        info!(id = %id, provider = %record.provider, key = %record.storage_key, "file purged");
        Ok(true)
    }
}

// -- Delete-on-access ---------------------------------------------------------

/// Soft-deletes a record after its designated reader finishes a download.
struct AccessHook {
    metadata: Arc<dyn MetadataStore>,
    locks: Arc<RecordLocks>,
    id: FileId,
    caller: String,
}

impl AccessHook {
    async fn fire(self) -> Result<(), GatewayError> {
        let _guard = self.locks.lock(self.id).await;
        let applied = self
            .metadata
            .update(self.id, FileUpdate::SoftDelete { at: Utc::now() })
            .await?;
        if applied {
            info!(id = %self.id, reader = %self.caller, "file soft-deleted on access");
        } else {
            debug!(id = %self.id, "delete-on-access found record already inactive");
        }
        Ok(())
    }
}

/// Pass `inner` through, running `hook` once it reports end-of-data.  An
/// inner error ends the stream without running the hook.
fn delete_on_complete(inner: ByteStream, hook: AccessHook) -> DownloadStream {
    let stream = futures::stream::unfold(Some((inner, hook)), |state| async move {
        let (mut inner, hook) = state?;
        match inner.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((inner, hook)))),
            Some(Err(e)) => Some((Err(GatewayError::from(e)), None)),
            None => match hook.fire().await {
                Ok(()) => None,
                Err(e) => Some((Err(e), None)),
            },
        }
    });
    Box::pin(stream)
}

// -- Helpers ------------------------------------------------------------------

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build an `attachment` disposition with an ASCII fallback name and an
/// RFC 5987 UTF-8 name.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    let encoded = utf8_percent_encode(filename, ATTR_CHAR);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::storage::backend::{StorageBackend, StorageError};
    use crate::storage::memory::MemoryBackend;
    use crate::storage::testing::FaultyBackend;
    use chrono::Duration;
    use std::future::Future;

    // -- Fixtures -------------------------------------------------------------

    /// Metadata store whose creates always fail.
    struct BrokenCreates(MemoryMetadataStore);

    impl MetadataStore for BrokenCreates {
        fn create(
            &self,
            _record: NewFileRecord,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>> {
            Box::pin(async { Err(anyhow::anyhow!("disk full")) })
        }

        fn find_by_id(
            &self,
            id: FileId,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
            self.0.find_by_id(id)
        }

        fn find_all(
            &self,
            query: FileQuery,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FileRecord>>> + Send + '_>> {
            self.0.find_all(query)
        }

        fn update(
            &self,
            id: FileId,
            update: FileUpdate,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
            self.0.update(id, update)
        }

        fn hard_remove(
            &self,
            id: FileId,
            cutoff: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
            self.0.hard_remove(id, cutoff)
        }
    }

    /// Metadata store that restores a record just before removing it, as a
    /// second writer would.
    struct RestoresOnRemove(MemoryMetadataStore);

    impl MetadataStore for RestoresOnRemove {
        fn create(
            &self,
            record: NewFileRecord,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>> {
            self.0.create(record)
        }

        fn find_by_id(
            &self,
            id: FileId,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
            self.0.find_by_id(id)
        }

        fn find_all(
            &self,
            query: FileQuery,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FileRecord>>> + Send + '_>> {
            self.0.find_all(query)
        }

        fn update(
            &self,
            id: FileId,
            update: FileUpdate,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
            self.0.update(id, update)
        }

        fn hard_remove(
            &self,
            id: FileId,
            cutoff: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
            Box::pin(async move {
                self.0.update(id, FileUpdate::Restore).await?;
                self.0.hard_remove(id, cutoff).await
            })
        }
    }

    struct Fixture {
        service: FileService,
        metadata: Arc<dyn MetadataStore>,
        backend: Arc<FaultyBackend>,
    }

    fn fixture_with(metadata: Arc<dyn MetadataStore>) -> Fixture {
        let backend = Arc::new(FaultyBackend::new("mem"));
        let mut registry = ProviderRegistry::new();
        registry.register("mem", backend.clone()).unwrap();
        let service = FileService::new(
            metadata.clone(),
            Arc::new(registry),
            Arc::new(RecordLocks::new()),
            Arc::new(KeyGenerator::new()),
            7,
        );
        Fixture {
            service,
            metadata,
            backend,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryMetadataStore::new()))
    }

    fn alice() -> Caller {
        Caller::new("alice")
    }

    fn upload(name: &str, data: &'static [u8]) -> UploadRequest {
        UploadRequest {
            filename: name.to_string(),
            data: Bytes::from_static(data),
            access_list: None,
            delete_on_access_by: None,
        }
    }

    // -- Upload / download ----------------------------------------------------

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let fx = fixture();
        let rec = fx
            .service
            .upload(&alice(), upload("notes.txt", b"hello shuffle"))
            .await
            .unwrap();
        assert_eq!(rec.provider, "mem");
        assert_eq!(rec.owner, "alice");
        assert!(rec.storage_key.ends_with("-notes.txt"));
        assert!(fx.backend.inner.exists(&rec.storage_key).await.unwrap());

        let download = fx.service.download(&alice(), rec.id).await.unwrap();
        assert_eq!(download.record.filename, "notes.txt");
        assert_eq!(&download.collect().await.unwrap()[..], b"hello shuffle");
    }

    #[tokio::test]
    async fn test_upload_without_filename_is_validation_error() {
        let fx = fixture();
        let err = fx
            .service
            .upload(&alice(), upload("   ", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
        assert!(fx.backend.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_upload_storage_failure_creates_no_record() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let mut registry = ProviderRegistry::new();
        registry
            .register("tiny", Arc::new(MemoryBackend::with_limit("tiny", 2)))
            .unwrap();
        let service = FileService::new(
            metadata.clone(),
            Arc::new(registry),
            Arc::new(RecordLocks::new()),
            Arc::new(KeyGenerator::new()),
            7,
        );
        let err = service
            .upload(&alice(), upload("big.bin", b"too many bytes"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Storage(StorageError::Denied { .. })));
        assert!(metadata.find_all(FileQuery::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_metadata_failure_rolls_back_object() {
        let fx = fixture_with(Arc::new(BrokenCreates(MemoryMetadataStore::new())));
        let err = fx
            .service
            .upload(&alice(), upload("a.txt", b"data"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Internal(_)));
        assert!(fx.backend.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_access_gate() {
        let fx = fixture();
        let rec = fx
            .service
            .upload(&alice(), upload("a.txt", b"secret"))
            .await
            .unwrap();

        let err = match fx.service.download(&Caller::new("bob"), rec.id).await {
            Err(e) => e,
            Ok(_) => panic!("bob must not read alice's file"),
        };
        assert!(matches!(err, GatewayError::Forbidden { .. }));
        assert!(fx.service.download(&alice(), rec.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_grantee_can_read_but_not_delete() {
        let fx = fixture();
        let mut req = upload("a.txt", b"shared");
        req.access_list = Some("bob".into());
        let rec = fx.service.upload(&alice(), req).await.unwrap();
        let bob = Caller::new("bob");

        let data = fx
            .service
            .download(&bob, rec.id)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(&data[..], b"shared");
        assert_eq!(fx.service.list(&bob).await.unwrap().len(), 1);

        let err = fx.service.soft_delete(&bob, rec.id).await.unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_download_missing_record_is_not_found() {
        let fx = fixture();
        let err = match fx.service.download(&alice(), uuid::Uuid::new_v4()).await {
            Err(e) => e,
            Ok(_) => panic!("expected NotFound"),
        };
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_blank_access_fields_are_ignored() {
        let fx = fixture();
        let mut req = upload("a.txt", b"x");
        req.access_list = Some("  ".into());
        req.delete_on_access_by = Some(String::new());
        let rec = fx.service.upload(&alice(), req).await.unwrap();
        assert!(rec.access_list.is_none());
        assert!(rec.delete_on_access_by.is_none());
    }

    // -- Listing --------------------------------------------------------------

    #[tokio::test]
    async fn test_list_newest_first_and_scoped_to_caller() {
        let fx = fixture();
        let first = fx.service.upload(&alice(), upload("1.txt", b"1")).await.unwrap();
        let second = fx.service.upload(&alice(), upload("2.txt", b"2")).await.unwrap();
        fx.service
            .upload(&Caller::new("bob"), upload("b.txt", b"b"))
            .await
            .unwrap();

        let ids: Vec<_> = fx
            .service
            .list(&alice())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    // -- Soft-delete / restore ------------------------------------------------

    #[tokio::test]
    async fn test_soft_delete_visibility_and_restore() {
        let fx = fixture();
        let rec = fx.service.upload(&alice(), upload("a.txt", b"abc")).await.unwrap();

        fx.service.soft_delete(&alice(), rec.id).await.unwrap();
        assert!(fx.service.list(&alice()).await.unwrap().is_empty());
        let err = match fx.service.download(&alice(), rec.id).await {
            Err(e) => e,
            Ok(_) => panic!("expected NotFound"),
        };
        assert!(matches!(err, GatewayError::NotFound { .. }));

        let restored = fx.service.restore(rec.id).await.unwrap();
        assert!(restored.is_active());
        assert_eq!(fx.service.list(&alice()).await.unwrap().len(), 1);
        let data = fx
            .service
            .download(&alice(), rec.id)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(&data[..], b"abc");
    }

    #[tokio::test]
    async fn test_double_soft_delete_and_restore_are_not_found() {
        let fx = fixture();
        let rec = fx.service.upload(&alice(), upload("a.txt", b"x")).await.unwrap();

        let err = fx.service.restore(rec.id).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));

        fx.service.soft_delete(&alice(), rec.id).await.unwrap();
        let err = fx.service.soft_delete(&alice(), rec.id).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));

        fx.service.restore(rec.id).await.unwrap();
        let err = fx.service.restore(rec.id).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }

    // -- Delete-on-access -----------------------------------------------------

    #[tokio::test]
    async fn test_delete_on_access_by_designated_reader() {
        let fx = fixture();
        let mut req = upload("once.txt", b"burn after reading");
        req.access_list = Some("carol".into());
        req.delete_on_access_by = Some("carol".into());
        let rec = fx.service.upload(&alice(), req).await.unwrap();

        // Owner download leaves the record active.
        fx.service
            .download(&alice(), rec.id)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert!(fx.metadata.find_by_id(rec.id).await.unwrap().unwrap().is_active());

        let data = fx
            .service
            .download(&Caller::new("carol"), rec.id)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(&data[..], b"burn after reading");
        let after = fx.metadata.find_by_id(rec.id).await.unwrap().unwrap();
        assert!(!after.is_active());
    }

    #[tokio::test]
    async fn test_delete_on_access_not_applied_to_partial_read() {
        let fx = fixture();
        let mut req = upload("once.txt", b"0123456789abcdef");
        req.access_list = Some("carol".into());
        req.delete_on_access_by = Some("carol".into());
        let rec = fx.service.upload(&alice(), req).await.unwrap();

        let mut download = fx
            .service
            .download(&Caller::new("carol"), rec.id)
            .await
            .unwrap();
        let first = download.body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"0123");
        drop(download);

        assert!(fx.metadata.find_by_id(rec.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_delete_on_access_not_applied_when_stream_fails() {
        let fx = fixture();
        let mut req = upload("once.txt", b"0123456789");
        req.delete_on_access_by = Some("alice".into());
        let rec = fx.service.upload(&alice(), req).await.unwrap();
        fx.backend.break_streams(true);

        let download = fx.service.download(&alice(), rec.id).await.unwrap();
        let err = download.collect().await.unwrap_err();
        assert!(matches!(err, GatewayError::Storage(_)));
        assert!(fx.metadata.find_by_id(rec.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_download_provider_failure_is_storage_error() {
        let fx = fixture();
        let rec = fx.service.upload(&alice(), upload("a.txt", b"x")).await.unwrap();
        fx.backend.fail_gets(true);
        let err = match fx.service.download(&alice(), rec.id).await {
            Err(e) => e,
            Ok(_) => panic!("expected a storage error"),
        };
        assert!(matches!(err, GatewayError::Storage(StorageError::Unavailable { .. })));
    }

    // -- Cleanup --------------------------------------------------------------

    #[tokio::test]
    async fn test_cleanup_threshold() {
        let fx = fixture();
        let now = Utc::now();
        let old = fx.service.upload(&alice(), upload("old.txt", b"o")).await.unwrap();
        let recent = fx.service.upload(&alice(), upload("new.txt", b"n")).await.unwrap();
        fx.metadata
            .update(old.id, FileUpdate::SoftDelete { at: now - Duration::days(8) })
            .await
            .unwrap();
        fx.metadata
            .update(recent.id, FileUpdate::SoftDelete { at: now - Duration::days(1) })
            .await
            .unwrap();

        let report = fx.service.cleanup_at(now).await.unwrap();
        assert_eq!(report.purged, vec![old.id]);
        assert!(report.is_clean());

        assert!(fx.metadata.find_by_id(old.id).await.unwrap().is_none());
        assert!(!fx.backend.inner.exists(&old.storage_key).await.unwrap());
        assert!(fx.metadata.find_by_id(recent.id).await.unwrap().is_some());
        assert!(fx.backend.inner.exists(&recent.storage_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_ignores_active_records() {
        let fx = fixture();
        let rec = fx.service.upload(&alice(), upload("a.txt", b"x")).await.unwrap();
        let report = fx
            .service
            .cleanup_at(Utc::now() + Duration::days(30))
            .await
            .unwrap();
        assert!(report.purged.is_empty());
        assert!(fx.metadata.find_by_id(rec.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_metadata_when_object_delete_fails() {
        let fx = fixture();
        let rec = fx.service.upload(&alice(), upload("a.txt", b"x")).await.unwrap();
        fx.service.soft_delete(&alice(), rec.id).await.unwrap();
        fx.backend.fail_deletes(true);

        let later = Utc::now() + Duration::days(8);
        let report = fx.service.cleanup_at(later).await.unwrap();
        assert!(report.purged.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, rec.id);
        assert!(fx.metadata.find_by_id(rec.id).await.unwrap().is_some());

        fx.backend.fail_deletes(false);
        let report = fx.service.cleanup_at(later).await.unwrap();
        assert_eq!(report.purged, vec![rec.id]);
    }

    #[tokio::test]
    async fn test_cleanup_with_unrepresentable_retention_is_internal_error() {
        let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
        let service = FileService::new(
            metadata,
            Arc::new(ProviderRegistry::new()),
            Arc::new(RecordLocks::new()),
            Arc::new(KeyGenerator::new()),
            u32::MAX,
        );
        let result = service.cleanup().await;
        assert!(matches!(result, Err(GatewayError::Internal(_))));
    }

    #[tokio::test]
    async fn test_cleanup_reports_record_restored_elsewhere_mid_purge() {
        let fx = fixture_with(Arc::new(RestoresOnRemove(MemoryMetadataStore::new())));
        let rec = fx.service.upload(&alice(), upload("a.txt", b"x")).await.unwrap();
        fx.service.soft_delete(&alice(), rec.id).await.unwrap();

        let report = fx
            .service
            .cleanup_at(Utc::now() + Duration::days(8))
            .await
            .unwrap();
        assert!(report.purged.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, rec.id);
        let kept = fx.metadata.find_by_id(rec.id).await.unwrap().unwrap();
        assert!(kept.is_active());
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"
        );
        assert_eq!(
            content_disposition("a \"b\".txt"),
            "attachment; filename=\"a _b_.txt\"; filename*=UTF-8''a%20%22b%22.txt"
        );
        assert_eq!(
            content_disposition("é.txt"),
            "attachment; filename=\"_.txt\"; filename*=UTF-8''%C3%A9.txt"
        );
    }
}
