//! Local filesystem storage backend.
//!
//! Objects are stored as flat files under a configurable root directory.
//! The storage key is used directly as a relative path.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.

use bytes::Bytes;
use futures::TryStreamExt;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::backend::{ByteStream, StorageBackend, StorageError, StorageResult};

/// Read buffer size for streamed gets.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Stores objects on the local filesystem.
pub struct LocalBackend {
    /// Provider label used in error messages.
    name: String,
    /// Root directory for all stored objects.
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage key to an absolute file path, rejecting keys that
    /// would escape the root directory.
    fn resolve(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty() {
            return Err(StorageError::InvalidKey(storage_key.to_string()));
        }
        for component in Path::new(storage_key).components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::InvalidKey(storage_key.to_string())),
            }
        }
        if storage_key.starts_with(".tmp") {
            return Err(StorageError::InvalidKey(storage_key.to_string()));
        }
        Ok(self.root.join(storage_key))
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{id}"))
    }
}

impl StorageBackend for LocalBackend {
    fn put(
        &self,
        storage_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let final_path = self.resolve(&storage_key)?;

            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Crash-only: temp-fsync-rename pattern.
            let tmp_path = self.temp_path();
            if let Some(parent) = tmp_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let write = async {
                let mut file = tokio::fs::File::create(&tmp_path).await?;
                file.write_all(&data).await?;
                file.sync_all().await?;
                tokio::fs::rename(&tmp_path, &final_path).await
            };
            if let Err(e) = write.await {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
            Ok(())
        })
    }

    fn get(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<ByteStream>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let path = self.resolve(&storage_key)?;
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound { key: storage_key });
                }
                Err(e) => return Err(e.into()),
            };
            let stream = ReaderStream::with_capacity(file, READ_CHUNK_SIZE).map_err(StorageError::from);
            Ok(Box::pin(stream) as ByteStream)
        })
    }

    fn delete(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let path = self.resolve(&storage_key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                // Idempotent: a missing file is already deleted.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::unavailable(&self.name, "delete", e)),
            }
        })
    }

    fn exists(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<bool>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let path = self.resolve(&storage_key)?;
            match tokio::fs::metadata(&path).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::collect_stream;

    fn test_backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let backend = LocalBackend::new("local", dir.path().join("objects")).unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (_dir, backend) = test_backend();
        backend
            .put("1700000000000-report.pdf", Bytes::from_static(b"hello world"))
            .await
            .unwrap();
        let data = collect_stream(backend.get("1700000000000-report.pdf").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_put_empty_object() {
        let (_dir, backend) = test_backend();
        backend.put("empty", Bytes::new()).await.unwrap();
        let data = collect_stream(backend.get("empty").await.unwrap())
            .await
            .unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_put_creates_parent_dirs() {
        let (_dir, backend) = test_backend();
        backend
            .put("a/b/c.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(backend.root().join("a/b/c.txt").is_file());
    }

    #[tokio::test]
    async fn test_put_leaves_no_temp_files() {
        let (_dir, backend) = test_backend();
        backend.put("k", Bytes::from_static(b"x")).await.unwrap();
        let leftovers = std::fs::read_dir(backend.root().join(".tmp"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_delete_existing() {
        let (_dir, backend) = test_backend();
        backend.put("k", Bytes::from_static(b"x")).await.unwrap();
        backend.delete("k").await.unwrap();
        assert!(!backend.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let (_dir, backend) = test_backend();
        backend.delete("never-written").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_not_found() {
        let (_dir, backend) = test_backend();
        let err = match backend.get("missing").await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_dir, backend) = test_backend();
        backend.put("k", Bytes::from_static(b"first")).await.unwrap();
        backend.put("k", Bytes::from_static(b"second")).await.unwrap();
        let data = collect_stream(backend.get("k").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"second");
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, backend) = test_backend();
        let err = backend
            .put("../escape", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
        assert!(matches!(
            backend.delete("/etc/passwd").await.unwrap_err(),
            StorageError::InvalidKey(_)
        ));
    }

    #[tokio::test]
    async fn test_large_object_streams_in_chunks() {
        let (_dir, backend) = test_backend();
        let payload = Bytes::from(vec![7u8; READ_CHUNK_SIZE * 2 + 10]);
        backend.put("big", payload.clone()).await.unwrap();
        let stream = backend.get("big").await.unwrap();
        let chunks: Vec<_> = futures::StreamExt::collect::<Vec<_>>(stream).await;
        assert!(chunks.len() >= 3);
        let total: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total, payload.len());
    }
}
