//! In-memory storage backend.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>`.  Nothing is
//! persisted; the backend exists for tests and throwaway deployments.
//!
//! A configurable memory limit (`max_size_bytes`) caps total stored bytes.
//! Exceeding it is reported as a quota denial, the same way a cloud
//! provider rejects a write over quota.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::backend::{stream_from_bytes, ByteStream, StorageBackend, StorageError, StorageResult};

/// Size of the chunks `get` yields.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// In-memory storage backend.
pub struct MemoryBackend {
    /// Provider label used in error messages.
    name: String,
    /// storage_key -> data.
    objects: tokio::sync::RwLock<HashMap<String, Bytes>>,
    /// Maximum bytes allowed.  0 means unlimited.
    max_size_bytes: u64,
    /// Chunk size for streamed reads.
    chunk_size: usize,
}

impl MemoryBackend {
    /// Create an unlimited backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_limit(name, 0)
    }

    /// Create a backend that refuses writes beyond `max_size_bytes`.
    pub fn with_limit(name: impl Into<String>, max_size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            objects: tokio::sync::RwLock::new(HashMap::new()),
            max_size_bytes,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the chunk size used by streamed reads.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Number of objects currently stored.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// All keys currently stored, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Total bytes currently stored.
    pub async fn size_bytes(&self) -> u64 {
        self.objects
            .read()
            .await
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn put(
        &self,
        storage_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().await;

            if self.max_size_bytes > 0 {
                let current: u64 = objects.values().map(|d| d.len() as u64).sum();
                let replaced = objects.get(&storage_key).map_or(0, |d| d.len() as u64);
                let projected = current - replaced + data.len() as u64;
                if projected > self.max_size_bytes {
                    return Err(StorageError::denied(
                        &self.name,
                        "put",
                        format!(
                            "memory limit exceeded: projected={projected}, max={}",
                            self.max_size_bytes
                        ),
                    ));
                }
            }

            objects.insert(storage_key, data);
            Ok(())
        })
    }

    fn get(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<ByteStream>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            match objects.get(&storage_key) {
                Some(data) => Ok(stream_from_bytes(data.clone(), self.chunk_size)),
                None => Err(StorageError::NotFound { key: storage_key }),
            }
        })
    }

    fn delete(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            self.objects.write().await.remove(&storage_key);
            Ok(())
        })
    }

    fn exists(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<bool>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move { Ok(self.objects.read().await.contains_key(&storage_key)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::collect_stream;

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let backend = MemoryBackend::new("mem");
        backend
            .put("a/b.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let data = collect_stream(backend.get("a/b.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn test_get_streams_in_chunks() {
        let backend = MemoryBackend::new("mem").with_chunk_size(2);
        backend.put("k", Bytes::from_static(b"abcde")).await.unwrap();
        let stream = backend.get("k").await.unwrap();
        let chunks: Vec<_> = futures::StreamExt::collect::<Vec<_>>(stream).await;
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_not_found() {
        let backend = MemoryBackend::new("mem");
        let err = match backend.get("missing").await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_existing() {
        let backend = MemoryBackend::new("mem");
        backend.put("k", Bytes::from_static(b"x")).await.unwrap();
        backend.delete("k").await.unwrap();
        assert!(!backend.exists("k").await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let backend = MemoryBackend::new("mem");
        backend.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let backend = MemoryBackend::new("mem");
        backend.put("k", Bytes::from_static(b"one")).await.unwrap();
        backend.put("k", Bytes::from_static(b"two!")).await.unwrap();
        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.size_bytes().await, 4);
    }

    #[tokio::test]
    async fn test_memory_limit_put_is_denied() {
        let backend = MemoryBackend::with_limit("mem", 10);
        backend
            .put("a", Bytes::from_static(b"12345678"))
            .await
            .unwrap();
        let err = backend
            .put("b", Bytes::from_static(b"12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Denied { .. }));
        assert!(!backend.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_limit_overwrite_counts_replaced_bytes() {
        let backend = MemoryBackend::with_limit("mem", 10);
        backend
            .put("a", Bytes::from_static(b"1234567890"))
            .await
            .unwrap();
        backend
            .put("a", Bytes::from_static(b"0987654321"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let backend = MemoryBackend::new("mem");
        backend.put("b", Bytes::new()).await.unwrap();
        backend.put("a", Bytes::new()).await.unwrap();
        assert_eq!(backend.keys().await, vec!["a".to_string(), "b".to_string()]);
    }
}
