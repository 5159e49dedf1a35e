//! Time-bounded adapter calls.
//!
//! [`TimedBackend`] wraps any [`StorageBackend`] and fails each call with
//! [`StorageError::Timeout`] when it does not finish within the configured
//! bound.  Streams returned by `get` are additionally bounded per chunk, so
//! a provider that stalls mid-download surfaces as an error instead of a
//! hung request.

use bytes::Bytes;
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::backend::{ByteStream, StorageBackend, StorageError, StorageResult};

pub struct TimedBackend {
    provider: String,
    inner: Arc<dyn StorageBackend>,
    limit: Duration,
}

impl TimedBackend {
    pub fn new(provider: impl Into<String>, inner: Arc<dyn StorageBackend>, limit: Duration) -> Self {
        Self {
            provider: provider.into(),
            inner,
            limit,
        }
    }

    fn timeout_error(&self, operation: &'static str, key: &str) -> StorageError {
        StorageError::Timeout {
            provider: self.provider.clone(),
            operation,
            key: key.to_string(),
            seconds: self.limit.as_secs(),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        key: &str,
        call: impl Future<Output = StorageResult<T>>,
    ) -> StorageResult<T> {
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(operation, key)),
        }
    }
}

impl StorageBackend for TimedBackend {
    fn put(
        &self,
        storage_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            self.bounded("put", &storage_key, self.inner.put(&storage_key, data))
                .await
        })
    }

    fn get(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<ByteStream>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let inner = self
                .bounded("get", &storage_key, self.inner.get(&storage_key))
                .await?;

            let limit = self.limit;
            let timeout = self.timeout_error("get", &storage_key);
            // Once a chunk times out the stream ends after yielding the error.
            let stream = futures::stream::unfold(Some((inner, timeout)), move |state| async move {
                let (mut inner, timeout) = state?;
                match tokio::time::timeout(limit, inner.next()).await {
                    Ok(Some(item)) => Some((item, Some((inner, timeout)))),
                    Ok(None) => None,
                    Err(_) => Some((Err(timeout), None)),
                }
            });
            Ok(Box::pin(stream) as ByteStream)
        })
    }

    fn delete(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            self.bounded("delete", &storage_key, self.inner.delete(&storage_key))
                .await
        })
    }

    fn exists(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<bool>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            self.bounded("exists", &storage_key, self.inner.exists(&storage_key))
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::collect_stream;
    use crate::storage::memory::MemoryBackend;

    /// Backend whose calls never complete.
    struct StalledBackend;

    impl StorageBackend for StalledBackend {
        fn put(
            &self,
            _storage_key: &str,
            _data: Bytes,
        ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
            Box::pin(futures::future::pending())
        }

        fn get(
            &self,
            _storage_key: &str,
        ) -> Pin<Box<dyn Future<Output = StorageResult<ByteStream>> + Send + '_>> {
            Box::pin(async {
                let stream = futures::stream::once(async { Ok(Bytes::from_static(b"head")) })
                    .chain(futures::stream::pending());
                Ok(Box::pin(stream) as ByteStream)
            })
        }

        fn delete(
            &self,
            _storage_key: &str,
        ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
            Box::pin(futures::future::pending())
        }

        fn exists(
            &self,
            _storage_key: &str,
        ) -> Pin<Box<dyn Future<Output = StorageResult<bool>> + Send + '_>> {
            Box::pin(futures::future::pending())
        }
    }

    fn stalled() -> TimedBackend {
        TimedBackend::new("slow", Arc::new(StalledBackend), Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_times_out() {
        let err = stalled()
            .put("k", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        match err {
            StorageError::Timeout {
                provider,
                operation,
                key,
                seconds,
            } => {
                assert_eq!(provider, "slow");
                assert_eq!(operation, "put");
                assert_eq!(key, "k");
                assert_eq!(seconds, 2);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_times_out() {
        let err = stalled().delete("k").await.unwrap_err();
        assert!(matches!(err, StorageError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_yields_timeout() {
        let backend = stalled();
        let mut stream = backend.get("k").await.unwrap();
        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"head");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, StorageError::Timeout { .. }));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fast_backend_passes_through() {
        let inner = Arc::new(MemoryBackend::new("mem"));
        let backend = TimedBackend::new("mem", inner, Duration::from_secs(5));
        backend.put("k", Bytes::from_static(b"data")).await.unwrap();
        assert!(backend.exists("k").await.unwrap());
        let data = collect_stream(backend.get("k").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"data");
        backend.delete("k").await.unwrap();
        assert!(!backend.exists("k").await.unwrap());
    }
}
