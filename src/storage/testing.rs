//! Fault-injecting adapter for engine tests.

use bytes::Bytes;
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use super::backend::{ByteStream, StorageBackend, StorageError, StorageResult};
use super::memory::MemoryBackend;

/// Wraps a [`MemoryBackend`]; each operation can be switched to fail.
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    name: String,
    fail_put: AtomicBool,
    fail_get: AtomicBool,
    fail_delete: AtomicBool,
    /// Yield the first chunk, then an error.
    break_streams: AtomicBool,
}

impl FaultyBackend {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryBackend::new(name).with_chunk_size(4),
            name: name.to_string(),
            fail_put: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            break_streams: AtomicBool::new(false),
        }
    }

    pub fn fail_puts(&self, on: bool) {
        self.fail_put.store(on, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, on: bool) {
        self.fail_get.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.fail_delete.store(on, Ordering::SeqCst);
    }

    pub fn break_streams(&self, on: bool) {
        self.break_streams.store(on, Ordering::SeqCst);
    }

    fn injected(&self, operation: &'static str) -> StorageError {
        StorageError::unavailable(&self.name, operation, "injected fault")
    }
}

impl StorageBackend for FaultyBackend {
    fn put(
        &self,
        key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        if self.fail_put.load(Ordering::SeqCst) {
            let err = self.injected("put");
            return Box::pin(async move { Err(err) });
        }
        self.inner.put(key, data)
    }

    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<ByteStream>> + Send + '_>> {
        if self.fail_get.load(Ordering::SeqCst) {
            let err = self.injected("get");
            return Box::pin(async move { Err(err) });
        }
        let key = key.to_string();
        Box::pin(async move {
            let stream = self.inner.get(&key).await?;
            if !self.break_streams.load(Ordering::SeqCst) {
                return Ok(stream);
            }
            let err = self.injected("get");
            let broken = stream
                .take(1)
                .chain(futures::stream::once(async move { Err(err) }));
            Ok(Box::pin(broken) as ByteStream)
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        if self.fail_delete.load(Ordering::SeqCst) {
            let err = self.injected("delete");
            return Box::pin(async move { Err(err) });
        }
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Pin<Box<dyn Future<Output = StorageResult<bool>> + Send + '_>> {
        self.inner.exists(key)
    }
}
