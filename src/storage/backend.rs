//! Abstract storage backend trait.
//!
//! Every provider adapter must implement [`StorageBackend`].  The trait
//! works in terms of opaque keys and byte streams so the engines never
//! need to know which vendor holds the bytes.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A stream of object bytes that can be piped onward without buffering.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

pub type StorageResult<T> = Result<T, StorageError>;

/// Adapter-level failure.  Adapters translate vendor errors into these kinds.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object at the requested key.
    #[error("object not found at storage key: {key}")]
    NotFound { key: String },

    /// Network or authentication failure talking to the provider.
    #[error("{provider} {operation} failed: {message}")]
    Unavailable {
        provider: String,
        operation: &'static str,
        message: String,
    },

    /// The provider refused the request (quota exceeded, permission denied).
    #[error("{provider} {operation} denied: {message}")]
    Denied {
        provider: String,
        operation: &'static str,
        message: String,
    },

    /// The adapter call did not complete within the configured bound.
    #[error("{provider} {operation} on `{key}` timed out after {seconds}s")]
    Timeout {
        provider: String,
        operation: &'static str,
        key: String,
        seconds: u64,
    },

    /// The key cannot be represented by this provider.
    #[error("invalid storage key `{0}`")]
    InvalidKey(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn unavailable(
        provider: impl Into<String>,
        operation: &'static str,
        message: impl std::fmt::Display,
    ) -> Self {
        StorageError::Unavailable {
            provider: provider.into(),
            operation,
            message: message.to_string(),
        }
    }

    pub fn denied(
        provider: impl Into<String>,
        operation: &'static str,
        message: impl std::fmt::Display,
    ) -> Self {
        StorageError::Denied {
            provider: provider.into(),
            operation,
            message: message.to_string(),
        }
    }

    /// Classify an HTTP status returned by a provider API.
    pub fn from_status(
        provider: &str,
        operation: &'static str,
        key: &str,
        status: u16,
        message: impl std::fmt::Display,
    ) -> Self {
        match status {
            404 => StorageError::NotFound {
                key: key.to_string(),
            },
            403 | 429 | 507 => StorageError::denied(provider, operation, message),
            _ => StorageError::unavailable(provider, operation, message),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Async object storage contract.
///
/// Implementations must tolerate concurrent calls for distinct keys.  The
/// engines never write and delete the same key concurrently.
pub trait StorageBackend: Send + Sync + 'static {
    /// Write `data` to `storage_key`, replacing any previous object.
    fn put(
        &self,
        storage_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>>;

    /// Open the object at `storage_key` as a byte stream.
    fn get(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<ByteStream>> + Send + '_>>;

    /// Delete the object at `storage_key`.  Deleting a missing key succeeds.
    fn delete(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>>;

    /// Check whether an object exists at `storage_key`.
    fn exists(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<bool>> + Send + '_>>;
}

/// Wrap an in-memory buffer as a [`ByteStream`], yielding it in
/// `chunk_size` pieces.
pub fn stream_from_bytes(data: Bytes, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(data.len() / chunk_size + 1);
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        chunks.push(Ok(data.slice(offset..end)));
        offset = end;
    }
    Box::pin(futures::stream::iter(chunks))
}

/// Drain a [`ByteStream`] into a single buffer.
pub async fn collect_stream(mut stream: ByteStream) -> StorageResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}
