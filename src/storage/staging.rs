//! Staging area for cross-provider copies.
//!
//! Migration relays an object from one provider to another through a
//! temporary file.  The source stream is drained to disk first, so a source
//! that fails mid-stream never reaches the target.  The upload leg then
//! reads the whole file back into memory, because `StorageBackend::put`
//! takes `Bytes`.  The file is removed when the [`StagedObject`] is
//! dropped, whether or not the copy succeeded.

use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::backend::{ByteStream, StorageResult};

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

/// A fully-received object parked on local disk.
#[derive(Debug)]
pub struct StagedObject {
    file: NamedTempFile,
    size: u64,
}

impl StagingArea {
    /// Create the staging directory if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drain `stream` into a new temp file.
    pub async fn relay(&self, mut stream: ByteStream) -> StorageResult<StagedObject> {
        let dir = self.dir.clone();
        let temp = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix("relay-").tempfile_in(dir)
        })
        .await
        .map_err(std::io::Error::other)??;

        let mut file = tokio::fs::File::from_std(temp.as_file().try_clone()?);
        let mut size = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(StagedObject { file: temp, size })
    }
}

impl StagedObject {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Read the staged bytes back for the upload leg of the copy.  Buffers
    /// the whole object.
    pub async fn read(&self) -> StorageResult<Bytes> {
        let mut file = tokio::fs::File::from_std(self.file.as_file().try_clone()?);
        file.seek(std::io::SeekFrom::Start(0)).await?;
        let mut buf = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
