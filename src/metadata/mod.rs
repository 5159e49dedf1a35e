//! Metadata storage layer.
//!
//! The metadata store keeps one [`store::FileRecord`] per stored file.
//! The [`store::MetadataStore`] trait defines the interface;
//! [`sqlite::SqliteMetadataStore`] is the default implementation and
//! [`memory::MemoryMetadataStore`] backs tests and throwaway runs.

pub mod memory;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use crate::config::MetadataConfig;
use store::MetadataStore;

/// Open the metadata store selected by `config.engine`.
pub fn open(config: &MetadataConfig) -> anyhow::Result<Arc<dyn MetadataStore>> {
    match config.engine.as_str() {
        "sqlite" => Ok(Arc::new(sqlite::SqliteMetadataStore::new(&config.sqlite.path)?)),
        "memory" => Ok(Arc::new(memory::MemoryMetadataStore::new())),
        other => anyhow::bail!("unknown metadata engine `{other}`"),
    }
}
