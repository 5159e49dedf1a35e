//! ShuffleStore library: a file gateway over interchangeable object stores.
//!
//! This crate provides the provider adapters and registry, the metadata
//! store, the file lifecycle and migration engines, and the thin HTTP
//! binding that exposes them.

use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod lifecycle;
pub mod locks;
pub mod metadata;
pub mod metrics;
pub mod migration;
pub mod server;
pub mod storage;

use crate::config::Config;
use crate::identity::{IdentityResolver, StaticIdentityResolver};
use crate::lifecycle::FileService;
use crate::locks::RecordLocks;
use crate::metadata::store::MetadataStore;
use crate::migration::MigrationEngine;
use crate::storage::keys::KeyGenerator;
use crate::storage::registry::ProviderRegistry;
use crate::storage::staging::StagingArea;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Upload, list, download, soft-delete, restore and cleanup.
    pub files: FileService,
    /// Cross-provider shuffle.
    pub migrations: MigrationEngine,
    /// Maps `x-auth-token` values to callers.
    pub identities: Arc<dyn IdentityResolver>,
}

impl AppState {
    /// Open the configured metadata store and providers and wire the engines.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let metadata = metadata::open(&config.metadata)?;
        let providers = ProviderRegistry::from_config(&config.storage).await?;
        Self::assemble(config, metadata, providers)
    }

    /// Wire the engines over an already-built store and registry.
    pub fn assemble(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        providers: ProviderRegistry,
    ) -> anyhow::Result<Self> {
        if providers.is_empty() {
            anyhow::bail!("no storage providers configured");
        }
        let providers = Arc::new(providers);
        let locks = Arc::new(RecordLocks::new());
        let keys = Arc::new(KeyGenerator::new());
        let staging = StagingArea::new(&config.migration.staging_dir)?;

        let files = FileService::new(
            metadata.clone(),
            providers.clone(),
            locks.clone(),
            keys.clone(),
            config.lifecycle.retention_days,
        );
        let migrations = MigrationEngine::new(
            metadata,
            providers,
            locks,
            keys,
            staging,
            config.migration.concurrency,
        );
        let identities: Arc<dyn IdentityResolver> =
            Arc::new(StaticIdentityResolver::new(&config.auth.identities));

        Ok(Self {
            config,
            files,
            migrations,
            identities,
        })
    }

    /// Interval between background cleanup runs, if enabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        match self.config.lifecycle.cleanup_interval_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
