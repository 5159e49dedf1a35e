//! Cross-provider migration ("shuffle").
//!
//! Each active record is moved to a different provider in this order:
//! read the source, relay it through the staging area, write the new copy,
//! commit the new location, then delete the old copy.  The metadata commit
//! is the only point at which the system of record changes, so a failure
//! at any earlier step leaves the record pointing at its original bytes.
//!
//! Records are migrated concurrently up to `migration.concurrency`.  Each
//! migration holds the record's lock for its whole duration.

use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::GatewayError;
use crate::lifecycle::RecordFailure;
use crate::locks::RecordLocks;
use crate::metadata::store::{FileId, FileQuery, FileUpdate, MetadataStore};
use crate::metrics::record_batch_outcome;
use crate::storage::backend::StorageBackend;
use crate::storage::keys::KeyGenerator;
use crate::storage::registry::ProviderRegistry;
use crate::storage::staging::StagingArea;

/// A record that now lives on a new provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratedFile {
    pub id: FileId,
    pub from_provider: String,
    pub from_key: String,
    pub to_provider: String,
    pub to_key: String,
    /// Set when the old copy could not be deleted after the commit.  The
    /// record is migrated; the old object is leaked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}

/// A record left where it was without error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub id: FileId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub migrated: Vec<MigratedFile>,
    pub skipped: Vec<SkippedFile>,
    pub failures: Vec<RecordFailure>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.migrated.len() + self.skipped.len() + self.failures.len()
    }
}

/// Result of migrating a single record.
#[derive(Debug, Clone)]
pub enum MigrationOutcome {
    Migrated(MigratedFile),
    Skipped(SkippedFile),
}

#[derive(Clone)]
pub struct MigrationEngine {
    metadata: Arc<dyn MetadataStore>,
    providers: Arc<ProviderRegistry>,
    locks: Arc<RecordLocks>,
    keys: Arc<KeyGenerator>,
    staging: StagingArea,
    concurrency: usize,
}

impl MigrationEngine {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        providers: Arc<ProviderRegistry>,
        locks: Arc<RecordLocks>,
        keys: Arc<KeyGenerator>,
        staging: StagingArea,
        concurrency: usize,
    ) -> Self {
        Self {
            metadata,
            providers,
            locks,
            keys,
            staging,
            concurrency: concurrency.max(1),
        }
    }

    /// Migrate every active record.  Per-record failures are collected in
    /// the report; only a failure to list the records fails the batch.
    pub async fn migrate_all(&self) -> Result<MigrationReport, GatewayError> {
        let candidates = self.metadata.find_all(FileQuery::active()).await?;
        info!(
            records = candidates.len(),
            concurrency = self.concurrency,
            "migration started"
        );

        let results: Vec<_> = futures::stream::iter(candidates)
            .map(|candidate| async move {
                let result = self.migrate_one(candidate.id).await;
                (candidate, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = MigrationReport::default();
        for (candidate, result) in results {
            match result {
                Ok(MigrationOutcome::Migrated(file)) => {
                    record_batch_outcome("shuffle", "migrated");
                    report.migrated.push(file);
                }
                Ok(MigrationOutcome::Skipped(file)) => {
                    record_batch_outcome("shuffle", "skipped");
                    report.skipped.push(file);
                }
                Err(e) => {
                    record_batch_outcome("shuffle", "failed");
                    warn!(
                        id = %candidate.id,
                        provider = %candidate.provider,
                        key = %candidate.storage_key,
                        "migration failed: {e}"
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
            migrated = report.migrated.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "migration finished"
        );
        Ok(report)
    }

    /// Move one record to another provider.
    pub async fn migrate_one(&self, id: FileId) -> Result<MigrationOutcome, GatewayError> {
        let _guard = self.locks.lock(id).await;
        let skipped = |reason: &str| {
            MigrationOutcome::Skipped(SkippedFile {
                id,
                reason: reason.to_string(),
            })
        };

        let record = match self.metadata.find_by_id(id).await? {
            Some(record) if record.is_active() => record,
            _ => return Ok(skipped("record is no longer active")),
        };

        let target = self.providers.select_target(&record.provider)?;
        if target == record.provider {
            debug!(id = %id, provider = %target, "only one provider configured, nothing to do");
            return Ok(skipped("no other provider configured"));
        }
        let source = self.providers.resolve(&record.provider)?;
        let destination = self.providers.resolve(&target)?;

        let stream = source.get(&record.storage_key).await?;
        let staged = self.staging.relay(stream).await?;
        debug!(id = %id, bytes = staged.size(), path = %staged.path().display(), "object staged");

        let new_key = self.keys.generate(&record.filename);
        destination.put(&new_key, staged.read().await?).await?;

        let commit = self
            .metadata
            .update(
                id,
                FileUpdate::Relocate {
                    from_provider: record.provider.clone(),
                    from_key: record.storage_key.clone(),
                    to_provider: target.clone(),
                    to_key: new_key.clone(),
                },
            )
            .await;
        match commit {
            Ok(true) => {}
            Ok(false) => {
                discard_copy(destination.as_ref(), &target, &new_key).await;
                return Ok(skipped("record changed during migration"));
            }
            Err(e) => {
                discard_copy(destination.as_ref(), &target, &new_key).await;
                return Err(GatewayError::Internal(e.context("committing new location")));
            }
        }

        let cleanup_error = match source.delete(&record.storage_key).await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    id = %id,
                    provider = %record.provider,
                    key = %record.storage_key,
                    "old copy not deleted after migration: {e}"
                );
                Some(e.to_string())
            }
        };

        info!(
            id = %id,
            from = %record.provider,
            to = %target,
            key = %new_key,
            "file migrated"
        );
        Ok(MigrationOutcome::Migrated(MigratedFile {
            id,
            from_provider: record.provider,
            from_key: record.storage_key,
            to_provider: target,
            to_key: new_key,
            cleanup_error,
        }))
    }
}

/// Remove a new copy that never became the system of record.
async fn discard_copy(adapter: &dyn StorageBackend, provider: &str, key: &str) {
    if let Err(e) = adapter.delete(key).await {
        warn!(provider = %provider, key = %key, "uncommitted copy leaked: {e}");
    }
}
