//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses manually desugared async methods (pinned futures) so it can be
//! held as `Arc<dyn MetadataStore>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

pub type FileId = Uuid;

// ── Record types ───────────────────────────────────────────────────

/// Metadata record for a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: FileId,
    /// Original display name.
    pub filename: String,
    /// Object key within `provider`.
    pub storage_key: String,
    /// Provider currently holding the bytes.
    pub provider: String,
    /// Identity of the uploading caller.
    pub owner: String,
    /// Single identity granted read access besides the owner.
    pub access_list: Option<String>,
    /// Identity whose download soft-deletes the record.
    pub delete_on_access_by: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    /// Set while soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Soft-delete state of a record.  Purged records no longer exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Active,
    SoftDeleted,
}

impl FileRecord {
    pub fn state(&self) -> LifecycleState {
        if self.deleted_at.is_some() {
            LifecycleState::SoftDeleted
        } else {
            LifecycleState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Whether `caller` may read this record's bytes.
    pub fn can_read(&self, caller: &str) -> bool {
        self.owner == caller || self.access_list.as_deref() == Some(caller)
    }
}

/// Fields supplied when creating a record.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub filename: String,
    pub storage_key: String,
    pub provider: String,
    pub owner: String,
    pub access_list: Option<String>,
    pub delete_on_access_by: Option<String>,
}

// ── Queries and updates ────────────────────────────────────────────

/// Predicate for [`MetadataStore::find_all`].  Unset fields match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub state: Option<LifecycleState>,
    /// Only records soft-deleted strictly before this instant.
    pub deleted_before: Option<DateTime<Utc>>,
    /// Only records `readable_by` may read (owner or grantee).
    pub readable_by: Option<String>,
}

impl FileQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        Self {
            state: Some(LifecycleState::Active),
            ..Self::default()
        }
    }

    /// Active records visible to `caller`.
    pub fn visible_to(caller: &str) -> Self {
        Self {
            state: Some(LifecycleState::Active),
            readable_by: Some(caller.to_string()),
            ..Self::default()
        }
    }

    /// Soft-deleted records whose deletion is older than `cutoff`.
    pub fn deleted_before(cutoff: DateTime<Utc>) -> Self {
        Self {
            state: Some(LifecycleState::SoftDeleted),
            deleted_before: Some(cutoff),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &FileRecord) -> bool {
        if let Some(state) = self.state {
            if record.state() != state {
                return false;
            }
        }
        if let Some(cutoff) = self.deleted_before {
            match record.deleted_at {
                Some(at) if at < cutoff => {}
                _ => return false,
            }
        }
        if let Some(ref caller) = self.readable_by {
            if !record.can_read(caller) {
                return false;
            }
        }
        true
    }
}

/// A conditional mutation.  Each variant only applies when the record is
/// in the state the variant expects; otherwise the store leaves the
/// record untouched and reports `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileUpdate {
    /// Active -> SoftDeleted.
    SoftDelete { at: DateTime<Utc> },
    /// SoftDeleted -> Active.
    Restore,
    /// Move an active record that still lives at `from` to `to`.
    Relocate {
        from_provider: String,
        from_key: String,
        to_provider: String,
        to_key: String,
    },
}

impl FileUpdate {
    /// Apply to `record` in place, returning whether it applied.
    pub fn apply(&self, record: &mut FileRecord) -> bool {
        match self {
            FileUpdate::SoftDelete { at } => {
                if !record.is_active() {
                    return false;
                }
                record.deleted_at = Some(*at);
            }
            FileUpdate::Restore => {
                if record.is_active() {
                    return false;
                }
                record.deleted_at = None;
            }
            FileUpdate::Relocate {
                from_provider,
                from_key,
                to_provider,
                to_key,
            } => {
                if !record.is_active()
                    || record.provider != *from_provider
                    || record.storage_key != *from_key
                {
                    return false;
                }
                record.provider = to_provider.clone();
                record.storage_key = to_key.clone();
            }
        }
        true
    }
}

// ── MetadataStore trait ────────────────────────────────────────────

/// Durable store of [`FileRecord`]s.
///
/// Listing results are ordered most recently uploaded first.
pub trait MetadataStore: Send + Sync {
    /// Insert a new active record with a fresh id and `uploaded_at = now`.
    fn create(
        &self,
        record: NewFileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>>;

    fn find_by_id(
        &self,
        id: FileId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>>;

    fn find_all(
        &self,
        query: FileQuery,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FileRecord>>> + Send + '_>>;

    /// Apply a conditional update.  Returns `false` when the record is
    /// missing or the condition did not hold.
    fn update(
        &self,
        id: FileId,
        update: FileUpdate,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Permanently remove a record soft-deleted before `cutoff`.  Returns
    /// `false` if it is missing, active, or was deleted at or after `cutoff`.
    fn hard_remove(
        &self,
        id: FileId,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}
