//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! Timestamps are stored as RFC 3339 text with millisecond precision and
//! a `Z` suffix, so lexical order matches chronological order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::store::{
    FileId, FileQuery, FileRecord, FileUpdate, LifecycleState, MetadataStore, NewFileRecord,
};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const SELECT_COLUMNS: &str = "id, filename, storage_key, provider, owner, access_list, \
     delete_on_access_by, uploaded_at, deleted_at";

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// Idempotent; safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                id                  TEXT PRIMARY KEY,
                filename            TEXT NOT NULL,
                storage_key         TEXT NOT NULL,
                provider            TEXT NOT NULL,
                owner               TEXT NOT NULL,
                access_list         TEXT,
                delete_on_access_by TEXT,
                uploaded_at         TEXT NOT NULL,
                deleted_at          TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_files_owner
                ON files(owner);
            CREATE INDEX IF NOT EXISTS idx_files_deleted_at
                ON files(deleted_at);
            CREATE INDEX IF NOT EXISTS idx_files_uploaded_at
                ON files(uploaded_at);
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, format_timestamp(&Utc::now())],
            )?;
        }

        Ok(())
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let uploaded_at: String = row.get(7)?;
    let deleted_at: Option<String> = row.get(8)?;
    Ok(FileRecord {
        id,
        filename: row.get(1)?,
        storage_key: row.get(2)?,
        provider: row.get(3)?,
        owner: row.get(4)?,
        access_list: row.get(5)?,
        delete_on_access_by: row.get(6)?,
        uploaded_at: parse_timestamp(7, &uploaded_at)?,
        deleted_at: deleted_at
            .as_deref()
            .map(|text| parse_timestamp(8, text))
            .transpose()?,
    })
}

impl MetadataStore for SqliteMetadataStore {
    fn create(
        &self,
        record: NewFileRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>> {
        Box::pin(async move {
            let created = FileRecord {
                id: Uuid::new_v4(),
                filename: record.filename,
                storage_key: record.storage_key,
                provider: record.provider,
                owner: record.owner,
                access_list: record.access_list,
                delete_on_access_by: record.delete_on_access_by,
                uploaded_at: Utc::now().trunc_subsecs(3),
                deleted_at: None,
            };
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO files (id, filename, storage_key, provider, owner, access_list,
                                    delete_on_access_by, uploaded_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
                params![
                    created.id.to_string(),
                    created.filename,
                    created.storage_key,
                    created.provider,
                    created.owner,
                    created.access_list,
                    created.delete_on_access_by,
                    format_timestamp(&created.uploaded_at),
                ],
            )?;
            Ok(created)
        })
    }

    fn find_by_id(
        &self,
        id: FileId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let record = conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM files WHERE id = ?1"),
                    params![id.to_string()],
                    map_file_row,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn find_all(
        &self,
        query: FileQuery,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FileRecord>>> + Send + '_>> {
        Box::pin(async move {
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<String> = Vec::new();

            match query.state {
                Some(LifecycleState::Active) => clauses.push("deleted_at IS NULL"),
                Some(LifecycleState::SoftDeleted) => clauses.push("deleted_at IS NOT NULL"),
                None => {}
            }
            if let Some(cutoff) = query.deleted_before {
                clauses.push("deleted_at IS NOT NULL AND deleted_at < ?");
                args.push(format_timestamp(&cutoff));
            }
            if let Some(caller) = query.readable_by {
                clauses.push("(owner = ? OR access_list = ?)");
                args.push(caller.clone());
                args.push(caller);
            }

            let mut sql = format!("SELECT {SELECT_COLUMNS} FROM files");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY uploaded_at DESC, rowid DESC");

            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params_from_iter(args.iter()), map_file_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    fn update(
        &self,
        id: FileId,
        update: FileUpdate,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let id = id.to_string();
            let changed = match update {
                FileUpdate::SoftDelete { at } => conn.execute(
                    "UPDATE files SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                    params![format_timestamp(&at), id],
                )?,
                FileUpdate::Restore => conn.execute(
                    "UPDATE files SET deleted_at = NULL WHERE id = ?1 AND deleted_at IS NOT NULL",
                    params![id],
                )?,
                FileUpdate::Relocate {
                    from_provider,
                    from_key,
                    to_provider,
                    to_key,
                } => conn.execute(
                    "UPDATE files SET provider = ?1, storage_key = ?2
                     WHERE id = ?3 AND deleted_at IS NULL AND provider = ?4 AND storage_key = ?5",
                    params![to_provider, to_key, id, from_provider, from_key],
                )?,
            };
            Ok(changed == 1)
        })
    }

    fn hard_remove(
        &self,
        id: FileId,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let removed = conn.execute(
                "DELETE FROM files
                 WHERE id = ?1 AND deleted_at IS NOT NULL AND deleted_at < ?2",
                params![id.to_string(), format_timestamp(&cutoff)],
            )?;
            Ok(removed == 1)
        })
    }
}
