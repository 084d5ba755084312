//! Persistent metadata for archived objects, keyed by `(owner_id, unique_media_id)`.
//!
//! Every call opens its own short-lived connection; nothing is cached in
//! memory between calls. SQLite's constraints are the authority on
//! uniqueness, which makes `insert` the race guard for concurrent archivals.

use crate::error::{DuplicateField, StoreError};
use crate::vault::descriptor::MediaRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub trait RecordStore: Send + Sync {
    fn find(&self, owner_id: i64, unique_media_id: &str)
    -> Result<Option<MediaRecord>, StoreError>;

    fn name_in_use(&self, owner_id: i64, name: &str) -> Result<bool, StoreError>;

    /// Fails with `StoreError::Duplicate` if either uniqueness constraint
    /// would be violated.
    fn insert(&self, record: &MediaRecord) -> Result<(), StoreError>;

    /// Assigned filenames, newest first.
    fn list_filenames(&self, owner_id: i64) -> Result<Vec<String>, StoreError>;

    fn distinct_owners(&self) -> Result<BTreeSet<i64>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    // Fixed precision and a `Z` suffix keep lexical order equal to time order.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
    let created_at: String = row.get(7)?;
    Ok(MediaRecord {
        owner_id: row.get(0)?,
        unique_media_id: row.get(1)?,
        performer: row.get(2)?,
        title: row.get(3)?,
        original_filename: row.get(4)?,
        mime_type: row.get(5)?,
        assigned_filename: row.get(6)?,
        created_at: parse_timestamp(&created_at, 7)?,
    })
}

// SQLite names the violated columns in the message, e.g.
// "UNIQUE constraint failed: media_records.owner_id, media_records.assigned_filename".
fn duplicate_field(message: Option<&str>) -> DuplicateField {
    match message {
        Some(msg) if msg.contains("assigned_filename") => DuplicateField::AssignedFilename,
        _ => DuplicateField::UniqueMediaId,
    }
}

impl SqliteRecordStore {
    /// Create the parent directory and schema if missing.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            db_path: db_path.into(),
        };
        if let Some(parent) = store.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = store.connect()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS media_records (
              owner_id          INTEGER NOT NULL,
              unique_media_id   TEXT    NOT NULL,
              performer         TEXT,
              title             TEXT,
              original_filename TEXT,
              mime_type         TEXT,
              assigned_filename TEXT    NOT NULL,
              created_at        TEXT    NOT NULL,   -- RFC3339 UTC, microseconds
              PRIMARY KEY (owner_id, unique_media_id),
              UNIQUE (owner_id, assigned_filename)
            );

            CREATE INDEX IF NOT EXISTS idx_media_owner_created
              ON media_records(owner_id, created_at);
            "#,
        )?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    pub fn count_by_owner(&self) -> Result<BTreeMap<i64, u64>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT owner_id, COUNT(*) FROM media_records GROUP BY owner_id ORDER BY owner_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (owner, count) = row?;
            out.insert(owner, count.max(0) as u64);
        }
        Ok(out)
    }
}

impl RecordStore for SqliteRecordStore {
    fn find(
        &self,
        owner_id: i64,
        unique_media_id: &str,
    ) -> Result<Option<MediaRecord>, StoreError> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT owner_id, unique_media_id, performer, title, original_filename,
                        mime_type, assigned_filename, created_at
                 FROM media_records
                 WHERE owner_id = ?1 AND unique_media_id = ?2",
                params![owner_id, unique_media_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn name_in_use(&self, owner_id: i64, name: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM media_records WHERE owner_id = ?1 AND assigned_filename = ?2 LIMIT 1",
                params![owner_id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn insert(&self, record: &MediaRecord) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let result = conn.execute(
            "INSERT INTO media_records(owner_id, unique_media_id, performer, title,
                                       original_filename, mime_type, assigned_filename, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.owner_id,
                record.unique_media_id,
                record.performer,
                record.title,
                record.original_filename,
                record.mime_type,
                record.assigned_filename,
                format_timestamp(&record.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, message))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate {
                    owner_id: record.owner_id,
                    field: duplicate_field(message.as_deref()),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn list_filenames(&self, owner_id: i64) -> Result<Vec<String>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT assigned_filename FROM media_records
             WHERE owner_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let names = stmt
            .query_map([owner_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn distinct_owners(&self) -> Result<BTreeSet<i64>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT DISTINCT owner_id FROM media_records")?;
        let owners = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(owners)
    }
}
