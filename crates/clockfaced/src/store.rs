//! SQLite persistence shared by the employee directory and the attendance ledger.
//!
//! The connection lives on a dedicated thread owned by `tokio-rusqlite`, so
//! every statement is serialized there and async callers never block the
//! runtime. Uniqueness of employee ids is a primary-key constraint in the
//! schema, not an application-level check.

use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when the failure was a UNIQUE / PRIMARY KEY constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// Cheap-to-clone handle to the attendance database.
#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    /// Open or create the database at `path`, creating parent directories.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn).await
    }

    /// Private in-memory database, used by tests.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            tracing::debug!(journal_mode = %mode, "sqlite journal mode");
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS employees (
    employee_id TEXT NOT NULL PRIMARY KEY,
    name TEXT NOT NULL,
    descriptor_dim INTEGER NOT NULL,
    descriptor BLOB NOT NULL,
    enrolled_at_ns INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('CHECK_IN', 'CHECK_OUT')),
    recorded_at_ns INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attendance_employee
    ON attendance(employee_id);
";

/// Nanoseconds since the Unix epoch, as stored in `*_ns` columns.
pub(crate) fn to_nanos(ts: DateTime<Utc>) -> rusqlite::Result<i64> {
    ts.timestamp_nanos_opt()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, i64::MAX))
}

pub(crate) fn from_nanos(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}
