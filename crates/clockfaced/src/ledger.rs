//! Append-only attendance ledger.
//!
//! The ledger is a raw event log: it does not enforce CHECK_IN / CHECK_OUT
//! alternation and does not debounce repeated submissions. Rules of that kind
//! belong to a layer above it.

use crate::store::{from_nanos, to_nanos, Store, StoreError};
use chrono::Utc;
use clockface_core::{AttendanceEvent, AttendanceKind, ExportRow};
use rusqlite::params;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("record task interrupted: {0}")]
    Interrupted(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct Ledger {
    store: Store,
}

impl Ledger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append an event with a server-assigned timestamp.
    ///
    /// The timestamp never precedes the previous event's, so ledger order and
    /// time order agree even if the wall clock steps back. The insert is a
    /// single transaction: on error nothing was recorded.
    pub async fn record(
        &self,
        employee_id: &str,
        kind: AttendanceKind,
    ) -> Result<AttendanceEvent, LedgerError> {
        if employee_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput("employee id is required".into()));
        }
        let id = employee_id.to_string();

        let event = self
            .store
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let last: Option<i64> =
                    tx.query_row("SELECT MAX(recorded_at_ns) FROM attendance", [], |row| row.get(0))?;
                let now = to_nanos(Utc::now())?;
                let recorded_at = last.map_or(now, |last| last.max(now));

                tx.execute(
                    "INSERT INTO attendance (employee_id, kind, recorded_at_ns) VALUES (?1, ?2, ?3)",
                    params![id, kind.as_str(), recorded_at],
                )?;
                let seq = tx.last_insert_rowid();
                tx.commit()?;

                Ok(AttendanceEvent {
                    seq,
                    employee_id: id,
                    kind,
                    timestamp: from_nanos(recorded_at),
                })
            })
            .await
            .map_err(StoreError::from)?;

        tracing::info!(
            seq = event.seq,
            employee_id = %event.employee_id,
            kind = %event.kind,
            timestamp = %event.timestamp,
            "attendance recorded"
        );
        Ok(event)
    }

    /// Flattened `(employee_id, name, kind, timestamp)` rows in append order.
    ///
    /// Names come from the directory at export time; an employee removed since
    /// the event was recorded exports with an empty name.
    pub async fn export_all(&self) -> Result<Vec<ExportRow>, LedgerError> {
        let rows = self
            .store
            .conn()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.employee_id, COALESCE(e.name, ''), a.kind, a.recorded_at_ns
                     FROM attendance a
                     LEFT JOIN employees e ON e.employee_id = a.employee_id
                     ORDER BY a.seq",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        let kind_raw: String = row.get(2)?;
                        let kind = kind_raw.parse::<AttendanceKind>().map_err(|err| {
                            rusqlite::Error::FromSqlConversionFailure(
                                2,
                                rusqlite::types::Type::Text,
                                Box::new(err),
                            )
                        })?;
                        Ok(ExportRow {
                            employee_id: row.get(0)?,
                            name: row.get(1)?,
                            kind,
                            timestamp: from_nanos(row.get(3)?),
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(StoreError::from)?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<usize, LedgerError> {
        let n = self
            .store
            .conn()
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .map_err(StoreError::from)?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Directory;
    use clockface_core::Descriptor;

    #[tokio::test]
    async fn test_record_then_export() {
        let store = Store::open_in_memory().await.unwrap();
        let directory = Directory::new(store.clone(), 1);
        directory
            .enroll("Ada", "E1", Descriptor::new(vec![0.0]))
            .await
            .unwrap();
        let ledger = Ledger::new(store);

        let before = ledger.export_all().await.unwrap().len();
        let called_at = Utc::now();
        let event = ledger.record("E1", AttendanceKind::CheckIn).await.unwrap();
        assert!(event.timestamp >= called_at);

        let rows = ledger.export_all().await.unwrap();
        assert_eq!(rows.len(), before + 1);
        let row = rows.last().unwrap();
        assert_eq!(row.employee_id, "E1");
        assert_eq!(row.name, "Ada");
        assert_eq!(row.kind, AttendanceKind::CheckIn);
        assert_eq!(row.timestamp, event.timestamp);
    }

    #[tokio::test]
    async fn test_repeated_check_ins_are_all_kept() {
        let ledger = Ledger::new(Store::open_in_memory().await.unwrap());
        let a = ledger.record("E1", AttendanceKind::CheckIn).await.unwrap();
        let b = ledger.record("E1", AttendanceKind::CheckIn).await.unwrap();
        assert!(b.seq > a.seq);
        assert!(b.timestamp >= a.timestamp);
        assert_eq!(ledger.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unknown_employee_exports_empty_name() {
        let ledger = Ledger::new(Store::open_in_memory().await.unwrap());
        ledger.record("gone", AttendanceKind::CheckOut).await.unwrap();
        let rows = ledger.export_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "");
        assert_eq!(rows[0].kind, AttendanceKind::CheckOut);
    }

    #[tokio::test]
    async fn test_parallel_appends_keep_order_and_time() {
        let ledger = Ledger::new(Store::open_in_memory().await.unwrap());
        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let kind = if i % 2 == 0 {
                    AttendanceKind::CheckIn
                } else {
                    AttendanceKind::CheckOut
                };
                ledger.record(&format!("E{i}"), kind).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let rows = ledger.export_all().await.unwrap();
        assert_eq!(rows.len(), 20);
        assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_blank_employee_id_rejected() {
        let ledger = Ledger::new(Store::open_in_memory().await.unwrap());
        assert!(matches!(
            ledger.record("", AttendanceKind::CheckIn).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert_eq!(ledger.count().await.unwrap(), 0);
    }
}
