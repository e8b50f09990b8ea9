use crate::store::{from_nanos, to_nanos, Store, StoreError};
use chrono::Utc;
use clockface_core::{Descriptor, DescriptorError, Employee};
use rusqlite::{params, OptionalExtension};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("employee id already enrolled: {0}")]
    DuplicateIdentifier(String),
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Enrolled employees, keyed by employee id.
#[derive(Clone)]
pub struct Directory {
    store: Store,
    descriptor_dim: usize,
}

impl Directory {
    pub fn new(store: Store, descriptor_dim: usize) -> Self {
        Self {
            store,
            descriptor_dim,
        }
    }

    /// Enroll a new employee. The record is committed before this returns.
    ///
    /// A second enrollment with the same id fails with `DuplicateIdentifier`,
    /// including when both race: the primary key decides the winner.
    pub async fn enroll(
        &self,
        name: &str,
        employee_id: &str,
        descriptor: Descriptor,
    ) -> Result<Employee, DirectoryError> {
        let name = name.trim();
        let employee_id = employee_id.trim();
        if employee_id.is_empty() {
            return Err(DirectoryError::InvalidInput("employee id is required".into()));
        }
        if name.is_empty() {
            return Err(DirectoryError::InvalidInput("name is required".into()));
        }
        descriptor.validate(self.descriptor_dim)?;

        let employee = Employee {
            employee_id: employee_id.to_string(),
            name: name.to_string(),
            descriptor,
            enrolled_at: Utc::now(),
        };

        let row = employee.clone();
        let result = self
            .store
            .conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO employees (employee_id, name, descriptor_dim, descriptor, enrolled_at_ns)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.employee_id,
                        row.name,
                        row.descriptor.len() as i64,
                        row.descriptor.to_le_bytes(),
                        to_nanos(row.enrolled_at)?,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from);

        match result {
            Ok(()) => {
                tracing::info!(employee_id = %employee.employee_id, "employee enrolled");
                Ok(employee)
            }
            Err(e) if e.is_constraint_violation() => {
                Err(DirectoryError::DuplicateIdentifier(employee.employee_id))
            }
            Err(e) => {
                tracing::error!(
                    employee_id = %employee.employee_id,
                    operation = "enroll",
                    at = %employee.enrolled_at,
                    error = %e,
                    "failed to persist employee"
                );
                Err(e.into())
            }
        }
    }

    /// Snapshot of every enrolled employee, in enrollment order.
    ///
    /// Rows whose stored descriptor cannot be decoded are skipped with a
    /// warning so one bad row does not block every verification.
    pub async fn list_all(&self) -> Result<Vec<Employee>, DirectoryError> {
        let employees = self
            .store
            .conn()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT employee_id, name, descriptor_dim, descriptor, enrolled_at_ns
                     FROM employees ORDER BY rowid",
                )?;
                let rows = stmt
                    .query_map([], decode_employee_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows.into_iter().flatten().collect::<Vec<_>>())
            })
            .await
            .map_err(StoreError::from)?;
        Ok(employees)
    }

    /// Look up one employee. The id is trimmed the same way `enroll` trims it.
    pub async fn find_by_id(&self, employee_id: &str) -> Result<Option<Employee>, DirectoryError> {
        let id = employee_id.trim().to_string();
        if id.is_empty() {
            return Ok(None);
        }
        let employee = self
            .store
            .conn()
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT employee_id, name, descriptor_dim, descriptor, enrolled_at_ns
                         FROM employees WHERE employee_id = ?1",
                        params![id],
                        decode_employee_row,
                    )
                    .optional()?;
                Ok(found.flatten())
            })
            .await
            .map_err(StoreError::from)?;
        Ok(employee)
    }

    pub async fn count(&self) -> Result<usize, DirectoryError> {
        let n = self
            .store
            .conn()
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM employees", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .map_err(StoreError::from)?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

/// Decode one `employees` row. `Ok(None)` means the descriptor blob is
/// corrupt; the row is logged and left out.
fn decode_employee_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<Employee>> {
    let employee_id: String = row.get(0)?;
    let dim: i64 = row.get(2)?;
    let blob: Vec<u8> = row.get(3)?;
    let Some(descriptor) = Descriptor::from_le_bytes(&blob).filter(|d| d.len() as i64 == dim) else {
        tracing::warn!(
            employee_id = %employee_id,
            stored_dim = dim,
            blob_bytes = blob.len(),
            "skipping employee with undecodable descriptor"
        );
        return Ok(None);
    };
    Ok(Some(Employee {
        employee_id,
        name: row.get(1)?,
        descriptor,
        enrolled_at: from_nanos(row.get(4)?),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn directory(dim: usize) -> Directory {
        Directory::new(Store::open_in_memory().await.unwrap(), dim)
    }

    #[tokio::test]
    async fn test_enroll_and_list() {
        let dir = directory(3).await;
        let emp = dir
            .enroll("Ada Lovelace", "E1", Descriptor::new(vec![0.1, 0.2, 0.3]))
            .await
            .unwrap();
        assert_eq!(emp.employee_id, "E1");

        let all = dir.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Ada Lovelace");
        assert_eq!(all[0].descriptor, Descriptor::new(vec![0.1, 0.2, 0.3]));
        assert_eq!(all[0].enrolled_at, emp.enrolled_at);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let dir = directory(2).await;
        dir.enroll("Ada", "E1", Descriptor::new(vec![0.0, 1.0]))
            .await
            .unwrap();
        let err = dir
            .enroll("Grace", "E1", Descriptor::new(vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateIdentifier(id) if id == "E1"));

        let all = dir.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Ada");
    }

    #[tokio::test]
    async fn test_concurrent_enroll_same_id() {
        let dir = directory(2).await;
        let a = {
            let dir = dir.clone();
            tokio::spawn(async move { dir.enroll("Ada", "E1", Descriptor::new(vec![0.0, 1.0])).await })
        };
        let b = {
            let dir = dir.clone();
            tokio::spawn(async move { dir.enroll("Grace", "E1", Descriptor::new(vec![1.0, 0.0])).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let dup = results
            .iter()
            .filter(|r| matches!(r, Err(DirectoryError::DuplicateIdentifier(_))))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(dup, 1);
        assert_eq!(dir.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_descriptor_rejected() {
        let dir = directory(3).await;
        let err = dir.enroll("Ada", "E1", Descriptor::new(vec![])).await.unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidDescriptor(DescriptorError::Empty)));

        let err = dir
            .enroll("Ada", "E1", Descriptor::new(vec![1.0, 2.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::InvalidDescriptor(DescriptorError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert_eq!(dir.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blank_fields_rejected() {
        let dir = directory(1).await;
        assert!(matches!(
            dir.enroll("Ada", "  ", Descriptor::new(vec![1.0])).await,
            Err(DirectoryError::InvalidInput(_))
        ));
        assert!(matches!(
            dir.enroll("", "E1", Descriptor::new(vec![1.0])).await,
            Err(DirectoryError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_list_all_in_enrollment_order() {
        let dir = directory(1).await;
        for id in ["E3", "E1", "E2"] {
            dir.enroll(id, id, Descriptor::new(vec![0.5])).await.unwrap();
        }
        let ids: Vec<String> = dir
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.employee_id)
            .collect();
        assert_eq!(ids, vec!["E3", "E1", "E2"]);
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let dir = directory(2).await;
        dir.enroll("Ada", "E1", Descriptor::new(vec![0.5, 0.25]))
            .await
            .unwrap();

        let found = dir.find_by_id("E1").await.unwrap().unwrap();
        assert_eq!(found.name, "Ada");
        assert_eq!(found.descriptor, Descriptor::new(vec![0.5, 0.25]));

        let padded = dir.find_by_id("  E1 ").await.unwrap().unwrap();
        assert_eq!(padded.employee_id, "E1");

        assert!(dir.find_by_id("E2").await.unwrap().is_none());
        assert!(dir.find_by_id("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_descriptor_row_is_skipped() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = Directory::new(store.clone(), 2);
        dir.enroll("Ada", "E1", Descriptor::new(vec![0.0, 1.0]))
            .await
            .unwrap();
        store
            .conn()
            .call(|conn| {
                conn.execute(
                    "INSERT INTO employees (employee_id, name, descriptor_dim, descriptor, enrolled_at_ns)
                     VALUES ('BAD', 'Broken', 2, x'0102', 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        dir.enroll("Grace", "E2", Descriptor::new(vec![1.0, 0.0]))
            .await
            .unwrap();

        let ids: Vec<String> = dir
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.employee_id)
            .collect();
        assert_eq!(ids, vec!["E1", "E2"]);
        assert!(dir.find_by_id("BAD").await.unwrap().is_none());
        assert_eq!(dir.count().await.unwrap(), 3);
    }
}
