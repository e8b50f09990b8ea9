//! Attendance service: the capability object shared by every request handler.
//!
//! Built once at startup from the store, extractor, sink and mirror worker.
//! Handlers hold it behind an `Arc`; it has no mutable state of its own.
//!
//! Read consistency: verification matches against a snapshot of the
//! directory taken when the request starts. An employee whose enrollment
//! commits while a verification is in flight may not be seen by it.

use crate::directory::{Directory, DirectoryError};
use crate::extractor::DescriptorExtractor;
use crate::ledger::{Ledger, LedgerError};
use crate::mirror::MirrorHandle;
use crate::sink::{ReportSink, SinkError};
use crate::store::{Store, StoreError};
use chrono::Utc;
use clockface_core::{
    AttendanceEvent, AttendanceKind, Descriptor, DescriptorError, Employee, ExportRow, Matcher,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("employee not recognized")]
    NoMatch,
    #[error("employee id already enrolled: {0}")]
    DuplicateIdentifier(String),
    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),
    /// The face matched `employee_id` but the ledger append failed.
    #[error("verified {employee_id} but failed to record attendance: {source}")]
    RecordFailed {
        employee_id: String,
        #[source]
        source: LedgerError,
    },
    #[error("report sink unavailable: {0}")]
    ExportUnavailable(#[source] SinkError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DirectoryError> for AttendanceError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::DuplicateIdentifier(id) => AttendanceError::DuplicateIdentifier(id),
            DirectoryError::InvalidDescriptor(e) => AttendanceError::InvalidDescriptor(e),
            DirectoryError::InvalidInput(msg) => AttendanceError::InvalidInput(msg),
            DirectoryError::Store(e) => AttendanceError::Persistence(e),
        }
    }
}

impl From<LedgerError> for AttendanceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidInput(msg) => AttendanceError::InvalidInput(msg),
            LedgerError::Store(e) => AttendanceError::Persistence(e),
            LedgerError::Interrupted(e) => AttendanceError::Internal(e.to_string()),
        }
    }
}

/// Face input: a ready descriptor, or image bytes for the extractor.
#[derive(Debug, Clone)]
pub enum FaceInput {
    Descriptor(Descriptor),
    Image(Vec<u8>),
}

/// Tunables taken from `Config`.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub descriptor_dim: usize,
    pub match_threshold: f32,
    pub extract_timeout: Duration,
    pub sink_timeout: Duration,
}

/// Outcome of a successful verify-and-record.
#[derive(Debug, Clone)]
pub struct Verification {
    pub employee: Employee,
    pub event: AttendanceEvent,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub employees: usize,
    pub events: usize,
    pub sink_enabled: bool,
    pub extractor_configured: bool,
    pub match_threshold: f32,
    pub descriptor_dim: usize,
}

pub struct AttendanceService {
    directory: Directory,
    ledger: Ledger,
    matcher: Box<dyn Matcher>,
    extractor: Option<Arc<dyn DescriptorExtractor>>,
    sink: Arc<dyn ReportSink>,
    mirror: MirrorHandle,
    settings: ServiceSettings,
}

impl AttendanceService {
    pub fn new(
        store: Store,
        matcher: Box<dyn Matcher>,
        extractor: Option<Arc<dyn DescriptorExtractor>>,
        sink: Arc<dyn ReportSink>,
        mirror: MirrorHandle,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            directory: Directory::new(store.clone(), settings.descriptor_dim),
            ledger: Ledger::new(store),
            matcher,
            extractor,
            sink,
            mirror,
            settings,
        }
    }

    /// Enroll an employee from a descriptor or a face image.
    pub async fn enroll(
        &self,
        name: &str,
        employee_id: &str,
        face: FaceInput,
    ) -> Result<Employee, AttendanceError> {
        let descriptor = self.resolve_descriptor(face).await?;
        Ok(self.directory.enroll(name, employee_id, descriptor).await?)
    }

    /// Identify the presented face and record an attendance event for it.
    ///
    /// Extraction and matching failures come back as `NoFaceDetected` /
    /// `NoMatch`. Once a match is found, a ledger failure is reported as
    /// `RecordFailed`, never as a verification failure.
    pub async fn verify_and_record(
        &self,
        face: FaceInput,
        kind: AttendanceKind,
    ) -> Result<Verification, AttendanceError> {
        let probe = self.resolve_descriptor(face).await?;

        let gallery = self.directory.list_all().await.map_err(|e| {
            tracing::error!(operation = "verify", at = %Utc::now(), error = %e, "failed to load directory snapshot");
            AttendanceError::from(e)
        })?;

        let outcome = self
            .matcher
            .best_match(&probe, &gallery, self.settings.match_threshold);
        tracing::debug!(
            candidates = gallery.len(),
            best_distance = ?outcome.best_distance,
            matched = outcome.matched,
            "match evaluated"
        );

        let (Some(idx), Some(distance)) = (outcome.index, outcome.best_distance) else {
            tracing::info!(best_distance = ?outcome.best_distance, "face not recognized");
            return Err(AttendanceError::NoMatch);
        };
        let employee = gallery[idx].clone();

        // The append and the mirror hand-off run in their own task, so a
        // client that disconnects mid-request cannot cancel a committed write.
        let ledger = self.ledger.clone();
        let mirror = self.mirror.clone();
        let employee_id = employee.employee_id.clone();
        let name = employee.name.clone();
        let task = tokio::spawn(async move {
            let event = ledger.record(&employee_id, kind).await?;
            mirror.mirror(&event, &name);
            Ok::<_, LedgerError>(event)
        });

        let recorded = match task.await {
            Ok(result) => result,
            Err(join_err) => Err(LedgerError::from(join_err)),
        };

        match recorded {
            Ok(event) => Ok(Verification {
                employee,
                event,
                distance,
            }),
            Err(source) => {
                tracing::error!(
                    employee_id = %employee.employee_id,
                    kind = %kind,
                    operation = "record",
                    at = %Utc::now(),
                    error = %source,
                    "verification succeeded but attendance was not recorded"
                );
                Err(AttendanceError::RecordFailed {
                    employee_id: employee.employee_id,
                    source,
                })
            }
        }
    }

    pub async fn find_employee(&self, employee_id: &str) -> Result<Option<Employee>, AttendanceError> {
        Ok(self.directory.find_by_id(employee_id).await?)
    }

    /// Ledger contents as flattened report rows, in append order.
    pub async fn export_report(&self) -> Result<Vec<ExportRow>, AttendanceError> {
        self.ledger.export_all().await.map_err(|e| {
            tracing::error!(operation = "export", at = %Utc::now(), error = %e, "failed to read ledger");
            AttendanceError::from(e)
        })
    }

    /// Current contents of the external report sink.
    ///
    /// There is no local fallback on this path, so sink failures and
    /// timeouts are returned as `ExportUnavailable`.
    pub async fn fetch_sink_report(&self) -> Result<Vec<Vec<String>>, AttendanceError> {
        let timeout = self.settings.sink_timeout;
        let result = match tokio::time::timeout(timeout, self.sink.read_all()).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(timeout)),
        };
        result.map_err(|e| {
            tracing::warn!(operation = "fetch_sink_report", at = %Utc::now(), error = %e, "report sink read failed");
            AttendanceError::ExportUnavailable(e)
        })
    }

    pub async fn status(&self) -> Result<ServiceStatus, AttendanceError> {
        Ok(ServiceStatus {
            employees: self.directory.count().await?,
            events: self.ledger.count().await?,
            sink_enabled: self.sink.is_enabled(),
            extractor_configured: self.extractor.is_some(),
            match_threshold: self.settings.match_threshold,
            descriptor_dim: self.settings.descriptor_dim,
        })
    }

    async fn resolve_descriptor(&self, face: FaceInput) -> Result<Descriptor, AttendanceError> {
        let descriptor = match face {
            FaceInput::Descriptor(d) => {
                d.validate(self.settings.descriptor_dim)?;
                return Ok(d);
            }
            FaceInput::Image(bytes) => {
                let extractor = self.extractor.as_ref().ok_or_else(|| {
                    AttendanceError::InvalidInput("image extraction is not configured".into())
                })?;
                if bytes.is_empty() {
                    return Err(AttendanceError::InvalidInput("image is empty".into()));
                }
                tracing::debug!(bytes = bytes.len(), "extracting descriptor");
                match tokio::time::timeout(self.settings.extract_timeout, extractor.extract(bytes)).await {
                    Ok(Some(d)) => d,
                    Ok(None) => return Err(AttendanceError::NoFaceDetected),
                    Err(_) => {
                        tracing::warn!(timeout = ?self.settings.extract_timeout, "descriptor extraction timed out");
                        return Err(AttendanceError::NoFaceDetected);
                    }
                }
            }
        };

        if let Err(e) = descriptor.validate(self.settings.descriptor_dim) {
            tracing::error!(error = %e, "extractor produced an unusable descriptor");
            return Err(e.into());
        }
        Ok(descriptor)
    }
}
