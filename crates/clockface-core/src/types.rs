use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default descriptor length produced by the dlib-style face recognition net.
pub const DEFAULT_DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("descriptor is empty")]
    Empty,
    #[error("descriptor component {index} is not finite")]
    NonFinite { index: usize },
}

/// Face descriptor (fixed-length embedding, typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check that the descriptor is non-empty, finite and exactly `expected_dim` long.
    ///
    /// Mismatched lengths are rejected outright; descriptors are never padded
    /// or truncated to fit.
    pub fn validate(&self, expected_dim: usize) -> Result<(), DescriptorError> {
        if self.values.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if self.values.len() != expected_dim {
            return Err(DescriptorError::DimensionMismatch {
                expected: expected_dim,
                actual: self.values.len(),
            });
        }
        if let Some(index) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite { index });
        }
        Ok(())
    }

    /// Euclidean distance to another descriptor of the same length.
    pub fn distance(&self, other: &Descriptor) -> Result<f32, DescriptorError> {
        distance(&self.values, &other.values)
    }

    /// Little-endian `f32` byte encoding used for storage.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(std::mem::size_of_val(self.values.as_slice()));
        for &value in &self.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Decode a little-endian `f32` blob. Returns `None` if the blob length is not
    /// a whole number of `f32`s.
    pub fn from_le_bytes(blob: &[u8]) -> Option<Self> {
        if blob.len() % 4 != 0 {
            return None;
        }
        let values = blob
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self { values })
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Euclidean distance between two equal-length vectors.
pub fn distance(a: &[f32], b: &[f32]) -> Result<f32, DescriptorError> {
    if a.len() != b.len() {
        return Err(DescriptorError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// An enrolled employee. Never mutated after enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: String,
    pub name: String,
    pub descriptor: Descriptor,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceKind {
    CheckIn,
    CheckOut,
}

impl AttendanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceKind::CheckIn => "CHECK_IN",
            AttendanceKind::CheckOut => "CHECK_OUT",
        }
    }
}

impl fmt::Display for AttendanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown attendance kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for AttendanceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECK_IN" => Ok(AttendanceKind::CheckIn),
            "CHECK_OUT" => Ok(AttendanceKind::CheckOut),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// One entry of the attendance ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    /// Position in the ledger (append order).
    pub seq: i64,
    pub employee_id: String,
    pub kind: AttendanceKind,
    pub timestamp: DateTime<Utc>,
}

/// Flattened ledger row for tabular export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub employee_id: String,
    /// Empty when the employee is no longer in the directory.
    pub name: String,
    pub kind: AttendanceKind,
    pub timestamp: DateTime<Utc>,
}

impl ExportRow {
    pub fn from_event(event: &AttendanceEvent, name: impl Into<String>) -> Self {
        Self {
            employee_id: event.employee_id.clone(),
            name: name.into(),
            kind: event.kind,
            timestamp: event.timestamp,
        }
    }

    /// Row cells in report column order: employee id, name, kind, timestamp.
    pub fn cells(&self) -> [String; 4] {
        [
            self.employee_id.clone(),
            self.name.clone(),
            self.kind.to_string(),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        ]
    }
}
