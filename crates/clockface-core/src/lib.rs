//! clockface-core: face descriptor matching and attendance records.
//!
//! Descriptors are produced by an external recognition model; this crate
//! only compares them (Euclidean distance under an acceptance threshold)
//! and defines the records the attendance daemon persists.

pub mod matcher;
pub mod report;
pub mod types;

pub use matcher::{match_identity, EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use types::{
    distance, AttendanceEvent, AttendanceKind, Descriptor, DescriptorError, Employee, ExportRow,
    DEFAULT_DESCRIPTOR_DIM,
};
