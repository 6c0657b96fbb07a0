//! Canonical types for the thresh duplicate-resolution engine.
//!
//! One closed enum per persisted status, row models for the five tables,
//! payload types for every exposed operation, and the typed error taxonomy.
//! This crate does no I/O.

pub mod error;
pub mod status;
pub mod types;

pub use error::{EngineError, EngineResult, ParseEnumError};
pub use status::{GroupStatus, JobStatus, SelectionSource, TaskStatus};
pub use types::{
    now_ts, BulkApplyOutcome, BulkExample, BulkPreviewOutcome, CleanerJob, CleanerJobFile,
    DuplicateGroup, EngineStats, FileCategory, IndexedFile, IngestOutcome, IngestRecord,
    JobCounts, JobSelector, OverrideScope, PatternMatch, PatternOutcome, ProposedOriginal,
    RecalcOutcome, SelectStrategy, SelectionConfig, SelectionPreference, SweepStats, UndoResult,
    ValidateOutcome,
};
