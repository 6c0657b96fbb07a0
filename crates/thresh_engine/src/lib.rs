//! Duplicate-group lifecycle and safe-cleanup engine.
//!
//! For every group of content-identical files, decide which member is the
//! original to keep, then archive and delete the rest - crash-safe,
//! idempotent, and partially failable. Human decisions (Validated and
//! beyond) are never overwritten by automated recomputation.

pub mod archive;
pub mod cancel;
pub mod cleaner;
pub mod config;
pub mod db;
pub mod engine;
pub mod ingest;
pub mod lifecycle;
pub mod retention;
pub mod selection;
pub mod verify;

pub use archive::{archive_key, ArchiveStore, FsArchiveStore};
pub use cancel::CancellationToken;
pub use config::EngineConfig;
pub use engine::Engine;
