//! Bulk import engine.
//!
//! An import runs through a fixed sequence of phases:
//!
//! 1. parse and validate the bundle ([`validation`])
//! 2. map cross-references and derive a load order ([`relationships`])
//! 3. detect conflicts against current data ([`conflicts`])
//! 4. plan writes and identifiers ([`remap`]), optionally snapshot current
//!    data ([`backup`])
//! 5. replay the plan kind by kind through the stores ([`executor`]),
//!    reporting progress ([`progress`])

pub mod backup;
pub mod conflicts;
pub mod executor;
pub mod merge;
pub mod progress;
pub mod relationships;
pub mod remap;
pub mod validation;

pub use backup::{BackupSink, BackupSnapshot, FileBackupSink, MemoryBackupSink};
pub use conflicts::{
    Conflict, ConflictDefaults, ConflictReport, ConflictType, Resolution, detect_conflicts,
};
pub use executor::{
    CancellationHandle, ImportExecutor, ImportOptions, ImportResult, PlannedWrite, WriteAction,
};
pub use progress::{ImportPhase, ImportProgress, KindProgress, ProgressCallback};
pub use relationships::{CycleBreak, DependencyGraph, Edge, ImportOrder, RelationshipMap, map_relationships};
pub use remap::{IdGenerator, IdMapping, PetnameIdGenerator, SequentialIdGenerator};
pub use validation::{Severity, ValidatedBundle, ValidationIssue};
