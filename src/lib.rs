//! Notebook transfer library
//!
//! Bulk export and import for a productivity notebook: bundle format,
//! validation, relationship ordering, conflict handling and the import
//! executor, plus a SQLite document store to run them against.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod logging;
pub mod store;
pub mod transfer;
pub mod types;
