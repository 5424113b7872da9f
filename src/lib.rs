//! Resumable, hash-identified incremental synchronization of a code
//! repository's semantic content into a vector index.
//!
//! The engine mirrors symbols (functions, classes, methods) rather than
//! files: each symbol is identified by a stable key, compared by a
//! normalized chunk hash, and re-embedded only when its meaning-bearing
//! content changed. A durable per-repository registry plus a per-run state
//! file make runs safe to interrupt anywhere; the revision checkpoint
//! advances only when every file of a run reached a terminal status.

pub mod classify;
pub mod config;
pub mod embed;
pub mod error;
pub mod governor;
pub mod hash;
pub mod host;
pub mod index;
pub mod parse;
pub mod registry;
pub mod run_state;
pub mod sync;
pub mod types;

pub use error::{Error, Result};
