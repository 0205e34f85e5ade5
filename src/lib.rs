//! Blob retrieval, content classification, diffs and snapshot archives for
//! git repositories served by a repository browser.
//!
//! - `git::blob`: BlobRepository with native and git-binary backends, write-through cache
//! - `git::mime`: ContentClassifier fallback chain
//! - `git::diff`: DiffEngine over transient files and an external diff tool
//! - `git::archive`: ArchiveBuilder for tar/zip snapshots with gzip/bzip2
//! - `cache`: CacheStore contract and the in-memory store
//! - `config`: the configuration handed to each component

pub mod cache;
pub mod config;
pub mod error;
pub mod git;
pub mod models;

pub use config::Config;
pub use error::{CoreError, Result};
