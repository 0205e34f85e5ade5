//! Object cache shared by every request.
//!
//! Stores fully materialized values under deterministic string keys:
//! - Blob content: `project|<project>|blob|<hash>`
//! - Raw snapshot containers: `project|<project>|archive|<commit>|<format>`
//!
//! Values are inserted whole, so a concurrent reader sees either the previous
//! value or the new one, never a partial write. Two requests racing on the same
//! key both write and the last one wins.
//!
//! Used by: `BlobRepository::read()` and `ArchiveBuilder::snapshot()`

use moka::sync::Cache;
use std::sync::Arc;

use crate::models::ContainerFormat;

pub type CachedBytes = Arc<[u8]>;

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedBytes>;
    fn set(&self, key: &str, value: CachedBytes);
    fn exists(&self, key: &str) -> bool;
}

pub fn blob_key(project: &str, hash: &str) -> String {
    format!("project|{}|blob|{}", project, hash)
}

/// Compression is deliberately absent: the cached value is the raw container.
pub fn archive_key(project: &str, commit: &str, format: ContainerFormat) -> String {
    format!("project|{}|archive|{}|{}", project, commit, format.as_str())
}

/// In-process cache bounded by the total size of its values in bytes.
pub struct MemoryCache {
    entries: Cache<String, CachedBytes>,
}

impl MemoryCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: Cache::builder()
                .weigher(|_key: &String, value: &CachedBytes| u32::try_from(value.len()).unwrap_or(u32::MAX))
                .max_capacity(max_bytes)
                .build(),
        }
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    /// Sum of the byte sizes of every live entry.
    pub fn weighted_size(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.weighted_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<CachedBytes> {
        self.entries.get(key)
    }

    fn set(&self, key: &str, value: CachedBytes) {
        self.entries.insert(key.to_string(), value);
    }

    fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}
