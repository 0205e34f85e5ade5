//! Data transfer objects shared between the core and its consumers.
//!
//! - `blob`: BlobInfo summary, FileKind derived from tree entry modes
//! - `snapshot`: ContainerFormat, Compression, SnapshotFormat lookup table

pub mod blob;
pub mod snapshot;

pub use blob::*;
pub use snapshot::*;
