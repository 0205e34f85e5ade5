pub mod archive;
pub mod blob;
pub mod diff;
pub mod exec;
pub mod mime;
pub mod repository;

pub use archive::{ArchiveBuilder, Snapshot, TreeWalker};
pub use blob::{Blob, BlobRepository};
pub use diff::{DiffEngine, DiffSide};
pub use exec::{GitExe, ProcessExec};
pub use mime::ContentClassifier;
pub use repository::{ObjectLoader, Project};
