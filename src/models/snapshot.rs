//! Snapshot DTOs.
//!
//! - `ContainerFormat`: tar or zip, the uncompressed archive structure
//! - `Compression`: filter applied to an assembled tar
//! - `SnapshotFormat`: content type and extension for a (container, compression) pair

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Tar,
    Zip,
}

impl ContainerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerFormat::Tar => "tar",
            ContainerFormat::Zip => "zip",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SnapshotFormat {
    pub content_type: &'static str,
    pub extension: &'static str,
}

impl SnapshotFormat {
    /// Zip ignores the compression selector.
    pub fn for_output(container: ContainerFormat, compression: Compression) -> Self {
        let (content_type, extension) = match (container, compression) {
            (ContainerFormat::Zip, _) => ("application/x-zip", ".zip"),
            (ContainerFormat::Tar, Compression::None) => ("application/x-tar", ".tar"),
            (ContainerFormat::Tar, Compression::Gzip) => ("application/x-gzip", ".tar.gz"),
            (ContainerFormat::Tar, Compression::Bzip2) => ("application/x-bzip2", ".tar.bz2"),
        };
        Self { content_type, extension }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_table() {
        let zip = SnapshotFormat::for_output(ContainerFormat::Zip, Compression::Bzip2);
        assert_eq!(zip.content_type, "application/x-zip");
        assert_eq!(zip.extension, ".zip");

        let tar = SnapshotFormat::for_output(ContainerFormat::Tar, Compression::None);
        assert_eq!((tar.content_type, tar.extension), ("application/x-tar", ".tar"));

        let gz = SnapshotFormat::for_output(ContainerFormat::Tar, Compression::Gzip);
        assert_eq!((gz.content_type, gz.extension), ("application/x-gzip", ".tar.gz"));

        let bz = SnapshotFormat::for_output(ContainerFormat::Tar, Compression::Bzip2);
        assert_eq!((bz.content_type, bz.extension), ("application/x-bzip2", ".tar.bz2"));
    }
}
