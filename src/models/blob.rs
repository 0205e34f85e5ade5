//! Blob DTOs.
//!
//! - `FileKind`: what a tree entry mode says the object is
//! - `BlobInfo`: metadata summary for a single blob
//!
//! Used by: the `info` command and tree listings that need sizes without content

use serde::{Deserialize, Serialize};

const MODE_DIRECTORY: u32 = 0x4000;
const MODE_SYMLINK: u32 = 0xA000;
const MODE_FILE: u32 = 0x8000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Directory,
    Symlink,
    File,
    Unknown,
}

impl FileKind {
    /// Classify a mode bitmask. Directory wins over symlink, symlink over file.
    pub fn from_mode(mode: u32) -> Self {
        if mode & MODE_DIRECTORY == MODE_DIRECTORY {
            FileKind::Directory
        } else if mode & MODE_SYMLINK == MODE_SYMLINK {
            FileKind::Symlink
        } else if mode & MODE_FILE == MODE_FILE {
            FileKind::File
        } else {
            FileKind::Unknown
        }
    }

    /// Classify the octal string form used in tree listings, e.g. `100644`.
    pub fn from_octal(mode: &str) -> Self {
        u32::from_str_radix(mode.trim(), 8)
            .map(Self::from_mode)
            .unwrap_or(FileKind::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Directory => "directory",
            FileKind::Symlink => "symlink",
            FileKind::File => "file",
            FileKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobInfo {
    pub project: String,
    pub hash: String,
    pub name: Option<String>,
    pub size: u64,
    pub is_binary: bool,
    /// Empty when no strategy could classify the content
    pub mime: String,
}
