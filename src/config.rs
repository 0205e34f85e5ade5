//! Runtime configuration.
//!
//! One value object handed to every component at construction time instead of
//! components reading global settings. Loaded from a JSON file; any missing
//! field takes its default.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::models::{Compression, ContainerFormat};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that project identifiers are resolved against
    pub project_root: PathBuf,
    /// Read objects through the git binary instead of libgit2
    pub compat: bool,
    pub git_bin: String,
    /// Signature database handed to the external content-typing tool (`file -m`).
    /// In-process signature detection uses its own built-in table and ignores this.
    pub magic_db: Option<PathBuf>,
    /// In-process buffer signature detection
    pub signature_detection: bool,
    /// External content-typing tool; `None` disables that strategy
    pub file_command: Option<String>,
    pub diff_bin: String,
    /// Where diff inputs are materialized
    pub tmp_dir: PathBuf,
    pub gzip_level: u32,
    pub bzip2_level: u32,
    pub tool_timeout_secs: u64,
    /// Upper bound on cached blob and archive bytes
    pub cache_max_bytes: u64,
    pub snapshot_format: ContainerFormat,
    pub snapshot_compression: Compression,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            compat: false,
            git_bin: "git".to_string(),
            magic_db: None,
            signature_detection: true,
            file_command: if cfg!(windows) { None } else { Some("file".to_string()) },
            diff_bin: "diff".to_string(),
            tmp_dir: std::env::temp_dir().join("blobview"),
            gzip_level: 6,
            bzip2_level: 4,
            tool_timeout_secs: 30,
            cache_max_bytes: 256 * 1024 * 1024,
            snapshot_format: ContainerFormat::Zip,
            snapshot_compression: Compression::None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}
