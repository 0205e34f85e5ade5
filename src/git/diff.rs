//! Unified diffs between two blob revisions.
//!
//! Each present side is written to its own transient file; an absent side
//! (file added or deleted) is compared against the null device. The transient
//! files carry the process id plus a random suffix so concurrent requests never
//! share a path. They are removed when the call returns on any path or its
//! future is dropped, and a dropped call also kills the running tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::git::blob::BlobRepository;
use crate::git::exec::run_tool;

#[cfg(windows)]
pub const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
pub const NULL_DEVICE: &str = "/dev/null";

/// One side of a comparison. `hash: None` means the file does not exist there.
#[derive(Debug, Clone, Copy)]
pub struct DiffSide<'a> {
    pub hash: Option<&'a str>,
    pub label: &'a str,
}

impl<'a> DiffSide<'a> {
    pub fn new(hash: Option<&'a str>, label: &'a str) -> Self {
        Self { hash, label }
    }
}

pub struct DiffEngine {
    diff_bin: String,
    tmp_dir: PathBuf,
    timeout: Duration,
}

impl DiffEngine {
    pub fn new(diff_bin: impl Into<String>, tmp_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            diff_bin: diff_bin.into(),
            tmp_dir: tmp_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.diff_bin, &config.tmp_dir, config.tool_timeout())
    }

    pub async fn diff(&self, repo: &BlobRepository, from: DiffSide<'_>, to: DiffSide<'_>) -> Result<String> {
        tokio::fs::create_dir_all(&self.tmp_dir).await?;

        // Held until the tool exits; dropping them deletes the files.
        let from_file = self.materialize(repo, from.hash, "from").await?;
        let to_file = self.materialize(repo, to.hash, "to").await?;

        let from_path = side_path(from_file.as_ref());
        let to_path = side_path(to_file.as_ref());

        let mut cmd = Command::new(&self.diff_bin);
        cmd.arg("-u")
            .arg("-p")
            .arg("-L")
            .arg(from.label)
            .arg("-L")
            .arg(to.label)
            .arg(&from_path)
            .arg(&to_path);

        tracing::debug!(
            project = repo.project(),
            from = ?from.hash,
            to = ?to.hash,
            "running diff"
        );

        // Exit status 1 only means the inputs differ.
        let output = run_tool(cmd, None, self.timeout).await.map_err(|e| match e {
            CoreError::ToolUnavailable(tool) => CoreError::ToolExecution(format!("{} not found", tool)),
            other => other,
        })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn materialize(&self, repo: &BlobRepository, hash: Option<&str>, side: &str) -> Result<Option<NamedTempFile>> {
        let Some(hash) = hash else {
            return Ok(None);
        };

        let data = repo.read(hash).await?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("blobview_{}_", std::process::id()))
            .suffix(&format!("_{}", side))
            .tempfile_in(&self.tmp_dir)?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(Some(file))
    }
}

fn side_path(file: Option<&NamedTempFile>) -> PathBuf {
    file.map(|f| f.path().to_path_buf())
        .unwrap_or_else(|| Path::new(NULL_DEVICE).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::git::blob::LoaderBackend;
    use crate::git::exec::tool_installed;
    #[cfg(unix)]
    use crate::git::exec::script_tool;
    use crate::git::repository::ObjectLoader;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Arc;

    struct MapLoader(HashMap<String, Vec<u8>>);

    impl ObjectLoader for MapLoader {
        fn get_object(&self, hash: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.0.get(hash).cloned())
        }
    }

    fn fixture(objects: &[(&str, &str)]) -> BlobRepository {
        let map = objects
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        BlobRepository::new(
            "demo.git",
            Box::new(LoaderBackend::new(Arc::new(MapLoader(map)))),
            Arc::new(MemoryCache::new(1 << 20)),
        )
    }

    fn leftover_files(dir: &Path) -> usize {
        fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn deletion_diffs_against_null_device() {
        if !tool_installed("diff") {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiffEngine::new("diff", tmp.path(), Duration::from_secs(10));
        let repo = fixture(&[("aaaa", "line1\n")]);

        let text = engine
            .diff(&repo, DiffSide::new(Some("aaaa"), "a/file.txt"), DiffSide::new(None, NULL_DEVICE))
            .await
            .unwrap();

        assert!(text.contains("--- a/file.txt"), "{}", text);
        assert!(text.contains(&format!("+++ {}", NULL_DEVICE)), "{}", text);
        assert!(text.contains("\n-line1\n"), "{}", text);
        assert!(!text.contains("\n+line1"), "{}", text);
        assert_eq!(leftover_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn modification_shows_both_sides() {
        if !tool_installed("diff") {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiffEngine::new("diff", tmp.path(), Duration::from_secs(10));
        let repo = fixture(&[("aaaa", "one\ntwo\n"), ("bbbb", "one\nthree\n")]);

        let text = engine
            .diff(&repo, DiffSide::new(Some("aaaa"), "a/x"), DiffSide::new(Some("bbbb"), "b/x"))
            .await
            .unwrap();

        assert!(text.contains("--- a/x"));
        assert!(text.contains("+++ b/x"));
        assert!(text.contains("\n-two\n"));
        assert!(text.contains("\n+three\n"));
        assert_eq!(leftover_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn identical_sides_give_empty_diff() {
        if !tool_installed("diff") {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiffEngine::new("diff", tmp.path(), Duration::from_secs(10));
        let repo = fixture(&[("aaaa", "same\n")]);

        let text = engine
            .diff(&repo, DiffSide::new(Some("aaaa"), "a/x"), DiffSide::new(Some("aaaa"), "b/x"))
            .await
            .unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn missing_object_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiffEngine::new("diff", tmp.path(), Duration::from_secs(10));
        let repo = fixture(&[("aaaa", "line1\n")]);

        let err = engine
            .diff(&repo, DiffSide::new(Some("aaaa"), "a/x"), DiffSide::new(Some("missing"), "b/x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(leftover_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn missing_diff_binary_is_execution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiffEngine::new("blobview-no-such-diff", tmp.path(), Duration::from_secs(10));
        let repo = fixture(&[("aaaa", "line1\n")]);

        let err = engine
            .diff(&repo, DiffSide::new(Some("aaaa"), "a/x"), DiffSide::new(None, "b/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolExecution(_)));
        assert_eq!(leftover_files(tmp.path()), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_diffs_do_not_collide() {
        if !tool_installed("diff") {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(DiffEngine::new("diff", tmp.path(), Duration::from_secs(30)));

        let mut objects = Vec::new();
        for i in 0..16 {
            objects.push((format!("old{}", i), format!("shared\nold {}\n", i)));
            objects.push((format!("new{}", i), format!("shared\nnew {}\n", i)));
        }
        let borrowed: Vec<(&str, &str)> = objects.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let repo = Arc::new(fixture(&borrowed));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let engine = engine.clone();
                let repo = repo.clone();
                tokio::spawn(async move {
                    let from = format!("old{}", i);
                    let to = format!("new{}", i);
                    let text = engine
                        .diff(&repo, DiffSide::new(Some(from.as_str()), "a/f"), DiffSide::new(Some(to.as_str()), "b/f"))
                        .await
                        .unwrap();
                    (i, text)
                })
            })
            .collect();

        for task in tasks {
            let (i, text) = task.await.unwrap();
            assert!(text.contains(&format!("\n-old {}\n", i)), "{}", text);
            assert!(text.contains(&format!("\n+new {}\n", i)), "{}", text);
            for other in (0..16).filter(|j| *j != i) {
                assert!(!text.contains(&format!("old {}\n", other)));
            }
        }
        assert_eq!(leftover_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn creates_missing_tmp_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("spool").join("diff");
        let engine = DiffEngine::new("blobview-no-such-diff", &nested, Duration::from_secs(10));
        let repo = fixture(&[("aaaa", "line1\n")]);

        let err = engine
            .diff(&repo, DiffSide::new(Some("aaaa"), "a/x"), DiffSide::new(None, "b/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolExecution(_)));
        assert!(nested.is_dir());
        assert_eq!(leftover_files(&nested), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_request_kills_diff_and_removes_inputs() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let marker = bin.path().join("finished");
        let slow = script_tool(bin.path(), "slow-diff", &format!("sleep 1\ntouch '{}'", marker.display()));
        let engine = DiffEngine::new(slow.to_string_lossy().into_owned(), tmp.path(), Duration::from_secs(30));
        let repo = fixture(&[("aaaa", "one\n"), ("bbbb", "two\n")]);

        let pending = engine.diff(&repo, DiffSide::new(Some("aaaa"), "a/x"), DiffSide::new(Some("bbbb"), "b/x"));
        assert!(tokio::time::timeout(Duration::from_millis(300), pending).await.is_err());
        assert_eq!(leftover_files(tmp.path()), 0);

        // The script would have touched the marker had it survived the drop
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_diff_times_out_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let slow = script_tool(bin.path(), "slow-diff", "sleep 5");
        let engine = DiffEngine::new(slow.to_string_lossy().into_owned(), tmp.path(), Duration::from_millis(200));
        let repo = fixture(&[("aaaa", "one\n"), ("bbbb", "two\n")]);

        let err = engine
            .diff(&repo, DiffSide::new(Some("aaaa"), "a/x"), DiffSide::new(Some("bbbb"), "b/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolExecution(msg) if msg.contains("timed out")));
        assert_eq!(leftover_files(tmp.path()), 0);
    }
}
