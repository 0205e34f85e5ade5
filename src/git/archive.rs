//! Snapshot archives of a tree at a revision.
//!
//! - `TreeWalker`: turns a revision into raw tar or zip bytes
//!   - `NativeTreeWalker`: libgit2 tree walk written with the tar/zip crates
//!   - `ExecTreeWalker`: `git archive` through a `ProcessExec`
//! - `ArchiveBuilder`: caching plus the compression filter
//!
//! The cache holds the raw container keyed by (project, commit, container
//! format). Compression is applied to whatever bytes come out of the cache or
//! the walker, so one cached tar serves plain, gzip and bzip2 requests alike.

use async_trait::async_trait;
use git2::{ObjectType, Repository, Tree};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::SimpleFileOptions;

use crate::cache::{archive_key, CacheStore};
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::git::exec::{GitExe, ProcessExec};
use crate::git::repository::{display_name, Project};
use crate::models::{Compression, ContainerFormat, FileKind, SnapshotFormat};

pub const DEFAULT_REVISION: &str = "HEAD";

#[async_trait]
pub trait TreeWalker: Send + Sync {
    /// Full commit id for `revision`, or `NotFound`.
    async fn resolve_revision(&self, revision: &str) -> Result<String>;

    /// Uncompressed container of the tree at `revision`. Entries are placed
    /// under `prefix` when one is given.
    async fn build_container(&self, revision: &str, format: ContainerFormat, prefix: Option<&str>) -> Result<Vec<u8>>;
}

pub struct NativeTreeWalker {
    repo_path: PathBuf,
}

impl NativeTreeWalker {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }
}

#[async_trait]
impl TreeWalker for NativeTreeWalker {
    async fn resolve_revision(&self, revision: &str) -> Result<String> {
        let repo_path = self.repo_path.clone();
        let revision = revision.to_string();
        blocking(move || {
            let repo = Repository::open(&repo_path)?;
            Ok(find_commit(&repo, &revision)?.id().to_string())
        })
        .await
    }

    async fn build_container(&self, revision: &str, format: ContainerFormat, prefix: Option<&str>) -> Result<Vec<u8>> {
        let repo_path = self.repo_path.clone();
        let revision = revision.to_string();
        let prefix = prefix.map(str::to_string);
        blocking(move || build_native(&repo_path, &revision, format, prefix.as_deref())).await
    }
}

async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::RetrievalFailure(format!("archive task failed: {}", e)))?
}

fn find_commit<'r>(repo: &'r Repository, revision: &str) -> Result<git2::Commit<'r>> {
    repo.revparse_single(revision)
        .and_then(|obj| obj.peel_to_commit())
        .map_err(|_| CoreError::NotFound(format!("revision {}", revision)))
}

enum ArchiveEntry {
    Directory { path: String },
    File { path: String, mode: u32, data: Vec<u8> },
    Symlink { path: String, target: String },
}

fn build_native(repo_path: &Path, revision: &str, format: ContainerFormat, prefix: Option<&str>) -> Result<Vec<u8>> {
    let repo = Repository::open(repo_path)?;
    let commit = find_commit(&repo, revision)?;
    let tree = commit.tree()?;
    let mtime = commit.time().seconds().max(0) as u64;

    let mut entries = Vec::new();
    if let Some(prefix) = prefix {
        entries.push(ArchiveEntry::Directory {
            path: prefix.trim_end_matches('/').to_string(),
        });
    }
    let base = prefix.map(|p| p.trim_end_matches('/')).unwrap_or("");
    collect_entries(&repo, &tree, base, &mut entries)?;

    tracing::debug!(revision, entries = entries.len(), format = format.as_str(), "walked tree");

    match format {
        ContainerFormat::Tar => write_tar(&entries, mtime).map_err(CoreError::from),
        ContainerFormat::Zip => write_zip(&entries).map_err(|e| CoreError::RetrievalFailure(format!("zip: {}", e))),
    }
}

fn collect_entries(repo: &Repository, tree: &Tree, base_path: &str, out: &mut Vec<ArchiveEntry>) -> Result<()> {
    for entry in tree.iter() {
        let name = String::from_utf8_lossy(entry.name_bytes());
        let path = if base_path.is_empty() {
            name.into_owned()
        } else {
            format!("{}/{}", base_path, name)
        };

        match FileKind::from_mode(entry.filemode() as u32) {
            FileKind::Directory => {
                out.push(ArchiveEntry::Directory { path: path.clone() });
                // Submodules are archived as empty directories
                if entry.kind() == Some(ObjectType::Tree) {
                    let subtree = repo.find_tree(entry.id())?;
                    collect_entries(repo, &subtree, &path, out)?;
                }
            }
            FileKind::Symlink => {
                let blob = repo.find_blob(entry.id())?;
                out.push(ArchiveEntry::Symlink {
                    path,
                    target: String::from_utf8_lossy(blob.content()).into_owned(),
                });
            }
            FileKind::File => {
                let blob = repo.find_blob(entry.id())?;
                let mode = if entry.filemode() & 0o111 != 0 { 0o755 } else { 0o644 };
                out.push(ArchiveEntry::File {
                    path,
                    mode,
                    data: blob.content().to_vec(),
                });
            }
            FileKind::Unknown => {
                tracing::warn!(%path, mode = entry.filemode(), "skipping entry with unknown mode");
            }
        }
    }
    Ok(())
}

fn write_tar(entries: &[ArchiveEntry], mtime: u64) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_mtime(mtime);
        match entry {
            ArchiveEntry::Directory { path } => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, format!("{}/", path), io::empty())?;
            }
            ArchiveEntry::File { path, mode, data } => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, path, data.as_slice())?;
            }
            ArchiveEntry::Symlink { path, target } => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, path, target)?;
            }
        }
    }

    builder.into_inner()
}

fn write_zip(entries: &[ArchiveEntry]) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in entries {
        match entry {
            ArchiveEntry::Directory { path } => {
                writer.add_directory(format!("{}/", path), options.unix_permissions(0o755))?;
            }
            ArchiveEntry::File { path, mode, data } => {
                writer.start_file(path.clone(), options.unix_permissions(*mode))?;
                writer.write_all(data)?;
            }
            ArchiveEntry::Symlink { path, target } => {
                writer.add_symlink(path.clone(), target.clone(), options)?;
            }
        }
    }

    Ok(writer.finish()?.into_inner())
}

/// `git archive`, for hosts where the native reader is not wanted.
pub struct ExecTreeWalker {
    exec: Arc<dyn ProcessExec>,
    repo_path: PathBuf,
}

impl ExecTreeWalker {
    pub fn new(exec: Arc<dyn ProcessExec>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            exec,
            repo_path: repo_path.into(),
        }
    }
}

#[async_trait]
impl TreeWalker for ExecTreeWalker {
    async fn resolve_revision(&self, revision: &str) -> Result<String> {
        let spec = format!("{}^{{commit}}", revision);
        let out = self
            .exec
            .output(&self.repo_path, "rev-parse", &["--verify", "--quiet", spec.as_str()])
            .await?;

        // git ran but could not name a commit
        let commit = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if !out.success || commit.is_empty() {
            return Err(CoreError::NotFound(format!("revision {}", revision)));
        }
        Ok(commit)
    }

    async fn build_container(&self, revision: &str, format: ContainerFormat, prefix: Option<&str>) -> Result<Vec<u8>> {
        let format_arg = format!("--format={}", format.as_str());
        let prefix_arg = prefix.map(|p| format!("--prefix={}/", p.trim_end_matches('/')));

        let mut args = vec![format_arg.as_str()];
        if let Some(prefix_arg) = &prefix_arg {
            args.push(prefix_arg.as_str());
        }
        args.push(revision);

        self.exec.run(&self.repo_path, "archive", &args).await
    }
}

/// Archive bytes plus the response metadata derived from the output format.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub data: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
    pub filename: String,
}

pub struct ArchiveBuilder {
    walker: Box<dyn TreeWalker>,
    cache: Arc<dyn CacheStore>,
    gzip_level: u32,
    bzip2_level: u32,
}

impl ArchiveBuilder {
    pub fn new(walker: Box<dyn TreeWalker>, cache: Arc<dyn CacheStore>, gzip_level: u32, bzip2_level: u32) -> Self {
        Self {
            walker,
            cache,
            gzip_level,
            bzip2_level,
        }
    }

    /// Pick the walker from `config.compat`.
    pub fn for_project(project: &Project, config: &Config, cache: Arc<dyn CacheStore>) -> Self {
        let walker: Box<dyn TreeWalker> = if config.compat {
            let exec = Arc::new(GitExe::new(&config.git_bin, config.tool_timeout()));
            Box::new(ExecTreeWalker::new(exec, project.path.clone()))
        } else {
            Box::new(NativeTreeWalker::new(project.path.clone()))
        };
        Self::new(walker, cache, config.gzip_level, config.bzip2_level)
    }

    pub async fn snapshot(
        &self,
        project: &str,
        revision: Option<&str>,
        container: ContainerFormat,
        compression: Compression,
    ) -> Result<Snapshot> {
        let name = display_name(project);
        let commit = self.walker.resolve_revision(revision.unwrap_or(DEFAULT_REVISION)).await?;

        let key = archive_key(project, &commit, container);
        let raw = match self.cache.get(&key) {
            Some(raw) => {
                tracing::debug!(%key, "snapshot cache hit");
                raw
            }
            None => {
                tracing::debug!(%key, "snapshot cache miss");
                let prefix = match container {
                    ContainerFormat::Tar => Some(name.as_str()),
                    ContainerFormat::Zip => None,
                };
                let built: Arc<[u8]> = self.walker.build_container(&commit, container, prefix).await?.into();
                self.cache.set(&key, built.clone());
                built
            }
        };

        let (data, compression) = match container {
            ContainerFormat::Zip => (raw.to_vec(), Compression::None),
            ContainerFormat::Tar => self.compress(raw, compression).await,
        };

        let format = SnapshotFormat::for_output(container, compression);
        Ok(Snapshot {
            data,
            content_type: format.content_type,
            extension: format.extension,
            filename: format!("{}{}", name, format.extension),
        })
    }

    /// Returns the compression actually applied; a failing encoder falls back
    /// to the plain tar.
    async fn compress(&self, raw: Arc<[u8]>, compression: Compression) -> (Vec<u8>, Compression) {
        if compression == Compression::None {
            return (raw.to_vec(), Compression::None);
        }

        let (gzip_level, bzip2_level) = (self.gzip_level, self.bzip2_level);
        let input = raw.clone();
        let encoded = tokio::task::spawn_blocking(move || encode(&input, compression, gzip_level, bzip2_level)).await;

        match encoded {
            Ok(Ok(data)) => (data, compression),
            Ok(Err(e)) => {
                tracing::warn!(?compression, error = %e, "compression failed, serving plain tar");
                (raw.to_vec(), Compression::None)
            }
            Err(e) => {
                tracing::warn!(?compression, error = %e, "compression task failed, serving plain tar");
                (raw.to_vec(), Compression::None)
            }
        }
    }
}

fn encode(data: &[u8], compression: Compression, gzip_level: u32, bzip2_level: u32) -> io::Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let level = flate2::Compression::new(gzip_level.min(9));
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
        Compression::Bzip2 => {
            let level = bzip2::Compression::new(bzip2_level.clamp(1, 9));
            let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
    }
}
