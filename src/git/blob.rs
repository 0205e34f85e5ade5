//! Blob retrieval.
//!
//! `BlobRepository` hides which backend produced the bytes:
//! - `LoaderBackend`: native object access through an `ObjectLoader`
//! - `ExecBackend`: `git cat-file blob <hash>` through a `ProcessExec`
//!
//! Every successful backend read is written to the `CacheStore` under the blob
//! key before it is returned; later reads for the same (project, hash) are served
//! from the cache without touching the backend.
//!
//! `Blob` is the per-request handle. Its content moves from `Unread` to `Read`
//! exactly once; size, binary and MIME queries after that use the held bytes.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{blob_key, CacheStore, CachedBytes};
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::git::exec::{GitExe, ProcessExec};
use crate::git::mime::ContentClassifier;
use crate::git::repository::{ObjectLoader, Project};
use crate::models::BlobInfo;

/// Only this many leading bytes are inspected for NUL.
pub const BINARY_CHECK_LEN: usize = 8000;

#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn read(&self, hash: &str) -> Result<Vec<u8>>;
}

pub struct LoaderBackend {
    loader: Arc<dyn ObjectLoader>,
}

impl LoaderBackend {
    pub fn new(loader: Arc<dyn ObjectLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl BlobBackend for LoaderBackend {
    async fn read(&self, hash: &str) -> Result<Vec<u8>> {
        self.loader
            .get_object(hash)?
            .ok_or_else(|| CoreError::NotFound(format!("object {}", hash)))
    }
}

pub struct ExecBackend {
    exec: Arc<dyn ProcessExec>,
    repo_path: PathBuf,
}

impl ExecBackend {
    pub fn new(exec: Arc<dyn ProcessExec>, repo_path: PathBuf) -> Self {
        Self { exec, repo_path }
    }
}

#[async_trait]
impl BlobBackend for ExecBackend {
    async fn read(&self, hash: &str) -> Result<Vec<u8>> {
        self.exec.run(&self.repo_path, "cat-file", &["blob", hash]).await
    }
}

pub struct BlobRepository {
    project: String,
    backend: Box<dyn BlobBackend>,
    cache: Arc<dyn CacheStore>,
}

impl BlobRepository {
    pub fn new(project: impl Into<String>, backend: Box<dyn BlobBackend>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            project: project.into(),
            backend,
            cache,
        }
    }

    /// Pick the backend from `config.compat`.
    pub fn for_project(project: Arc<Project>, config: &Config, cache: Arc<dyn CacheStore>) -> Self {
        let name = project.name.clone();
        let backend: Box<dyn BlobBackend> = if config.compat {
            let exec = Arc::new(GitExe::new(&config.git_bin, config.tool_timeout()));
            Box::new(ExecBackend::new(exec, project.path.clone()))
        } else {
            Box::new(LoaderBackend::new(project))
        };
        Self::new(name, backend, cache)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn blob(&self, hash: impl Into<String>) -> Blob {
        Blob::new(self.project.clone(), hash)
    }

    pub async fn read(&self, hash: &str) -> Result<CachedBytes> {
        let key = blob_key(&self.project, hash);
        if let Some(data) = self.cache.get(&key) {
            tracing::debug!(%key, "blob cache hit");
            return Ok(data);
        }

        tracing::debug!(%key, "blob cache miss");
        let data: CachedBytes = self.backend.read(hash).await?.into();
        self.cache.set(&key, data.clone());
        Ok(data)
    }
}

#[derive(Debug, Clone)]
enum Content {
    Unread,
    Read(CachedBytes),
}

#[derive(Debug, Clone)]
pub struct Blob {
    project: String,
    hash: String,
    name: Option<String>,
    content: Content,
    size: Option<u64>,
    mime: Option<String>,
}

impl Blob {
    pub fn new(project: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            hash: hash.into(),
            name: None,
            content: Content::Unread,
            size: None,
            mime: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_read(&self) -> bool {
        matches!(self.content, Content::Read(_))
    }

    /// Size known from tree metadata; preferred over reading the content.
    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    pub async fn data(&mut self, repo: &BlobRepository) -> Result<CachedBytes> {
        if let Content::Read(data) = &self.content {
            return Ok(data.clone());
        }
        let data = repo.read(&self.hash).await?;
        self.content = Content::Read(data.clone());
        Ok(data)
    }

    /// Content split on LF. A trailing LF produces a trailing empty line.
    pub async fn lines(&mut self, repo: &BlobRepository) -> Result<Vec<String>> {
        let data = self.data(repo).await?;
        Ok(data
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect())
    }

    pub async fn size(&mut self, repo: &BlobRepository) -> Result<u64> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        Ok(self.data(repo).await?.len() as u64)
    }

    pub async fn is_binary(&mut self, repo: &BlobRepository) -> Result<bool> {
        Ok(is_binary(&self.data(repo).await?))
    }

    /// MIME type, computed once per blob. Empty when nothing matched.
    pub async fn mime(&mut self, repo: &BlobRepository, classifier: &ContentClassifier, short: bool) -> Result<String> {
        if self.mime.is_none() {
            let data = self.data(repo).await?;
            self.mime = Some(classifier.classify(self.name.as_deref(), &data).await);
        }

        let mime = self.mime.clone().unwrap_or_default();
        Ok(if short { ContentClassifier::short_form(&mime).to_string() } else { mime })
    }

    pub async fn info(&mut self, repo: &BlobRepository, classifier: &ContentClassifier) -> Result<BlobInfo> {
        Ok(BlobInfo {
            project: self.project.clone(),
            hash: self.hash.clone(),
            name: self.name.clone(),
            size: self.size(repo).await?,
            is_binary: self.is_binary(repo).await?,
            mime: self.mime(repo, classifier, false).await?,
        })
    }
}

pub fn is_binary(data: &[u8]) -> bool {
    let window = &data[..data.len().min(BINARY_CHECK_LEN)];
    window.contains(&0)
}
