use git2::{ErrorCode, Oid, Repository};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use crate::config::Config;
use crate::error::{CoreError, Result};

/// A repository addressed by its identifier under the project root.
pub struct Project {
    pub name: String,
    /// The git directory (`.git` for work trees, the repository itself when bare)
    pub path: PathBuf,
    repo: Mutex<Repository>,
}

impl Project {
    pub fn open(config: &Config, name: &str) -> Result<Self> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(CoreError::NotFound(format!("project {}", name)));
        }

        let full = config.project_root.join(relative);
        let repo = Repository::open(&full).map_err(|_| CoreError::NotFound(format!("project {}", name)))?;

        Ok(Self {
            name: name.to_string(),
            path: repo.path().to_path_buf(),
            repo: Mutex::new(repo),
        })
    }

    /// Name used for snapshot file names and the top-level archive directory.
    pub fn display_name(&self) -> String {
        display_name(&self.name)
    }

    pub fn with_repo<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Repository) -> Result<T>,
    {
        let repo = self
            .repo
            .lock()
            .map_err(|_| CoreError::RetrievalFailure("Lock poisoned".to_string()))?;
        f(&repo)
    }
}

pub fn display_name(project: &str) -> String {
    let name = project.trim_end_matches('/');
    let name = name.strip_suffix(".git").unwrap_or(name);
    name.trim_end_matches('/').replace(['/', '\\'], "-")
}

/// Native object access. A miss is `Ok(None)`, not an error.
pub trait ObjectLoader: Send + Sync {
    fn get_object(&self, hash: &str) -> Result<Option<Vec<u8>>>;
}

impl ObjectLoader for Project {
    fn get_object(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let Ok(oid) = Oid::from_str(hash) else {
            return Ok(None);
        };

        self.with_repo(|repo| match repo.find_blob(oid) {
            Ok(blob) => Ok(Some(blob.content().to_vec())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(CoreError::RetrievalFailure(e.to_string())),
        })
    }
}
