//! Post folders on disk.
//!
//! ```text
//! {root}/working/            current attempt, exclusively owned
//! {root}/approval/{slug}/    compiled, waiting for the critics
//! {root}/approved/{slug}/
//! {root}/rejected/{slug}/
//! ```
//!
//! Moves between stages are single `rename` calls within one root, so a
//! post is never visible half-moved.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Where a staged post ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct PostWorkspace {
    root: PathBuf,
}

impl PostWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn working_dir(&self) -> PathBuf {
        self.root.join("working")
    }

    pub fn approval_dir(&self) -> PathBuf {
        self.root.join("approval")
    }

    pub fn approved_dir(&self) -> PathBuf {
        self.root.join("approved")
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.root.join("rejected")
    }

    /// Fresh, empty working directory.
    ///
    /// A working directory left by a crashed attempt is deleted first.
    pub fn prepare(&self) -> WorkspaceResult<PathBuf> {
        let working = self.working_dir();
        if working.exists() {
            warn!(path = %working.display(), "Removing stale working directory");
            fs::remove_dir_all(&working).map_err(io_err(&working))?;
        }

        for dir in [
            working.clone(),
            self.approval_dir(),
            self.approved_dir(),
            self.rejected_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }
        Ok(working)
    }

    /// Drop the working directory without keeping anything.
    pub fn discard_working(&self) -> WorkspaceResult<()> {
        let working = self.working_dir();
        if working.exists() {
            fs::remove_dir_all(&working).map_err(io_err(&working))?;
        }
        Ok(())
    }

    /// Move the working directory to `approval/{slug}`.
    pub fn promote(&self, slug: &str) -> WorkspaceResult<PathBuf> {
        let target = self.approval_dir().join(slug);
        replace_dir(&self.working_dir(), &target)?;
        Ok(target)
    }

    /// Move a staged post to `approved/` or `rejected/`, keeping its name.
    pub fn finalize(&self, staged: &Path, verdict: Verdict) -> WorkspaceResult<PathBuf> {
        let store = match verdict {
            Verdict::Approved => self.approved_dir(),
            Verdict::Rejected => self.rejected_dir(),
        };
        let name = staged.file_name().unwrap_or(staged.as_os_str());
        let target = store.join(name);
        replace_dir(staged, &target)?;
        Ok(target)
    }
}

/// `rename`, replacing anything already at `to`.
fn replace_dir(from: &Path, to: &Path) -> WorkspaceResult<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    if to.exists() {
        warn!(path = %to.display(), "Replacing existing post folder");
        fs::remove_dir_all(to).map_err(io_err(to))?;
    }
    fs::rename(from, to).map_err(io_err(from))?;
    debug!(from = %from.display(), to = %to.display(), "Moved post folder");
    Ok(())
}

/// Pretty JSON file in `dir`.
pub fn write_json<T: Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> WorkspaceResult<PathBuf> {
    let path = dir.join(name);
    let body = serde_json::to_string_pretty(value).map_err(|source| WorkspaceError::Serialize {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, body).map_err(io_err(&path))?;
    Ok(path)
}
