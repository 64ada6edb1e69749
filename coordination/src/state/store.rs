//! JSON-file state store for the cross-run state.
//!
//! The state is a single flat JSON object. Saves replace the file wholesale
//! through a temp file in the same directory, so readers never see a
//! partial write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::middleware::{MiddlewareChain, StateDict, StateStatus};
use crate::production::PostRecord;

/// Error type for state persistence.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} is not a flat string map: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Persistent cross-run state plus the middleware chain that evolves it.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    chain: MiddlewareChain,
    state: StateDict,
}

impl StateStore {
    /// Load the state at `path`, or initialise and persist it if missing.
    pub fn open(path: impl Into<PathBuf>, chain: MiddlewareChain) -> PersistenceResult<Self> {
        let mut store = Self {
            path: path.into(),
            chain,
            state: StateDict::new(),
        };
        store.state = store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &StateDict {
        &self.state
    }

    fn load(&mut self) -> PersistenceResult<StateDict> {
        if !self.path.exists() {
            return self.init();
        }

        let raw = fs::read_to_string(&self.path).map_err(|source| PersistenceError::Read {
            path: self.path.clone(),
            source,
        })?;
        let state: StateDict =
            serde_json::from_str(&raw).map_err(|source| PersistenceError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        info!(path = %self.path.display(), state = ?state, "Loaded state");
        Ok(state)
    }

    /// Run the chain with `init` over an empty state and persist the result.
    pub fn init(&mut self) -> PersistenceResult<StateDict> {
        debug!(middlewares = ?self.chain.names(), "Generating new state");
        let state = self.chain.apply(StateStatus::Init, None, StateDict::new());
        info!(state = ?state, "Initial state");
        save_state(&self.path, &state)?;
        self.state = state.clone();
        Ok(state)
    }

    /// Evolve the state after a post reaches `status`, then persist it.
    pub fn update(
        &mut self,
        status: StateStatus,
        post: Option<&PostRecord>,
    ) -> PersistenceResult<&StateDict> {
        let next = self.chain.apply(status, post, self.state.clone());
        debug!(%status, from = ?self.state, to = ?next, "State updated");
        save_state(&self.path, &next)?;
        self.state = next;
        Ok(&self.state)
    }
}

/// Atomically replace the state file at `path`.
pub fn save_state(path: &Path, state: &StateDict) -> PersistenceResult<()> {
    let write_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_err)?;

    let body = serde_json::to_vec_pretty(state).map_err(|e| write_err(e.into()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&body).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    debug!(path = %path.display(), "Saved state");
    Ok(())
}
