//! State middleware: ordered transforms over the cross-run state.
//!
//! Each middleware sees the previous one's output. A middleware that fails
//! is logged and skipped; the chain carries on with the state it had.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::logic::RuleError;
use super::markov::MarkovError;
use crate::production::PostRecord;

/// Category name to currently active value.
pub type StateDict = BTreeMap<String, String>;

/// Lifecycle event that triggers a state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    /// First run, no persisted state.
    Init,
    Approved,
    Rejected,
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Markov(#[from] MarkovError),

    #[error("Middleware '{middleware}' failed: {reason}")]
    Failed { middleware: String, reason: String },
}

/// A single state transform.
pub trait StateMiddleware: Send + Sync {
    fn name(&self) -> &str;

    fn apply(
        &mut self,
        status: StateStatus,
        post: Option<&PostRecord>,
        state: &StateDict,
    ) -> Result<StateDict, MiddlewareError>;
}

/// Ordered list of middlewares applied left to right.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Box<dyn StateMiddleware>>,
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.middlewares.iter().map(|m| m.name()))
            .finish()
    }
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Box<dyn StateMiddleware>>) -> Self {
        Self { middlewares }
    }

    pub fn push(&mut self, middleware: Box<dyn StateMiddleware>) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Run every middleware in order, skipping any that fail.
    pub fn apply(
        &mut self,
        status: StateStatus,
        post: Option<&PostRecord>,
        state: StateDict,
    ) -> StateDict {
        let mut state = state;
        for middleware in &mut self.middlewares {
            match middleware.apply(status, post, &state) {
                Ok(next) => {
                    debug!(middleware = middleware.name(), %status, "Middleware applied");
                    state = next;
                }
                Err(e) => {
                    warn!(
                        middleware = middleware.name(),
                        %status,
                        error = %e,
                        "Middleware failed, state left unchanged"
                    );
                }
            }
        }
        state
    }
}

/// Passes only the listed statuses through to the wrapped middleware.
pub struct StatusFilter {
    name: String,
    statuses: Vec<StateStatus>,
    inner: Box<dyn StateMiddleware>,
}

impl StatusFilter {
    pub fn new(statuses: Vec<StateStatus>, inner: Box<dyn StateMiddleware>) -> Self {
        let name = format!("{}[{}]", inner.name(), join_statuses(&statuses));
        Self {
            name,
            statuses,
            inner,
        }
    }
}

fn join_statuses(statuses: &[StateStatus]) -> String {
    statuses
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl StateMiddleware for StatusFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(
        &mut self,
        status: StateStatus,
        post: Option<&PostRecord>,
        state: &StateDict,
    ) -> Result<StateDict, MiddlewareError> {
        if self.statuses.contains(&status) {
            self.inner.apply(status, post, state)
        } else {
            Ok(state.clone())
        }
    }
}
