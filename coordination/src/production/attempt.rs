//! Attempt and post outcomes.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::collaborators::{AcquisitionError, Published};
use super::record::PostRecord;
use super::status::IllegalTransition;
use super::workspace::WorkspaceError;
use crate::consensus::ConsensusError;
use crate::panel::AgentResponseError;

/// Everything that can end an attempt early.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Nothing to rate; counted as a rejection.
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error(transparent)]
    Agent(#[from] AgentResponseError),

    #[error("No usable answers while generating {stage}")]
    NoAnswers { stage: &'static str },
}

impl AttemptError {
    /// Errors that another attempt cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Consensus(_) | Self::Transition(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Acquisition(_) => "acquisition",
            Self::Workspace(_) => "workspace",
            Self::Consensus(_) => "consensus",
            Self::Transition(_) => "transition",
            Self::Agent(_) => "agent",
            Self::NoAnswers { .. } => "no_answers",
        }
    }
}

/// An approved, published post.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovedPost {
    pub post: PostRecord,
    pub hash: String,
    /// Final folder under `approved/`.
    pub path: PathBuf,
    pub rating: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<Published>,
}

/// Result of one attempt, inspected by the bounded retry loop.
#[derive(Debug, Clone)]
pub enum AttemptResult {
    Success(ApprovedPost),
    /// Rejected or failed; another attempt may succeed.
    Retryable { reason: String },
    /// Retrying cannot help.
    Fatal { reason: String },
}

impl AttemptResult {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Success(approved) => json!({
                "status": "approved",
                "post": approved.post,
                "rating": approved.rating,
            }),
            Self::Retryable { reason } | Self::Fatal { reason } => json!({
                "status": "failed",
                "reason": reason,
            }),
        }
    }
}

/// Final result for one theme.
#[derive(Debug, Clone)]
pub enum PostOutcome {
    Approved { post: ApprovedPost, attempts: u32 },
    /// Distinct from a rejection: no attempt was approved.
    Failed { attempts: u32, reason: String },
}

impl PostOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Approved { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Approved { post, attempts } => json!({
                "status": "approved",
                "post": post.post,
                "path": post.path,
                "rating": post.rating,
                "attempts": attempts,
            }),
            Self::Failed { attempts, reason } => json!({
                "status": "failed",
                "reason": reason,
                "attempts": attempts,
            }),
        }
    }
}
