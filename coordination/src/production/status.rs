//! Attempt state machine: explicit stages and legal transition guards.
//!
//! Every attempt starts at `Pending` and ends at `Approved`, `Rejected`, or
//! `Failed`. The pipeline calls `advance()` between stages; each call checks
//! the edge against the transition table and appends to the transition log.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage of a single post attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Working directory not yet prepared.
    Pending,
    /// Writing ideas, description, prompt, and acquiring images.
    Generating,
    /// Panel is choosing images.
    Ranking,
    /// Critic panel is rating the compiled post.
    Critiquing,
    /// Terminal: rating met the approval threshold.
    Approved,
    /// Terminal: rating too low, or nothing to rate.
    Rejected,
    /// Terminal: the attempt broke before reaching a decision.
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Failed)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Generating => write!(f, "generating"),
            Self::Ranking => write!(f, "ranking"),
            Self::Critiquing => write!(f, "critiquing"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Legal edges:
/// ```text
/// Pending    → Generating
/// Generating → Ranking | Rejected
/// Ranking    → Critiquing | Rejected
/// Critiquing → Approved | Rejected
/// (any non-terminal) → Failed
/// ```
fn is_legal_transition(from: PipelineStatus, to: PipelineStatus) -> bool {
    use PipelineStatus::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Pending, Generating)
            | (Generating, Ranking)
            // zero images acquired
            | (Generating, Rejected)
            | (Ranking, Critiquing)
            // nothing survived ranking
            | (Ranking, Rejected)
            | (Critiquing, Approved)
            | (Critiquing, Rejected)
    )
}

/// A single recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PipelineStatus,
    pub to: PipelineStatus,
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Milliseconds since the attempt started.
    pub elapsed_ms: u64,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal pipeline transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: PipelineStatus,
    pub to: PipelineStatus,
}

/// One attempt at producing a post.
///
/// The working directory belongs to this run until it reaches a terminal
/// status and the directory is moved away.
#[derive(Debug)]
pub struct PipelineRun {
    retry_count: u32,
    working_directory: PathBuf,
    status: PipelineStatus,
    started_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl PipelineRun {
    pub fn new(retry_count: u32, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            retry_count,
            working_directory: working_directory.into(),
            status: PipelineStatus::Pending,
            started_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn working_directory(&self) -> &PathBuf {
        &self.working_directory
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn advance(
        &mut self,
        to: PipelineStatus,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.status, to) {
            return Err(IllegalTransition {
                from: self.status,
                to,
            });
        }

        tracing::debug!(
            from = %self.status,
            to = %to,
            attempt = self.retry_count,
            "Pipeline transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.status,
            to,
            attempt: self.retry_count,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            at: Utc::now(),
            reason: reason.map(String::from),
        });
        self.status = to;
        Ok(())
    }

    /// Move to `Failed`; legal from any non-terminal status.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(PipelineStatus::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Stage names visited so far, e.g. `pending -> generating -> ranking`.
    pub fn summary(&self) -> String {
        let mut stages = vec![PipelineStatus::Pending.to_string()];
        stages.extend(self.transitions.iter().map(|t| t.to.to_string()));
        format!(
            "attempt {}: {} ({}ms)",
            self.retry_count,
            stages.join(" -> "),
            self.started_at.elapsed().as_millis()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut run = PipelineRun::new(0, "/tmp/working");
        run.advance(PipelineStatus::Generating, None).unwrap();
        run.advance(PipelineStatus::Ranking, None).unwrap();
        run.advance(PipelineStatus::Critiquing, None).unwrap();
        run.advance(PipelineStatus::Approved, Some("rating 0.8")).unwrap();

        assert!(run.is_terminal());
        assert_eq!(run.transitions().len(), 4);
        assert_eq!(run.transitions()[3].reason.as_deref(), Some("rating 0.8"));
        assert!(run.transitions()[0].at <= run.transitions()[3].at);
        assert!(run.summary().contains("critiquing -> approved"));
    }

    #[test]
    fn test_zero_images_rejects_from_generating() {
        let mut run = PipelineRun::new(1, "/tmp/working");
        run.advance(PipelineStatus::Generating, None).unwrap();
        run.advance(PipelineStatus::Rejected, Some("no images"))
            .unwrap();
        assert_eq!(run.status(), PipelineStatus::Rejected);
        assert_eq!(run.transitions()[1].attempt, 1);
    }

    #[test]
    fn test_fail_from_any_non_terminal() {
        for path in [
            vec![],
            vec![PipelineStatus::Generating],
            vec![PipelineStatus::Generating, PipelineStatus::Ranking],
            vec![
                PipelineStatus::Generating,
                PipelineStatus::Ranking,
                PipelineStatus::Critiquing,
            ],
        ] {
            let mut run = PipelineRun::new(0, "/tmp/working");
            for status in path {
                run.advance(status, None).unwrap();
            }
            assert!(run.fail("boom").is_ok());
            assert_eq!(run.status(), PipelineStatus::Failed);
        }
    }

    #[test]
    fn test_terminal_is_final() {
        let mut run = PipelineRun::new(0, "/tmp/working");
        run.advance(PipelineStatus::Generating, None).unwrap();
        run.advance(PipelineStatus::Rejected, None).unwrap();

        let err = run.advance(PipelineStatus::Ranking, None).unwrap_err();
        assert_eq!(err.from, PipelineStatus::Rejected);
        assert!(run.fail("again").is_err());
    }

    #[test]
    fn test_cannot_skip_stages() {
        let mut run = PipelineRun::new(0, "/tmp/working");
        assert!(run.advance(PipelineStatus::Critiquing, None).is_err());
        assert!(run.advance(PipelineStatus::Approved, None).is_err());
    }
}
