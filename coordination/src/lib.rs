//! Feed Coordination Library
//!
//! This library provides the agent-independent core of an automated post feed:
//! - Panel consensus over agent answers (binary, scale, ordinal, plurality)
//! - Robust parsing of free-text ranking answers
//! - Bounded-retry post production with an explicit attempt state machine
//! - Cross-run state evolution through a middleware chain (rules, Markov)
//! - A progress event stream for long-running jobs
//!
//! # Modules
//!
//! - [`panel`]: the `Agent` trait, prompt context, panels and answer parsers
//! - [`ranking`]: ranking text repair and rank-to-score conversion
//! - [`consensus`]: voting rounds over a panel
//! - [`production`]: the post production pipeline and its collaborators
//! - [`state`]: persistent cross-run state and its middleware
//! - [`events`]: progress spans and NDJSON streaming
//! - `fakes`: scripted agents and collaborators for tests, behind the
//!   `test-support` feature
//!
//! # Usage
//!
//! ```ignore
//! let mut pipeline = ProductionPipeline::new(config, prompts, workspace, generator, fetcher, publisher);
//! let outcome = pipeline.produce(&PostInput::new("Harbor at dawn", "photo"), &crew).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod consensus;
pub mod events;
#[cfg(any(test, feature = "test-support"))]
pub mod fakes;
pub mod panel;
pub mod production;
pub mod ranking;
pub mod state;

// Re-export key panel types
pub use panel::{Agent, AgentResponseError, Panel, PanelResponses, PromptContext, SharedAgent};

// Re-export key ranking types
pub use ranking::{parse_ranking, rank_list, RankingError};

// Re-export key consensus types
pub use consensus::{
    Candidate, ConsensusEngine, ConsensusError, ConsensusResult, ImageCandidate, ScaleVote,
    SelectionPolicy,
};

// Re-export key production types
pub use production::{
    BatchSummary, Crew, ImageFetcher, ImageGenerator, PipelineStatus, PostInput, PostOutcome,
    PostRecord, PostWorkspace, ProductionConfig, ProductionPipeline, PromptSet, Publisher,
};

// Re-export key state types
pub use state::{
    LogicMiddleware, MarkovMiddleware, MiddlewareChain, StateDict, StateMiddleware, StateStatus,
    StateStore,
};

// Re-export key event types
pub use events::{spawn_with_progress, write_ndjson, ProgressEvent, ProgressTracer};
