//! Post production: the bounded-retry attempt loop and its collaborators.
//!
//! A [`ProductionPipeline`] takes a [`PostInput`] and a [`Crew`] of agents
//! and runs attempts until one is approved or `max_post_retry` is used up.
//! Each attempt moves through a [`PipelineRun`] state machine and leaves its
//! artifacts in a [`PostWorkspace`]:
//!
//! ```text
//! working/ ──promote──▶ approval/<slug>/ ──finalize──▶ approved/<slug>/
//!                                                   └─▶ rejected/<slug>/
//! ```
//!
//! Image generation, image fetching and publishing sit behind the
//! [`ImageGenerator`], [`ImageFetcher`] and [`Publisher`] traits.

pub mod attempt;
pub mod collaborators;
pub mod config;
pub mod crew;
pub mod pipeline;
pub mod record;
pub mod status;
pub mod summary;
pub mod workspace;

pub use attempt::{ApprovedPost, AttemptError, AttemptResult, PostOutcome};
pub use collaborators::{
    AcquisitionError, GeneratedImage, ImageFetcher, ImageGenerator, ImageSize, PublishError,
    PublishRequest, Published, Publisher,
};
pub use config::{CritiqueMode, ImageRanking, ProductionConfig, PromptSet};
pub use crew::Crew;
pub use pipeline::{Critique, PostInput, ProductionPipeline};
pub use record::{
    cleanup_sentence, format_bullet_list, post_slug, sanitize_name, PostRecord, MAX_SLUG_LEN,
};
pub use status::{IllegalTransition, PipelineRun, PipelineStatus, TransitionRecord};
pub use summary::BatchSummary;
pub use workspace::{write_json, PostWorkspace, Verdict, WorkspaceError, WorkspaceResult};
