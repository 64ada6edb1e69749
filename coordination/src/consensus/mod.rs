//! Panel consensus: binary, scale, ordinal and plurality rounds.

pub mod engine;
pub mod types;

pub use engine::{
    ConsensusEngine, ConsensusError, ConsensusOutcome, ScaleVote, DEFAULT_CAREFUL_WARNING,
    DEFAULT_RANK_RETRY,
};
pub use types::{
    Candidate, ConsensusResult, ImageCandidate, ScoredCandidate, SelectionPolicy, Tally, Vote,
    VoteValue,
};
