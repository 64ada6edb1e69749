//! Ranking: repair and score free-text orderings produced by agents.

pub mod parser;
pub mod score;

pub use parser::{parse_ranking, repair_ranking_text, RankingError, RankingResult};
pub use score::{rank_list, DEFAULT_MAX_RANK};
