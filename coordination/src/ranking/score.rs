//! Positional scoring for ordinal rankings.

/// Default maximum rank value for positional scoring.
pub const DEFAULT_MAX_RANK: u32 = 3;

/// Convert an ordered ranking into per-item scores.
///
/// Position `i` (0-based) scores `max(max_rank - i, 1)`, so everything past
/// the first `max_rank` positions ties at 1. Duplicate identifiers keep the
/// score of their first (best) position. Output preserves first-seen order.
pub fn rank_list(ranking: &[String], max_rank: u32) -> Vec<(String, u32)> {
    let mut scores: Vec<(String, u32)> = Vec::with_capacity(ranking.len());

    for (position, item) in ranking.iter().enumerate() {
        if scores.iter().any(|(existing, _)| existing == item) {
            continue;
        }

        let position = u32::try_from(position).unwrap_or(u32::MAX);
        let score = max_rank.saturating_sub(position).max(1);
        scores.push((item.clone(), score));
    }

    scores
}
