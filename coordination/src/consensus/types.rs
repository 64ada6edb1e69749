//! Consensus data types: candidates, votes, and round results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::panel::PromptContext;

/// An image on disk offered for ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCandidate {
    pub filename: String,
    pub caption: String,
    pub width: u32,
    pub height: u32,
}

/// Something a panel can vote on. Identity is [`Candidate::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Candidate {
    /// Short free-text idea.
    Concept { text: String },
    /// Image file with caption and dimensions.
    Image(ImageCandidate),
}

impl Candidate {
    pub fn concept(text: impl Into<String>) -> Self {
        Self::Concept { text: text.into() }
    }

    /// Unique key within one ranking round.
    pub fn key(&self) -> &str {
        match self {
            Self::Concept { text } => text,
            Self::Image(image) => &image.filename,
        }
    }

    /// Per-candidate prompt context (`{concept}` or `{caption}`/`{filename}`).
    pub fn context(&self) -> PromptContext {
        match self {
            Self::Concept { text } => PromptContext::new().with("concept", text.as_str()),
            Self::Image(image) => PromptContext::new()
                .with("caption", image.caption.as_str())
                .with("filename", image.filename.as_str()),
        }
    }
}

/// Aggregation policy used for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Count of yes-votes per candidate.
    Binary,
    /// Average of bounded integer scores, thresholded.
    Scale,
    /// Sum of positional scores from per-agent rankings.
    Ordinal,
    /// Most-voted option from a fixed enum.
    Plurality,
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Scale => write!(f, "scale"),
            Self::Ordinal => write!(f, "ordinal"),
            Self::Plurality => write!(f, "plurality"),
        }
    }
}

/// The raw content of one evaluator's vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
    Bool(bool),
    Score(i64),
    Ranking(Vec<String>),
    Choice(String),
}

/// One evaluator's vote in a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub evaluator: String,
    /// Candidate voted on; `None` for whole-round votes (rankings, choices).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
    pub value: VoteValue,
}

/// A candidate key with its aggregate score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub key: String,
    pub score: f64,
}

/// Outcome of one consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub policy: SelectionPolicy,
    /// Aggregate score for every candidate that received one.
    pub scores: BTreeMap<String, f64>,
    /// Winning subset, best first, at most the requested count.
    pub selected: Vec<ScoredCandidate>,
    /// Every vote that was counted.
    pub votes: Vec<Vote>,
    /// Number of distinct agents that contributed at least one vote.
    pub responding_agents: usize,
}

impl ConsensusResult {
    /// Empty result for `policy`.
    pub fn empty(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            scores: BTreeMap::new(),
            selected: Vec::new(),
            votes: Vec::new(),
            responding_agents: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Best selected candidate.
    pub fn winner(&self) -> Option<&ScoredCandidate> {
        self.selected.first()
    }

    /// Keys of the selected candidates, best first.
    pub fn selected_keys(&self) -> Vec<String> {
        self.selected.iter().map(|c| c.key.clone()).collect()
    }

    pub fn score_of(&self, key: &str) -> Option<f64> {
        self.scores.get(key).copied()
    }
}

/// Ordered score accumulator.
///
/// Keeps first-seen order so ties in [`Tally::top`] resolve to whichever
/// candidate was scored first.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    entries: Vec<(String, f64)>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to `key`, inserting it at the end if new.
    pub fn add(&mut self, key: &str, amount: f64) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, score)) => *score += amount,
            None => self.entries.push((key.to_string(), amount)),
        }
    }

    /// Set `key` to `value`, inserting it at the end if new.
    pub fn set(&mut self, key: &str, value: f64) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, score)) => *score = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, score)| *score)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `n` entries passing `keep`, highest score first.
    pub fn top_where<F>(&self, n: usize, keep: F) -> Vec<ScoredCandidate>
    where
        F: Fn(f64) -> bool,
    {
        let mut ranked: Vec<&(String, f64)> =
            self.entries.iter().filter(|(_, s)| keep(*s)).collect();
        // Stable sort keeps first-seen order among equal scores.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
            .into_iter()
            .take(n)
            .map(|(key, score)| ScoredCandidate {
                key: key.clone(),
                score: *score,
            })
            .collect()
    }

    /// Up to `n` entries, highest score first.
    pub fn top(&self, n: usize) -> Vec<ScoredCandidate> {
        self.top_where(n, |_| true)
    }

    pub fn to_scores(&self) -> BTreeMap<String, f64> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_ties_keep_first_seen_order() {
        let mut tally = Tally::new();
        tally.add("b", 1.0);
        tally.add("a", 2.0);
        tally.add("c", 1.0);
        tally.add("b", 1.0);

        let top = tally.top(3);
        let keys: Vec<&str> = top.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(top[0].score, 2.0);
    }

    #[test]
    fn test_tally_top_where_filters() {
        let mut tally = Tally::new();
        tally.set("a", 3.5);
        tally.set("b", 2.0);
        tally.set("c", 4.0);
        let top = tally.top_where(5, |s| s >= 3.0);
        let keys: Vec<&str> = top.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "a"]);
    }

    #[test]
    fn test_candidate_keys_and_context() {
        let concept = Candidate::concept("foggy lighthouse");
        assert_eq!(concept.key(), "foggy lighthouse");
        assert_eq!(
            concept.context().get_str("concept"),
            Some("foggy lighthouse")
        );

        let image = Candidate::Image(ImageCandidate {
            filename: "output-0-0.png".into(),
            caption: "a lighthouse".into(),
            width: 1024,
            height: 768,
        });
        assert_eq!(image.key(), "output-0-0.png");
        assert_eq!(image.context().get_str("caption"), Some("a lighthouse"));
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(SelectionPolicy::Binary.to_string(), "binary");
        assert_eq!(SelectionPolicy::Ordinal.to_string(), "ordinal");
        let json = serde_json::to_string(&SelectionPolicy::Plurality).unwrap();
        assert_eq!(json, "\"plurality\"");
    }
}
