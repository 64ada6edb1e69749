//! Consensus engine: folds independent panel answers into one decision.
//!
//! Individual agent failures never abort a round; only structural misuse
//! (an empty panel) is reported as an error.

use std::collections::HashSet;

use futures::future::join_all;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::types::{Candidate, ConsensusResult, SelectionPolicy, Tally, Vote, VoteValue};
use crate::panel::{parse_bool, parse_choice, parse_score, Panel, PromptContext, SharedAgent};
use crate::ranking::{parse_ranking, rank_list, DEFAULT_MAX_RANK};

/// Default number of attempts an agent gets to produce a parseable ranking.
pub const DEFAULT_RANK_RETRY: u32 = 3;

/// Guidance injected as `{careful_warning}` when an agent retries a ranking.
pub const DEFAULT_CAREFUL_WARNING: &str = "Be careful: your last answer could not be parsed. \
Reply with only a JSON list of filenames, best first, and nothing else.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Panel '{panel}' has no members")]
    EmptyPanel { panel: String },
}

pub type ConsensusOutcome = Result<ConsensusResult, ConsensusError>;

/// Bounds for a scale vote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleVote {
    /// Highest score an agent may give; passed to prompts as `{max_score}`.
    pub max_score: i64,
    /// Minimum average for a candidate to be selected.
    pub threshold: f64,
}

impl ScaleVote {
    pub fn new(max_score: i64, threshold: f64) -> Self {
        Self {
            max_score,
            threshold,
        }
    }
}

/// Runs consensus rounds over a panel.
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    rank_retry: u32,
    max_rank: u32,
    careful_warning: String,
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self {
            rank_retry: DEFAULT_RANK_RETRY,
            max_rank: DEFAULT_MAX_RANK,
            careful_warning: DEFAULT_CAREFUL_WARNING.to_string(),
        }
    }
}

impl ConsensusEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rank_retry(mut self, rank_retry: u32) -> Self {
        self.rank_retry = rank_retry.max(1);
        self
    }

    pub fn with_max_rank(mut self, max_rank: u32) -> Self {
        self.max_rank = max_rank;
        self
    }

    pub fn with_careful_warning(mut self, warning: impl Into<String>) -> Self {
        self.careful_warning = warning.into();
        self
    }

    pub fn rank_retry(&self) -> u32 {
        self.rank_retry
    }

    /// Count of yes-votes per candidate; top `count` candidates with at least
    /// one yes-vote are selected.
    pub async fn binary_vote(
        &self,
        panel: &Panel,
        prompt: &str,
        context: &PromptContext,
        candidates: &[Candidate],
        count: usize,
    ) -> ConsensusOutcome {
        let policy = SelectionPolicy::Binary;
        if count == 0 {
            return Ok(ConsensusResult::empty(policy));
        }
        check_panel(panel)?;

        let mut tally = Tally::new();
        let mut votes = Vec::new();

        for candidate in unique_candidates(candidates) {
            let ctx = context.merged(&candidate.context());
            let responses = panel.sample(prompt, &ctx, parse_bool).await;
            if responses.responded() == 0 {
                continue;
            }

            let yes = responses.values().filter(|v| **v).count();
            debug!(candidate = %candidate.key(), yes, "Binary votes counted");
            tally.add(candidate.key(), yes as f64);

            for (agent, value) in responses.answers {
                votes.push(Vote {
                    evaluator: agent,
                    candidate: Some(candidate.key().to_string()),
                    value: VoteValue::Bool(value),
                });
            }
        }

        Ok(finish(policy, panel, tally, votes, |s| s > 0.0, count))
    }

    /// Average score per candidate; candidates whose average meets the
    /// threshold are selected, best first.
    pub async fn scale_vote(
        &self,
        panel: &Panel,
        prompt: &str,
        context: &PromptContext,
        candidates: &[Candidate],
        count: usize,
        scale: ScaleVote,
    ) -> ConsensusOutcome {
        let policy = SelectionPolicy::Scale;
        if count == 0 {
            return Ok(ConsensusResult::empty(policy));
        }
        check_panel(panel)?;

        let mut tally = Tally::new();
        let mut votes = Vec::new();

        for candidate in unique_candidates(candidates) {
            let ctx = context
                .merged(&candidate.context())
                .with("max_score", scale.max_score);
            let max_score = scale.max_score;
            let responses = panel
                .sample(prompt, &ctx, |text| parse_score(text, max_score))
                .await;
            if responses.responded() == 0 {
                warn!(candidate = %candidate.key(), "No valid scores for candidate");
                continue;
            }

            let total: i64 = responses.values().sum();
            let average = total as f64 / responses.responded() as f64;
            if average >= scale.threshold {
                info!(
                    candidate = %candidate.key(),
                    average,
                    threshold = scale.threshold,
                    "Candidate met threshold"
                );
            } else {
                warn!(
                    candidate = %candidate.key(),
                    average,
                    threshold = scale.threshold,
                    "Candidate did not meet threshold"
                );
            }
            tally.set(candidate.key(), average);

            for (agent, value) in responses.answers {
                votes.push(Vote {
                    evaluator: agent,
                    candidate: Some(candidate.key().to_string()),
                    value: VoteValue::Score(value),
                });
            }
        }

        let threshold = scale.threshold;
        Ok(finish(policy, panel, tally, votes, |s| s >= threshold, count))
    }

    /// Each agent ranks every candidate at once; positional scores are summed
    /// across agents.
    ///
    /// The candidate list is rendered into the prompt context as
    /// `{image_data}`. An agent whose answer cannot be parsed is retried with
    /// `{careful_warning}` set; after the retry bound it contributes nothing.
    pub async fn ordinal_rank(
        &self,
        panel: &Panel,
        prompt: &str,
        context: &PromptContext,
        candidates: &[Candidate],
        count: usize,
    ) -> ConsensusOutcome {
        let policy = SelectionPolicy::Ordinal;
        if count == 0 {
            return Ok(ConsensusResult::empty(policy));
        }
        check_panel(panel)?;

        let candidates = unique_candidates(candidates);
        let known: HashSet<&str> = candidates.iter().map(|c| c.key()).collect();
        let image_data: Vec<serde_json::Value> =
            candidates.iter().map(|c| candidate_json(c)).collect();
        let ctx = context.clone().with("image_data", image_data);

        let rankings = join_all(
            panel
                .members()
                .iter()
                .map(|agent| self.rank_with_retry(panel, agent, prompt, &ctx)),
        )
        .await;

        let mut tally = Tally::new();
        let mut votes = Vec::new();

        for (agent, ranking) in rankings {
            let Some(ranking) = ranking else {
                continue;
            };

            let (valid, unknown): (Vec<String>, Vec<String>) = ranking
                .into_iter()
                .partition(|key| known.contains(key.as_str()));
            if !unknown.is_empty() {
                warn!(agent = %agent, unknown = ?unknown, "Ranking names unknown candidates");
            }

            for (key, score) in rank_list(&valid, self.max_rank) {
                tally.add(&key, score as f64);
            }
            votes.push(Vote {
                evaluator: agent,
                candidate: None,
                value: VoteValue::Ranking(valid),
            });
        }

        Ok(finish(policy, panel, tally, votes, |_| true, count))
    }

    /// Most-voted option; ties go to the option voted for first.
    pub async fn plurality(
        &self,
        panel: &Panel,
        prompt: &str,
        context: &PromptContext,
        options: &[&str],
    ) -> ConsensusOutcome {
        let policy = SelectionPolicy::Plurality;
        if options.is_empty() {
            return Ok(ConsensusResult::empty(policy));
        }
        check_panel(panel)?;

        let responses = panel
            .sample(prompt, context, |text| parse_choice(text, options))
            .await;

        let mut tally = Tally::new();
        let mut votes = Vec::new();
        for (agent, choice) in responses.answers {
            tally.add(&choice, 1.0);
            votes.push(Vote {
                evaluator: agent,
                candidate: None,
                value: VoteValue::Choice(choice),
            });
        }

        Ok(finish(policy, panel, tally, votes, |_| true, 1))
    }

    async fn rank_with_retry(
        &self,
        panel: &Panel,
        agent: &SharedAgent,
        prompt: &str,
        context: &PromptContext,
    ) -> (String, Option<Vec<String>>) {
        let name = agent.name().to_string();

        for attempt in 0..self.rank_retry {
            let warning = if attempt == 0 {
                ""
            } else {
                self.careful_warning.as_str()
            };
            let ctx = context.clone().with("careful_warning", warning);

            let text = match panel.ask(agent, prompt, &ctx).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(agent = %name, attempt, error = %e, "Ranking request failed");
                    continue;
                }
            };

            match parse_ranking(&text) {
                Ok(ranking) => {
                    debug!(agent = %name, attempt, ranking = ?ranking, "Ranking parsed");
                    return (name, Some(ranking));
                }
                Err(e) => {
                    warn!(agent = %name, attempt, error = %e, "Failed to parse ranking, retrying");
                }
            }
        }

        error!(
            agent = %name,
            attempts = self.rank_retry,
            "Agent produced no valid ranking; excluded from round"
        );
        (name, None)
    }
}

fn check_panel(panel: &Panel) -> Result<(), ConsensusError> {
    if panel.is_empty() {
        return Err(ConsensusError::EmptyPanel {
            panel: panel.name().to_string(),
        });
    }
    Ok(())
}

fn unique_candidates(candidates: &[Candidate]) -> Vec<&Candidate> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| {
            let fresh = seen.insert(c.key());
            if !fresh {
                warn!(candidate = %c.key(), "Duplicate candidate key skipped");
            }
            fresh
        })
        .collect()
}

fn candidate_json(candidate: &Candidate) -> serde_json::Value {
    match candidate {
        Candidate::Concept { text } => json!({ "concept": text }),
        Candidate::Image(image) => json!({
            "filename": image.filename,
            "caption": image.caption,
            "width": image.width,
            "height": image.height,
        }),
    }
}

fn finish<F>(
    policy: SelectionPolicy,
    panel: &Panel,
    tally: Tally,
    votes: Vec<Vote>,
    keep: F,
    count: usize,
) -> ConsensusResult
where
    F: Fn(f64) -> bool,
{
    let responding_agents = votes
        .iter()
        .map(|v| v.evaluator.as_str())
        .collect::<HashSet<_>>()
        .len();

    if responding_agents == 0 {
        error!(panel = %panel.name(), policy = %policy, "No agents responded");
        return ConsensusResult::empty(policy);
    }

    let selected = tally.top_where(count, keep);
    info!(
        panel = %panel.name(),
        policy = %policy,
        responding_agents,
        selected = ?selected.iter().map(|c| c.key.as_str()).collect::<Vec<_>>(),
        "Consensus round complete"
    );

    ConsensusResult {
        policy,
        scores: tally.to_scores(),
        selected,
        votes,
        responding_agents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::types::ImageCandidate;
    use crate::fakes::ScriptedAgent;
    use std::sync::Arc;

    fn panel_of(agents: Vec<Arc<ScriptedAgent>>) -> Panel {
        Panel::new(
            "test",
            agents.into_iter().map(|a| a as SharedAgent).collect(),
        )
    }

    fn image(name: &str) -> Candidate {
        Candidate::Image(ImageCandidate {
            filename: name.to_string(),
            caption: format!("caption for {name}"),
            width: 512,
            height: 512,
        })
    }

    #[tokio::test]
    async fn test_scale_vote_average_meets_threshold() {
        let panel = panel_of(vec![
            Arc::new(ScriptedAgent::always("a", "2")),
            Arc::new(ScriptedAgent::always("b", "4")),
            Arc::new(ScriptedAgent::always("c", "5")),
        ]);
        let result = ConsensusEngine::new()
            .scale_vote(
                &panel,
                "rate {concept}",
                &PromptContext::new(),
                &[Candidate::concept("tide pools")],
                1,
                ScaleVote::new(5, 3.0),
            )
            .await
            .unwrap();

        let winner = result.winner().unwrap();
        assert_eq!(winner.key, "tide pools");
        assert!((winner.score - 11.0 / 3.0).abs() < 1e-9);
        assert_eq!(format!("{:.2}", winner.score), "3.67");
    }

    #[tokio::test]
    async fn test_scale_vote_below_threshold_excluded() {
        let panel = panel_of(vec![
            Arc::new(ScriptedAgent::always("a", "1")),
            Arc::new(ScriptedAgent::always("b", "2")),
        ]);
        let result = ConsensusEngine::new()
            .scale_vote(
                &panel,
                "rate",
                &PromptContext::new(),
                &[Candidate::concept("tax forms")],
                1,
                ScaleVote::new(5, 3.0),
            )
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(result.score_of("tax forms"), Some(1.5));
    }

    #[tokio::test]
    async fn test_scale_vote_unparseable_not_counted_as_zero() {
        let panel = panel_of(vec![
            Arc::new(ScriptedAgent::always("a", "4")),
            Arc::new(ScriptedAgent::always("b", "I cannot rate this")),
        ]);
        let result = ConsensusEngine::new()
            .scale_vote(
                &panel,
                "rate",
                &PromptContext::new(),
                &[Candidate::concept("owls")],
                1,
                ScaleVote::new(5, 3.0),
            )
            .await
            .unwrap();

        assert_eq!(result.score_of("owls"), Some(4.0));
        assert_eq!(result.responding_agents, 1);
    }

    #[tokio::test]
    async fn test_binary_vote_top_n_ties_first_seen() {
        let panel = panel_of(vec![
            Arc::new(ScriptedAgent::new(
                "a",
                [Some("yes"), Some("yes"), Some("no")],
            )),
            Arc::new(ScriptedAgent::new("b", [Some("no"), Some("yes"), Some("no")])),
        ]);
        let candidates = [
            Candidate::concept("first"),
            Candidate::concept("second"),
            Candidate::concept("third"),
        ];
        let result = ConsensusEngine::new()
            .binary_vote(&panel, "like?", &PromptContext::new(), &candidates, 5)
            .await
            .unwrap();

        assert_eq!(result.selected_keys(), vec!["second", "first"]);
        assert_eq!(result.score_of("third"), Some(0.0));
    }

    #[tokio::test]
    async fn test_zero_count_is_empty_even_for_empty_panel() {
        let panel = Panel::new("empty", Vec::new());
        let result = ConsensusEngine::new()
            .binary_vote(
                &panel,
                "like?",
                &PromptContext::new(),
                &[Candidate::concept("x")],
                0,
            )
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_empty_panel_is_error() {
        let panel = Panel::new("empty", Vec::new());
        let err = ConsensusEngine::new()
            .binary_vote(
                &panel,
                "like?",
                &PromptContext::new(),
                &[Candidate::concept("x")],
                1,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConsensusError::EmptyPanel {
                panel: "empty".into()
            }
        );
    }

    #[tokio::test]
    async fn test_zero_responders_is_empty() {
        let panel = panel_of(vec![
            Arc::new(ScriptedAgent::failing("a")),
            Arc::new(ScriptedAgent::failing("b")),
        ]);
        let result = ConsensusEngine::new()
            .scale_vote(
                &panel,
                "rate",
                &PromptContext::new(),
                &[Candidate::concept("x")],
                1,
                ScaleVote::new(5, 3.0),
            )
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.responding_agents, 0);
    }

    #[tokio::test]
    async fn test_ordinal_rank_sums_positional_scores() {
        let panel = panel_of(vec![
            Arc::new(ScriptedAgent::always("a", r#"["x.png", "y.png", "z.png"]"#)),
            Arc::new(ScriptedAgent::always("b", r#"["y.png", "x.png", "z.png"]"#)),
            Arc::new(ScriptedAgent::always("c", r#"["y.png", "z.png", "x.png"]"#)),
        ]);
        let candidates = [image("x.png"), image("y.png"), image("z.png")];
        let result = ConsensusEngine::new()
            .ordinal_rank(&panel, "rank", &PromptContext::new(), &candidates, 2)
            .await
            .unwrap();

        assert_eq!(result.score_of("y.png"), Some(8.0));
        assert_eq!(result.score_of("x.png"), Some(6.0));
        assert_eq!(result.score_of("z.png"), Some(4.0));
        assert_eq!(result.selected_keys(), vec!["y.png", "x.png"]);
    }

    #[tokio::test]
    async fn test_ordinal_rank_retries_with_warning() {
        let agent = Arc::new(ScriptedAgent::new(
            "a",
            [Some("I like the first one best"), Some(r#"["x.png"]"#)],
        ));
        let panel = panel_of(vec![agent.clone()]);
        let result = ConsensusEngine::new()
            .with_careful_warning("CAREFUL")
            .ordinal_rank(
                &panel,
                "{careful_warning} rank {image_data}",
                &PromptContext::new(),
                &[image("x.png")],
                1,
            )
            .await
            .unwrap();

        assert_eq!(result.selected_keys(), vec!["x.png"]);
        let calls = agent.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].context.get_str("careful_warning"), Some(""));
        assert_eq!(calls[1].context.get_str("careful_warning"), Some("CAREFUL"));
        assert!(calls[0].context.get("image_data").is_some());
    }

    /// An agent that never produces a parseable ranking is excluded silently;
    /// the other agents still decide the round.
    #[tokio::test]
    async fn test_ordinal_rank_exhausted_agent_excluded() {
        let broken = Arc::new(ScriptedAgent::always("broken", "not json at all"));
        let panel = panel_of(vec![
            broken.clone(),
            Arc::new(ScriptedAgent::always("good", r#"["z.png", "x.png"]"#)),
        ]);
        let result = ConsensusEngine::new()
            .ordinal_rank(
                &panel,
                "rank",
                &PromptContext::new(),
                &[image("x.png"), image("z.png")],
                1,
            )
            .await
            .unwrap();

        assert_eq!(broken.call_count(), DEFAULT_RANK_RETRY as usize);
        assert_eq!(result.responding_agents, 1);
        assert_eq!(result.selected_keys(), vec!["z.png"]);
    }

    #[tokio::test]
    async fn test_ordinal_rank_drops_unknown_filenames() {
        let panel = panel_of(vec![Arc::new(ScriptedAgent::always(
            "a",
            r#"["ghost.png", "x.png"]"#,
        ))]);
        let result = ConsensusEngine::new()
            .ordinal_rank(&panel, "rank", &PromptContext::new(), &[image("x.png")], 3)
            .await
            .unwrap();
        assert_eq!(result.score_of("ghost.png"), None);
        assert_eq!(result.score_of("x.png"), Some(3.0));
    }

    #[tokio::test]
    async fn test_plurality_choice() {
        let panel = panel_of(vec![
            Arc::new(ScriptedAgent::always("a", "Square would work")),
            Arc::new(ScriptedAgent::always("b", "portrait")),
            Arc::new(ScriptedAgent::always("c", "definitely PORTRAIT, not square")),
            Arc::new(ScriptedAgent::always("d", "wide")),
        ]);
        let result = ConsensusEngine::new()
            .plurality(
                &panel,
                "size?",
                &PromptContext::new(),
                &["landscape", "portrait", "square"],
            )
            .await
            .unwrap();
        assert_eq!(result.winner().unwrap().key, "portrait");
        assert_eq!(result.responding_agents, 3);
    }
}
