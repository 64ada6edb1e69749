//! Production pipeline: drives one theme through bounded-retry attempts.
//!
//! Each attempt runs `pending → generating → ranking → critiquing →
//! approved | rejected` in a fresh working directory. A rejection or failure
//! discards the attempt and starts over with the same theme, up to
//! `max_post_retry` attempts. Attempt errors are logged and absorbed here;
//! only state persistence errors leave the pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::attempt::{ApprovedPost, AttemptError, AttemptResult, PostOutcome};
use super::collaborators::{
    AcquisitionError, GeneratedImage, ImageFetcher, ImageGenerator, ImageSize, PublishRequest,
    Publisher,
};
use super::config::{CritiqueMode, ImageRanking, ProductionConfig, PromptSet};
use super::crew::Crew;
use super::record::{cleanup_sentence, format_bullet_list, post_slug, PostRecord};
use super::status::{PipelineRun, PipelineStatus};
use super::summary::BatchSummary;
use super::workspace::{write_json, PostWorkspace, Verdict};
use crate::consensus::{Candidate, ConsensusEngine, ImageCandidate, ScaleVote};
use crate::events::{ProgressTracer, Span};
use crate::panel::{
    parse_bool, parse_one_line, parse_score, parse_text, AgentResponseError, Panel, PromptContext,
    SharedAgent,
};
use crate::state::{PersistenceResult, StateStatus, StateStore};

/// What to make a post about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostInput {
    pub theme: String,
    pub post_format: String,
    /// Externally supplied image sources; empty means generate.
    #[serde(default)]
    pub images: Vec<String>,
}

impl PostInput {
    pub fn new(theme: impl Into<String>, post_format: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
            post_format: post_format.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// Contents of `rating.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Critique {
    pub average: f64,
    pub critiques: BTreeMap<String, String>,
    pub ratings: BTreeMap<String, Value>,
}

enum Decision {
    Approved { post: PostRecord, hash: String },
    Rejected { post: PostRecord, reason: String },
}

pub struct ProductionPipeline {
    config: ProductionConfig,
    prompts: PromptSet,
    workspace: PostWorkspace,
    engine: ConsensusEngine,
    generator: Arc<dyn ImageGenerator>,
    fetcher: Arc<dyn ImageFetcher>,
    publisher: Arc<dyn Publisher>,
    state: Option<StateStore>,
    tracer: ProgressTracer,
    rng: StdRng,
    summary: BatchSummary,
}

impl ProductionPipeline {
    pub fn new(
        config: ProductionConfig,
        prompts: PromptSet,
        workspace: PostWorkspace,
        generator: Arc<dyn ImageGenerator>,
        fetcher: Arc<dyn ImageFetcher>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let engine =
            ConsensusEngine::new().with_careful_warning(prompts.rank_image_sort_retry.clone());
        Self {
            config,
            prompts,
            workspace,
            engine,
            generator,
            fetcher,
            publisher,
            state: None,
            tracer: ProgressTracer::disabled(),
            rng: StdRng::from_entropy(),
            summary: BatchSummary::new(),
        }
    }

    /// Evolve and persist cross-run state after each decision.
    pub fn with_state(mut self, store: StateStore) -> Self {
        self.state = Some(store);
        self
    }

    pub fn with_tracer(mut self, tracer: ProgressTracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_engine(mut self, engine: ConsensusEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &ProductionConfig {
        &self.config
    }

    pub fn summary(&self) -> &BatchSummary {
        &self.summary
    }

    pub fn workspace(&self) -> &PostWorkspace {
        &self.workspace
    }

    pub fn state(&self) -> Option<&StateStore> {
        self.state.as_ref()
    }

    /// Current cross-run state as prompt context.
    pub fn state_context(&self) -> PromptContext {
        self.state
            .as_ref()
            .map(|store| {
                store
                    .state()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run attempts for `input` until one is approved or the bound is hit.
    pub async fn produce(&mut self, input: &PostInput, crew: &Crew) -> PersistenceResult<PostOutcome> {
        let span = self.tracer.span("feedme.post", &input.post_format);
        span.report_args(
            vec![json!(crew.interest_names()), json!(input.post_format)],
            Map::new(),
        );

        let mut last_reason = String::from("no attempts made");
        for attempt in 0..self.config.max_post_retry {
            self.summary.log();
            info!(theme = %input.theme, attempt, "Starting post attempt");

            match self.attempt(attempt, input, crew).await? {
                AttemptResult::Success(post) => {
                    info!(theme = %input.theme, attempt, path = %post.path.display(), "Post approved");
                    let outcome = PostOutcome::Approved {
                        post,
                        attempts: attempt + 1,
                    };
                    span.report_output(outcome.to_json());
                    return Ok(outcome);
                }
                AttemptResult::Retryable { reason } => {
                    warn!(theme = %input.theme, attempt, reason = %reason, "Attempt did not succeed");
                    last_reason = reason;
                }
                AttemptResult::Fatal { reason } => {
                    error!(theme = %input.theme, attempt, reason = %reason, "Attempt failed fatally");
                    self.summary.failed_posts += 1;
                    let outcome = PostOutcome::Failed {
                        attempts: attempt + 1,
                        reason,
                    };
                    span.report_output(outcome.to_json());
                    return Ok(outcome);
                }
            }
        }

        error!(
            theme = %input.theme,
            attempts = self.config.max_post_retry,
            last_reason = %last_reason,
            "Post failed, max retries exceeded"
        );
        self.summary.failed_posts += 1;
        span.report_output(json!({"status": "failed", "reason": "max retries exceeded"}));
        Ok(PostOutcome::Failed {
            attempts: self.config.max_post_retry,
            reason: format!("max retries exceeded: {last_reason}"),
        })
    }

    async fn attempt(
        &mut self,
        attempt: u32,
        input: &PostInput,
        crew: &Crew,
    ) -> PersistenceResult<AttemptResult> {
        let span = self.tracer.span("feedme.post.retry", attempt);

        let working = match self.workspace.prepare() {
            Ok(working) => working,
            Err(e) => {
                error!(theme = %input.theme, attempt, error = %e, "Failed to prepare working directory");
                self.summary.rejected_posts += 1;
                let result = AttemptResult::Retryable {
                    reason: e.to_string(),
                };
                span.report_output(result.to_json());
                return Ok(result);
            }
        };

        let mut run = PipelineRun::new(attempt, working);
        let mut staged = None;
        let outcome = self
            .run_attempt(&mut run, input, crew, &span, &mut staged)
            .await;

        let result = match outcome {
            Ok(Decision::Approved { post, hash }) => {
                self.approve(&mut run, input, staged, post, hash).await?
            }
            Ok(Decision::Rejected { post, reason }) => {
                self.reject(&mut run, input, staged, Some(&post), reason)?
            }
            Err(AttemptError::Acquisition(e)) => {
                error!(theme = %input.theme, attempt, error = %e, "Not enough images for post");
                self.reject(&mut run, input, staged, None, e.to_string())?
            }
            Err(e) => self.fail(&mut run, input, staged, e),
        };

        info!(theme = %input.theme, summary = %run.summary(), "Attempt finished");
        span.report_output(result.to_json());
        Ok(result)
    }

    async fn run_attempt(
        &mut self,
        run: &mut PipelineRun,
        input: &PostInput,
        crew: &Crew,
        span: &Span,
        staged: &mut Option<PathBuf>,
    ) -> Result<Decision, AttemptError> {
        let working = run.working_directory().clone();
        run.advance(PipelineStatus::Generating, None)?;

        let modifier = self
            .config
            .modifiers
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_default();
        let min = self.config.min_image_count;
        let count = self.rng.gen_range(min..=self.config.max_image_count.max(min));

        let mut context = self.state_context();
        context.merge(
            &PromptContext::new()
                .with("count", count)
                .with("modifier", modifier)
                .with("post_format", input.post_format.as_str())
                .with("theme", input.theme.as_str()),
        );
        span.report_args(vec![], context.as_map().clone());

        let supplied = if input.images.is_empty() {
            Vec::new()
        } else {
            let images = self.fetcher.fetch(&input.images, &working).await?;
            info!(theme = %input.theme, images = images.len(), "Loaded input images");
            if images.is_empty() {
                return Err(AcquisitionError::NoCandidates {
                    requested: input.images.len(),
                }
                .into());
            }
            images
        };

        let ideas = self.generate_ideas(crew, &context).await?;
        let description = self.generate_description(crew, &context, &ideas).await?;
        context.insert("description", description.as_str());
        let keywords = self.generate_image_prompt(crew, &context).await?;
        info!(theme = %input.theme, keywords = %keywords, "Post image prompt");

        let files = if supplied.is_empty() {
            let size = self.choose_size(crew, &context).await?;
            warn!(count, %size, prompt = %keywords, "Generating images for post");
            let generated = self
                .generator
                .generate(&keywords, count, size, &working)
                .await;
            let files = saved_filenames(generated);
            if files.is_empty() {
                return Err(AcquisitionError::NoCandidates { requested: count }.into());
            }
            run.advance(PipelineStatus::Ranking, Some("generated images kept as-is"))?;
            files
        } else {
            run.advance(PipelineStatus::Ranking, None)?;
            self.rank_supplied(crew, &context, supplied, count).await?
        };

        let mut post = PostRecord::new(&input.theme, &description, files, &keywords);
        let hash = post.content_hash();
        let post_path = self.workspace.promote(&post_slug(&input.theme, &hash))?;
        *staged = Some(post_path.clone());
        info!(theme = %input.theme, path = %post_path.display(), "Post compiled");
        write_json(&post_path, "post.json", &post)?;
        write_json(&post_path, "ideas.json", &ideas)?;

        run.advance(PipelineStatus::Critiquing, None)?;
        let critique = self.critique(crew, &context, &post).await;
        write_json(&post_path, "rating.json", &critique)?;
        post.rating = Some(critique.average);
        post.critiques = Some(critique.critiques.values().cloned().collect());
        write_json(&post_path, "post.json", &post)?;
        self.summary.record_rating(critique.average, run.elapsed());

        if critique.average < self.config.approval_threshold {
            return Ok(Decision::Rejected {
                reason: format!(
                    "low rating: {:.2} < {:.2}",
                    critique.average, self.config.approval_threshold
                ),
                post,
            });
        }
        Ok(Decision::Approved { post, hash })
    }

    async fn generate_ideas(
        &self,
        crew: &Crew,
        context: &PromptContext,
    ) -> Result<BTreeMap<String, String>, AttemptError> {
        let panel = crew.interest_panel();
        let mut ideas = BTreeMap::new();

        for (interest, agent) in crew.interests() {
            match panel
                .ask_parsed(agent, &self.prompts.generate_ideas, context, &parse_text)
                .await
            {
                Ok(idea) => {
                    info!(interest = %interest, idea = %idea, "Interest agent came up with an idea");
                    ideas.insert(interest.clone(), idea);
                }
                Err(e) => warn!(interest = %interest, error = %e, "No idea from interest agent"),
            }
        }

        if ideas.is_empty() {
            return Err(AttemptError::NoAnswers { stage: "ideas" });
        }
        Ok(ideas)
    }

    async fn generate_description(
        &self,
        crew: &Crew,
        context: &PromptContext,
        ideas: &BTreeMap<String, String>,
    ) -> Result<String, AttemptError> {
        let manager = crew.manager();
        let ctx = context
            .clone()
            .with("ideas", format_bullet_list(ideas.values()));
        let text = crew
            .solo(manager)
            .ask_parsed(manager, &self.prompts.generate_description, &ctx, &parse_text)
            .await?;
        let description = cleanup_sentence(&text, true);
        info!(description = %description, "Post description");
        Ok(description)
    }

    /// Image prompt from a random interest agent. Keywords, characters and
    /// scene feed a one-line prompt, which is stripped of abstract concepts
    /// and topped up with quality keywords.
    async fn generate_image_prompt(
        &mut self,
        crew: &Crew,
        context: &PromptContext,
    ) -> Result<String, AttemptError> {
        let agent = crew
            .random_interest(&mut self.rng)
            .cloned()
            .ok_or(AttemptError::NoAnswers {
                stage: "image prompt",
            })?;
        info!(agent = %agent.name(), "Generating post prompt");

        let panel = crew.solo(&agent);
        let description = context.get_str("description").unwrap_or_default().to_string();
        let mut ctx = context.clone().with(
            "example_concepts",
            format_bullet_list(&self.config.remove_concepts),
        );

        let keywords = panel
            .ask_parsed(&agent, &self.prompts.generate_keywords, &ctx, &parse_text)
            .await?;
        let keywords = cleanup_sentence(&keywords, false);
        debug!(keywords = %keywords, "Image keywords");
        ctx.insert("keywords", keywords.as_str());

        let characters =
            ask_or_empty(&panel, &agent, &self.prompts.elaborate_characters, &ctx, "characters")
                .await;
        ctx.insert("scene", description.as_str());
        let scene = ask_or_empty(&panel, &agent, &self.prompts.elaborate_scene, &ctx, "scene").await;
        ctx.insert("characters", characters.as_str());
        ctx.insert("scene", scene.as_str());
        ctx.insert("error", "");

        let mut prompt = None;
        let mut last_error = None;
        for attempt in 0..self.config.prompt_retry.max(1) {
            match panel
                .ask_parsed(&agent, &self.prompts.generate_prompt, &ctx, &parse_one_line)
                .await
            {
                Ok(line) => {
                    prompt = Some(line);
                    break;
                }
                Err(e) => {
                    warn!(agent = %agent.name(), attempt, error = %e, "Image prompt rejected, retrying");
                    if let AgentResponseError::Unparseable { reason, .. } = &e {
                        ctx.insert("error", format!(" Your last answer was rejected: {reason}."));
                    }
                    last_error = Some(e);
                }
            }
        }
        let Some(prompt) = prompt else {
            return Err(last_error
                .map(AttemptError::from)
                .unwrap_or(AttemptError::NoAnswers {
                    stage: "image prompt",
                }));
        };

        ctx.insert("keywords", prompt.as_str());
        let prompt = match panel
            .ask_parsed(&agent, &self.prompts.remove_concepts, &ctx, &parse_one_line)
            .await
        {
            Ok(filtered) => filtered,
            Err(e) => {
                warn!(agent = %agent.name(), error = %e, "Concept removal failed, keeping prompt");
                prompt
            }
        };
        let prompt = cleanup_sentence(&prompt, false);

        let quality: Vec<&str> = self
            .config
            .quality_keywords
            .choose_multiple(&mut self.rng, self.config.quality_keyword_count)
            .map(String::as_str)
            .collect();
        if quality.is_empty() {
            return Ok(prompt);
        }
        Ok(format!("{prompt}, {}", quality.join(", ")))
    }

    async fn choose_size(
        &self,
        crew: &Crew,
        context: &PromptContext,
    ) -> Result<ImageSize, AttemptError> {
        let result = self
            .engine
            .plurality(
                &crew.interest_panel(),
                &self.prompts.choose_image_size,
                context,
                &ImageSize::OPTIONS,
            )
            .await?;

        let size = result
            .winner()
            .and_then(|winner| ImageSize::parse(&winner.key))
            .unwrap_or_else(|| {
                warn!("No image size consensus, using square");
                ImageSize::Square
            });
        info!(%size, votes = ?result.scores, "Image size chosen");
        Ok(size)
    }

    async fn rank_supplied(
        &self,
        crew: &Crew,
        context: &PromptContext,
        supplied: Vec<ImageCandidate>,
        count: usize,
    ) -> Result<Vec<String>, AttemptError> {
        let candidates: Vec<Candidate> = supplied.into_iter().map(Candidate::Image).collect();
        let panel = crew.interest_panel();

        let result = match self.config.image_ranking {
            ImageRanking::Binary => {
                self.engine
                    .binary_vote(&panel, &self.prompts.rank_image_binary, context, &candidates, count)
                    .await?
            }
            ImageRanking::Scale => {
                self.engine
                    .scale_vote(
                        &panel,
                        &self.prompts.rank_image_scale,
                        context,
                        &candidates,
                        count,
                        ScaleVote::new(self.config.image_max_score, self.config.image_threshold),
                    )
                    .await?
            }
            ImageRanking::Ordinal => {
                self.engine
                    .ordinal_rank(&panel, &self.prompts.rank_image_sort, context, &candidates, count)
                    .await?
            }
        };

        let files = result.selected_keys();
        info!(top_images = ?files, "Top images");
        if files.is_empty() {
            return Err(AcquisitionError::NoneSelected {
                candidates: candidates.len(),
            }
            .into());
        }
        Ok(files)
    }

    /// Gather opinions, then ratings, from the critic panel.
    async fn critique(&self, crew: &Crew, context: &PromptContext, post: &PostRecord) -> Critique {
        let panel = crew.critic_panel();
        let max_score = self.config.critique_max_score;
        let ctx = context
            .clone()
            .with("title", post.title.as_str())
            .with("description", post.description.as_str())
            .with("files", json!(post.files))
            .with("keywords", post.keywords.as_str())
            .with("max_score", max_score);

        let opinions = panel
            .sample(&self.prompts.critique_image_opinion, &ctx, parse_text)
            .await;
        for (agent, critique) in &opinions.answers {
            info!(agent = %agent, critique = %critique, "Critique");
        }
        let critiques: BTreeMap<String, String> = opinions.answers.into_iter().collect();

        let (scores, ratings): (Vec<f64>, BTreeMap<String, Value>) = match self.config.critique_mode
        {
            CritiqueMode::Binary => {
                let votes = panel
                    .sample(&self.prompts.critique_image_binary, &ctx, parse_bool)
                    .await;
                let scores = votes
                    .values()
                    .map(|approve| if *approve { 1.0 } else { 0.0 })
                    .collect();
                let ratings = votes
                    .answers
                    .into_iter()
                    .map(|(agent, approve)| (agent, json!(approve)))
                    .collect();
                (scores, ratings)
            }
            CritiqueMode::Scale => {
                // Out-of-range scores fail to parse and are dropped by the panel.
                let votes = panel
                    .sample(&self.prompts.critique_image_scale, &ctx, |text| {
                        parse_score(text, max_score)
                    })
                    .await;
                let scores = votes
                    .values()
                    .map(|score| *score as f64 / max_score as f64)
                    .collect();
                let ratings = votes
                    .answers
                    .into_iter()
                    .map(|(agent, score)| (agent, json!(score)))
                    .collect();
                (scores, ratings)
            }
        };

        let average = if scores.is_empty() {
            error!(title = %post.title, "No ratings for post");
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        info!(title = %post.title, average, "Average rating");

        Critique {
            average,
            critiques,
            ratings,
        }
    }

    async fn approve(
        &mut self,
        run: &mut PipelineRun,
        input: &PostInput,
        staged: Option<PathBuf>,
        post: PostRecord,
        hash: String,
    ) -> PersistenceResult<AttemptResult> {
        let Some(staged_path) = staged.clone() else {
            let e = AttemptError::NoAnswers { stage: "post folder" };
            return Ok(self.fail(run, input, staged, e));
        };

        let path = match self.workspace.finalize(&staged_path, Verdict::Approved) {
            Ok(path) => path,
            Err(e) => return Ok(self.fail(run, input, staged, e.into())),
        };
        let rating = post.rating.unwrap_or_default();
        if let Err(e) = run.advance(PipelineStatus::Approved, Some(format!("rating {rating:.2}").as_str())) {
            error!(error = %e, "Unexpected transition failure on approval");
        }
        warn!(theme = %input.theme, path = %path.display(), "Approving post");
        self.summary.approved_posts += 1;

        let published = self.publish(&post, &hash, &path).await;
        self.update_state(StateStatus::Approved, Some(&post))?;

        Ok(AttemptResult::Success(ApprovedPost {
            post,
            hash,
            path,
            rating,
            published,
        }))
    }

    async fn publish(
        &self,
        post: &PostRecord,
        hash: &str,
        folder: &std::path::Path,
    ) -> Option<super::collaborators::Published> {
        let description = PromptContext::new()
            .with("body", post.description.as_str())
            .with("bot_name", self.config.bot_name.as_str())
            .with("hash", hash)
            .render(&self.prompts.post_notice);
        let request = PublishRequest {
            files: post.files.iter().map(|f| folder.join(f)).collect(),
            title: post.title.clone(),
            description,
            mature: self.config.mature,
            folder: folder.to_path_buf(),
        };

        match self.publisher.publish(&request).await {
            Ok(published) => {
                info!(title = %post.title, published = ?published, "Post published");
                Some(published)
            }
            Err(e) => {
                error!(title = %post.title, error = %e, "Failed to publish post");
                None
            }
        }
    }

    fn reject(
        &mut self,
        run: &mut PipelineRun,
        input: &PostInput,
        staged: Option<PathBuf>,
        post: Option<&PostRecord>,
        reason: String,
    ) -> PersistenceResult<AttemptResult> {
        if let Err(e) = run.advance(PipelineStatus::Rejected, Some(reason.as_str())) {
            error!(error = %e, "Unexpected transition failure on rejection");
        }
        error!(theme = %input.theme, attempt = run.retry_count(), reason = %reason, "Rejecting post");
        self.park(staged);
        self.summary.rejected_posts += 1;
        self.update_state(StateStatus::Rejected, post)?;
        Ok(AttemptResult::Retryable { reason })
    }

    fn fail(
        &mut self,
        run: &mut PipelineRun,
        input: &PostInput,
        staged: Option<PathBuf>,
        e: AttemptError,
    ) -> AttemptResult {
        let reason = e.to_string();
        if let Err(te) = run.fail(&reason) {
            error!(error = %te, "Unexpected transition failure on attempt failure");
        }
        error!(
            theme = %input.theme,
            attempt = run.retry_count(),
            kind = e.kind(),
            error = %e,
            "Failed to process input"
        );
        self.park(staged);
        self.summary.rejected_posts += 1;

        if e.is_fatal() {
            AttemptResult::Fatal { reason }
        } else {
            AttemptResult::Retryable { reason }
        }
    }

    /// Move a staged post to `rejected/`, or drop the working directory if
    /// nothing was staged. Best effort.
    fn park(&self, staged: Option<PathBuf>) {
        let result = match staged {
            Some(path) if path.exists() => self
                .workspace
                .finalize(&path, Verdict::Rejected)
                .map(|_| ()),
            _ => self.workspace.discard_working(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to clean up attempt artifacts");
        }
    }

    fn update_state(&mut self, status: StateStatus, post: Option<&PostRecord>) -> PersistenceResult<()> {
        if let Some(store) = self.state.as_mut() {
            let state = store.update(status, post)?;
            info!(%status, state = ?state, "Cross-run state updated");
        }
        Ok(())
    }
}

/// Ask one optional chain step; a failure degrades to an empty answer.
async fn ask_or_empty(
    panel: &Panel,
    agent: &SharedAgent,
    prompt: &str,
    context: &PromptContext,
    step: &str,
) -> String {
    match panel.ask_parsed(agent, prompt, context, &parse_text).await {
        Ok(text) => cleanup_sentence(&text, true),
        Err(e) => {
            warn!(agent = %agent.name(), step, error = %e, "Image prompt step failed, skipping");
            String::new()
        }
    }
}

fn saved_filenames(generated: Vec<GeneratedImage>) -> Vec<String> {
    generated
        .into_iter()
        .filter_map(|image| match image {
            GeneratedImage::Saved(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            GeneratedImage::Failed(placeholder) => {
                warn!(placeholder = %placeholder, "Image generation failed");
                None
            }
        })
        .collect()
}
