//! Multi-post batch loop.
//!
//! For every post: pick a format, sample interests, assemble a crew, let the
//! interest panel propose concepts, keep the best-scored one as the theme,
//! and hand it to the production pipeline. A post that fails never stops the
//! batch; only a state persistence failure does.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use feed_coordination::consensus::{Candidate, ConsensusEngine, ScaleVote};
use feed_coordination::events::ProgressTracer;
use feed_coordination::panel::{parse_text, PromptContext};
use feed_coordination::production::{
    cleanup_sentence, Crew, ImageFetcher, ImageGenerator, PostInput, PostOutcome, PostWorkspace,
    ProductionPipeline, Publisher,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};

use crate::agents::{build_crew, AgentSource};
use crate::collaborators::{FolderPublisher, HtmlPublisher, HttpImageFetcher, OnnxImageGenerator};
use crate::config::{ConceptRanking, PublishTarget, Settings};
use crate::registry::open_store;
use crate::telemetry::{append_telemetry, write_batch_report, BatchReport};

/// Pipeline wired to the HTTP collaborators and the persisted state.
pub fn build_pipeline(settings: &Settings) -> Result<ProductionPipeline> {
    let generator: Arc<dyn ImageGenerator> =
        Arc::new(OnnxImageGenerator::new(settings.images.clone()));
    let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpImageFetcher::new(&settings.images.url));
    let publisher: Arc<dyn Publisher> = match settings.publish {
        PublishTarget::Html => Arc::new(HtmlPublisher::new()),
        PublishTarget::None => Arc::new(FolderPublisher),
    };

    let mut pipeline = ProductionPipeline::new(
        settings.production.clone(),
        settings.prompts.clone(),
        PostWorkspace::new(&settings.root),
        generator,
        fetcher,
        publisher,
    );
    if let Some(seed) = settings.seed {
        pipeline = pipeline.with_rng(StdRng::seed_from_u64(seed));
    }
    if let Some(store) = open_store(settings)? {
        pipeline = pipeline.with_state(store);
    }
    Ok(pipeline)
}

pub struct BatchOrchestrator {
    settings: Settings,
    source: Arc<dyn AgentSource>,
    pipeline: ProductionPipeline,
    engine: ConsensusEngine,
    rng: StdRng,
}

impl BatchOrchestrator {
    pub fn new(settings: Settings, source: Arc<dyn AgentSource>, pipeline: ProductionPipeline) -> Self {
        let rng = match settings.seed {
            // Offset so theme choices don't mirror the pipeline's draws.
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            settings,
            source,
            pipeline,
            engine: ConsensusEngine::new(),
            rng,
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_tracer(mut self, tracer: ProgressTracer) -> Self {
        self.pipeline = self.pipeline.with_tracer(tracer);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pipeline(&self) -> &ProductionPipeline {
        &self.pipeline
    }

    /// The fixed format, or a random configured one.
    pub fn choose_format(&mut self) -> Option<String> {
        match &self.settings.posts.fixed_format {
            Some(format) => Some(format.clone()),
            None => self.settings.posts.formats.choose(&mut self.rng).cloned(),
        }
    }

    /// Between `min_interests` and `max_interests` distinct interests from
    /// the configured categories.
    pub fn choose_interests(&mut self) -> Vec<String> {
        let posts = &self.settings.posts;
        let k = self
            .rng
            .gen_range(posts.min_interests..=posts.max_interests.max(posts.min_interests));
        self.settings
            .interests
            .sample(k, &posts.categories, &mut self.rng)
    }

    pub fn crew_for(&mut self, interests: &[String]) -> Crew {
        build_crew(
            self.source.as_ref(),
            &self.settings.interests,
            interests,
            Duration::from_secs(self.settings.llm.timeout_secs),
            &mut self.rng,
        )
    }

    /// Best concept from the interest panel, cleaned into a theme sentence.
    ///
    /// Returns `None` when no concept was proposed or none met the threshold.
    pub async fn generate_theme(&self, crew: &Crew, post_format: &str) -> Option<String> {
        let posts = &self.settings.posts;
        let prompts = &self.settings.prompts;
        let context = self.pipeline.state_context().merged(
            &PromptContext::new()
                .with("post_format", post_format)
                .with("min_words", posts.concept_min_words)
                .with("max_words", posts.concept_max_words),
        );

        let panel = crew.interest_panel();
        let responses = panel
            .sample(&prompts.generate_concepts, &context, parse_text)
            .await;
        let concepts: Vec<Candidate> = responses
            .values()
            .map(|text| cleanup_sentence(text, false))
            .filter(|text| !text.is_empty())
            .map(Candidate::concept)
            .collect();
        if concepts.is_empty() {
            warn!(post_format, "No concepts proposed");
            return None;
        }
        info!(concepts = ?concepts.iter().map(Candidate::key).collect::<Vec<_>>(), "Concepts proposed");

        let ranked = match posts.concept_ranking {
            ConceptRanking::Binary => {
                self.engine
                    .binary_vote(&panel, &prompts.rank_concepts_binary, &context, &concepts, 1)
                    .await
            }
            ConceptRanking::Scale => {
                let scale = ScaleVote::new(posts.concept_max_score, posts.concept_threshold);
                self.engine
                    .scale_vote(&panel, &prompts.rank_concepts_scale, &context, &concepts, 1, scale)
                    .await
            }
        };
        let result = match ranked {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Concept vote failed");
                return None;
            }
        };
        let concept = result.winner()?.key.clone();
        info!(concept = %concept, "Concept selected");

        let manager = crew.manager();
        let cleanup_context = context.merged(&PromptContext::new().with("concept", concept.as_str()));
        let theme = match crew
            .solo(manager)
            .ask(manager, &prompts.cleanup_theme, &cleanup_context)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(concept = %concept, error = %e, "Theme cleanup failed, using the concept");
                concept
            }
        };

        let theme = cleanup_sentence(&theme, false);
        (!theme.is_empty()).then_some(theme)
    }

    /// One themed post with the given crew.
    pub async fn run_post(&mut self, input: &PostInput, crew: &Crew) -> Result<PostOutcome> {
        info!(theme = %input.theme, post_format = %input.post_format, crew = ?crew, "Starting post");
        let outcome = self
            .pipeline
            .produce(input, crew)
            .await
            .context("Failed to persist cross-run state")?;
        match &outcome {
            PostOutcome::Approved { post, attempts } => {
                info!(theme = %input.theme, attempts, path = %post.path.display(), "Post approved");
            }
            PostOutcome::Failed { attempts, reason } => {
                warn!(theme = %input.theme, attempts, reason = %reason, "Post failed");
            }
        }
        Ok(outcome)
    }

    /// `count` posts; writes the batch report and telemetry under the root.
    pub async fn run_batch(&mut self, count: usize) -> Result<BatchReport> {
        let started = Instant::now();

        for index in 0..count {
            let post_format = self
                .choose_format()
                .context("No post format configured")?;
            let interests = self.choose_interests();
            let crew = self.crew_for(&interests);
            info!(index, count, post_format = %post_format, interests = ?crew.interest_names(), "Generating theme");

            let Some(theme) = self.generate_theme(&crew, &post_format).await else {
                error!(index, post_format = %post_format, "No theme could be generated, skipping post");
                continue;
            };

            self.run_post(&PostInput::new(theme, post_format), &crew)
                .await?;
            self.pipeline.summary().log();
        }

        let report = BatchReport::new(
            self.pipeline.summary(),
            count,
            started.elapsed().as_secs_f64(),
        );
        write_batch_report(&report, &self.settings.root);
        append_telemetry(&report, &self.settings.root);
        Ok(report)
    }
}
