//! YAML-backed settings with environment overrides.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use feed_coordination::production::{ImageSize, ProductionConfig, PromptSet};
use feed_coordination::state::{LogicRule, MarkovTransitionTable, StateStatus};
use serde::{Deserialize, Serialize};

use crate::interests::InterestCatalog;

pub const DEFAULT_CONFIG_PATH: &str = "feedme.yaml";

/// Chat model endpoint and the two model roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible base URL, without `/chat/completions`.
    pub url: String,
    pub api_key: Option<String>,
    /// Drives the social media manager.
    pub manager_model: String,
    pub manager_temperature: f32,
    /// Drives interest agents and the art critic.
    pub creative_model: String,
    pub creative_temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/v1".into(),
            api_key: None,
            manager_model: "manager".into(),
            manager_temperature: 0.3,
            creative_model: "creative".into(),
            creative_temperature: 0.9,
            max_tokens: 1024,
            timeout_secs: 120,
        }
    }
}

/// Width and height per aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizePresets {
    pub landscape: (u32, u32),
    pub portrait: (u32, u32),
    pub square: (u32, u32),
}

impl Default for SizePresets {
    fn default() -> Self {
        Self {
            landscape: (1216, 832),
            portrait: (832, 1216),
            square: (1024, 1024),
        }
    }
}

impl SizePresets {
    pub fn dimensions(&self, size: ImageSize) -> (u32, u32) {
        match size {
            ImageSize::Landscape => self.landscape,
            ImageSize::Portrait => self.portrait,
            ImageSize::Square => self.square,
        }
    }
}

/// Image generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub url: String,
    pub poll_secs: u64,
    /// Readiness polls before a job is abandoned.
    pub retries: u32,
    /// Images per submitted job.
    pub batch: usize,
    pub sizes: SizePresets,
    pub checkpoints: Vec<String>,
    pub negative_prompt: String,
    pub prompt_filter: String,
    pub remove_tokens: Vec<String>,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".into(),
            poll_secs: 5,
            retries: 60,
            batch: 1,
            sizes: SizePresets::default(),
            checkpoints: Vec::new(),
            negative_prompt: String::new(),
            prompt_filter: String::new(),
            remove_tokens: Vec::new(),
        }
    }
}

/// How the interest panel settles on one concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptRanking {
    /// Yes/no vote per concept; most approvals wins.
    Binary,
    /// Each concept scored, best average over the threshold wins.
    Scale,
}

/// Batch shape: how many posts, which formats, and how themes are picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostSettings {
    pub count: u32,
    pub formats: Vec<String>,
    pub fixed_format: Option<String>,
    pub concept_min_words: u32,
    pub concept_max_words: u32,
    pub concept_ranking: ConceptRanking,
    pub concept_threshold: f64,
    pub concept_max_score: i64,
    pub min_interests: usize,
    pub max_interests: usize,
    /// Interest categories to sample from; empty means all.
    pub categories: Vec<String>,
}

impl Default for PostSettings {
    fn default() -> Self {
        Self {
            count: 20,
            formats: vec!["photo".into()],
            fixed_format: None,
            concept_min_words: 2,
            concept_max_words: 4,
            concept_ranking: ConceptRanking::Scale,
            concept_threshold: 3.0,
            concept_max_score: 5,
            min_interests: 2,
            max_interests: 5,
            categories: Vec::new(),
        }
    }
}

/// Backstories used as system prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backstories {
    pub interest_scientist: String,
    pub social_media_manager: String,
    pub art_critic: String,
}

impl Default for Backstories {
    fn default() -> Self {
        Self {
            interest_scientist: "You are a scientist with a special interest.".into(),
            social_media_manager: "You are a social media manager writing engaging posts.".into(),
            art_critic: "You are an art critic with high standards.".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// Statuses that reach the rules; all of them when empty.
    pub statuses: Vec<StateStatus>,
    pub rules: Vec<LogicRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkovSettings {
    pub statuses: Vec<StateStatus>,
    pub table: MarkovTransitionTable,
}

/// Cross-run state file and its middleware registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    pub enabled: bool,
    /// Relative paths resolve against the post root.
    pub file: PathBuf,
    /// Middleware names in application order: `rules`, `markov`.
    pub middleware: Vec<String>,
    pub rules: RuleSettings,
    pub markov: MarkovSettings,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            file: PathBuf::from("state.json"),
            middleware: vec!["markov".into(), "rules".into()],
            rules: RuleSettings::default(),
            markov: MarkovSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishTarget {
    #[default]
    Html,
    /// Keep approved posts on disk only.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub root: PathBuf,
    /// Seeds every random choice when set.
    pub seed: Option<u64>,
    pub llm: LlmSettings,
    pub images: ImageSettings,
    pub posts: PostSettings,
    pub production: ProductionConfig,
    pub prompts: PromptSet,
    pub agents: Backstories,
    pub interests: InterestCatalog,
    pub state: StateSettings,
    pub publish: PublishTarget,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/feedme-posts"),
            seed: None,
            llm: LlmSettings::default(),
            images: ImageSettings::default(),
            posts: PostSettings::default(),
            production: ProductionConfig::default(),
            prompts: PromptSet::default(),
            agents: Backstories::default(),
            interests: InterestCatalog::default(),
            state: StateSettings::default(),
            publish: PublishTarget::default(),
        }
    }
}

impl Settings {
    /// Config path from the CLI flag, then `FEEDME_CONFIG`, then the default.
    pub fn resolve_path(cli: Option<PathBuf>) -> PathBuf {
        cli.unwrap_or_else(|| {
            std::env::var("FEEDME_CONFIG")
                .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into())
                .into()
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let mut settings = Self::from_yaml(&raw)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("YAML parse error")
    }

    /// Secrets and endpoints from the environment win over the file.
    pub fn apply_env_overrides(&mut self) {
        self.llm.url = std::env::var("FEEDME_LLM_URL").unwrap_or_else(|_| self.llm.url.clone());
        if let Ok(key) = std::env::var("FEEDME_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        self.images.url =
            std::env::var("FEEDME_IMAGE_URL").unwrap_or_else(|_| self.images.url.clone());
        if let Ok(root) = std::env::var("FEEDME_ROOT") {
            self.root = root.into();
        }
    }

    pub fn validate(&self) -> Result<()> {
        let posts = &self.posts;
        if posts.min_interests == 0 || posts.min_interests > posts.max_interests {
            bail!(
                "posts.min_interests ({}) must be between 1 and posts.max_interests ({})",
                posts.min_interests,
                posts.max_interests
            );
        }
        for category in &posts.categories {
            if !self.interests.categories().contains_key(category) {
                bail!("posts.categories names unknown interest category: {category}");
            }
        }
        if posts.fixed_format.is_none() && posts.formats.is_empty() {
            bail!("posts.formats is empty and no posts.fixed_format is set");
        }
        let production = &self.production;
        if production.min_image_count == 0
            || production.min_image_count > production.max_image_count
        {
            bail!(
                "production.min_image_count ({}) must be between 1 and production.max_image_count ({})",
                production.min_image_count,
                production.max_image_count
            );
        }
        if production.max_post_retry == 0 {
            bail!("production.max_post_retry must be at least 1");
        }
        if self.images.batch == 0 {
            bail!("images.batch must be at least 1");
        }
        for name in &self.state.middleware {
            if !matches!(name.as_str(), "rules" | "markov") {
                bail!("Unknown state middleware: {name}");
            }
        }
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        if self.state.file.is_absolute() {
            self.state.file.clone()
        } else {
            self.root.join(&self.state.file)
        }
    }
}
