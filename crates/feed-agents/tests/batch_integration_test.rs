//! Batch orchestrator integration tests: full theme → post loops with
//! prompt-keyed agents, fake image generation, and the real HTML publisher.
//!
//! Tests verify:
//! - A batch approves every post and leaves a browsable `post.html`
//! - Approved posts show up in the post index, newest first
//! - Cross-run state is persisted and feeds agent prompt contexts
//! - A crew whose concepts all score low produces no posts

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use feed_agents::agents::AgentSource;
use feed_agents::collaborators::{HtmlPublisher, PostIndex};
use feed_agents::config::{MarkovSettings, Settings};
use feed_agents::interests::{InterestCatalog, InterestEntry};
use feed_agents::orchestrator::BatchOrchestrator;
use feed_agents::registry::open_store;
use feed_agents::telemetry::TELEMETRY_FILE;
use feed_coordination::fakes::{FakeGenerator, StaticFetcher};
use feed_coordination::panel::{Agent, AgentResponseError, PromptContext, SharedAgent};
use feed_coordination::production::{PostWorkspace, ProductionPipeline};

/// Answers by the first key found in the prompt template. Keys with several
/// answers rotate through them.
struct KeyedAgent {
    name: String,
    answers: Vec<(&'static str, Vec<&'static str>)>,
    turns: Mutex<HashMap<&'static str, usize>>,
    contexts: Mutex<Vec<PromptContext>>,
}

impl KeyedAgent {
    fn new(name: &str, answers: Vec<(&'static str, Vec<&'static str>)>) -> Self {
        Self {
            name: name.to_string(),
            answers,
            turns: Mutex::new(HashMap::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Agent for KeyedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        prompt: &str,
        context: &PromptContext,
    ) -> Result<String, AgentResponseError> {
        self.contexts.lock().unwrap().push(context.clone());
        let (key, options) = self
            .answers
            .iter()
            .find(|(key, _)| prompt.contains(key))
            .ok_or_else(|| AgentResponseError::request(&self.name, "no scripted answer"))?;
        let mut turns = self.turns.lock().unwrap();
        let turn = turns.entry(*key).or_insert(0);
        let answer = options[*turn % options.len()];
        *turn += 1;
        Ok(answer.to_string())
    }
}

struct TestSource {
    concept_score: &'static str,
    manager: Arc<KeyedAgent>,
}

impl TestSource {
    fn new(concept_score: &'static str) -> Self {
        Self {
            concept_score,
            manager: Arc::new(KeyedAgent::new(
                "social media manager",
                vec![
                    (
                        "Rewrite",
                        vec!["\"Fog over the harbor.\"", "\"Gulls above the pier.\""],
                    ),
                    ("Write a social media post", vec!["Quiet water & grey light."]),
                    ("Which image shape", vec!["landscape"]),
                ],
            )),
        }
    }
}

impl AgentSource for TestSource {
    fn manager(&self) -> SharedAgent {
        self.manager.clone()
    }

    fn critic(&self) -> SharedAgent {
        Arc::new(KeyedAgent::new(
            "art critic",
            vec![
                ("honest opinion", vec!["Striking and calm."]),
                ("be published", vec!["yes"]),
            ],
        ))
    }

    fn interest(&self, interest: &str, _story: &str) -> SharedAgent {
        Arc::new(KeyedAgent::new(
            &format!("{interest} scientist"),
            vec![
                ("Suggest a concept", vec!["harbor fog"]),
                ("How interesting", vec![self.concept_score]),
                ("Share one idea", vec!["Boats resting in the fog."]),
                ("List the visual keywords", vec!["harbor, fog, boats"]),
                ("Describe the people", vec!["A lone sailor."]),
                ("Describe the setting", vec!["Grey morning light."]),
                ("Describe a single image", vec!["harbor, fog, moored boats, solitude"]),
                ("Remove any abstract", vec!["harbor, fog, moored boats"]),
                ("Which image shape", vec!["landscape"]),
                ("honest opinion", vec!["I like it."]),
                ("be published", vec!["yes"]),
            ],
        ))
    }
}

fn settings(root: &Path) -> Settings {
    let mut interests = InterestCatalog::new();
    interests.insert("boats", InterestEntry::Simple("Boats fascinate you.".into()));
    interests.insert("birds", InterestEntry::Simple("You watch birds.".into()));

    let mut settings = Settings {
        root: root.to_path_buf(),
        seed: Some(5),
        interests,
        ..Settings::default()
    };
    settings.posts.min_interests = 2;
    settings.posts.max_interests = 2;
    settings.production.min_image_count = 2;
    settings.production.max_image_count = 2;
    settings.state.middleware = vec!["markov".into()];
    settings.state.markov = MarkovSettings {
        statuses: vec![],
        table: serde_yaml::from_str(
            r#"
weather:
  "*": {sunny: 1.0}
  sunny: {rainy: 1.0}
  rainy: {sunny: 1.0}
"#,
        )
        .unwrap(),
    };
    settings
}

fn orchestrator(settings: Settings, source: Arc<dyn AgentSource>) -> BatchOrchestrator {
    let store = open_store(&settings).unwrap().unwrap();
    let pipeline = ProductionPipeline::new(
        settings.production.clone(),
        settings.prompts.clone(),
        PostWorkspace::new(&settings.root),
        Arc::new(FakeGenerator::new()),
        Arc::new(StaticFetcher),
        Arc::new(HtmlPublisher::new()),
    )
    .with_state(store);
    BatchOrchestrator::new(settings, source, pipeline)
}

#[tokio::test]
async fn test_batch_approves_and_renders_posts() {
    let root = tempfile::tempdir().unwrap();
    let source = Arc::new(TestSource::new("5"));
    let mut orchestrator = orchestrator(settings(root.path()), source);

    let report = orchestrator.run_batch(2).await.unwrap();
    assert_eq!(report.requested, 2);
    assert_eq!(report.summary.approved_posts, 2);
    assert_eq!(report.summary.failed_posts, 0);
    assert_eq!(report.approval_rate, 1.0);

    let approved = PostWorkspace::new(root.path()).approved_dir();
    let entries = PostIndex::list(&approved).unwrap();
    assert_eq!(entries.len(), 2);

    let mut titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["Fog over the harbor", "Gulls above the pier"]);

    for entry in &entries {
        assert_eq!(entry.images, vec!["fake-0.png", "fake-1.png"]);
        let page = std::fs::read_to_string(entry.folder.join("post.html")).unwrap();
        assert!(page.contains("Quiet water &amp; grey light."));
        assert!(page.contains("Post ID:"));
    }

    let telemetry = std::fs::read_to_string(root.path().join(TELEMETRY_FILE)).unwrap();
    assert_eq!(telemetry.lines().count(), 1);
}

#[tokio::test]
async fn test_state_persists_and_reaches_prompts() {
    let root = tempfile::tempdir().unwrap();
    let source = Arc::new(TestSource::new("5"));
    let manager = source.manager.clone();
    let mut orchestrator = orchestrator(settings(root.path()), source);

    assert_eq!(
        orchestrator.pipeline().state().unwrap().state()["weather"],
        "sunny"
    );
    orchestrator.run_batch(1).await.unwrap();

    // One approval moves the chain from sunny to rainy.
    let saved: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(root.path().join("state.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved["weather"], "rainy");

    let contexts = manager.contexts.lock().unwrap();
    assert!(!contexts.is_empty());
    assert!(contexts
        .iter()
        .all(|context| context.get_str("weather") == Some("sunny")));
}

#[tokio::test]
async fn test_low_concept_scores_skip_posts() {
    let root = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator(settings(root.path()), Arc::new(TestSource::new("1")));

    let report = orchestrator.run_batch(2).await.unwrap();
    assert_eq!(report.summary.approved_posts, 0);
    assert_eq!(report.summary.rejected_posts, 0);

    let approved = PostWorkspace::new(root.path()).approved_dir();
    assert!(PostIndex::list(&approved).unwrap().is_empty());
}
