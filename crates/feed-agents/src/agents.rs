//! Chat agents backed by an OpenAI-compatible completions endpoint.
//!
//! Each agent carries a backstory (sent as the system prompt) and a base
//! context merged under every call's context, so `{interest}` and friends
//! render without the pipeline knowing about them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use feed_coordination::panel::{Agent, AgentResponseError, PromptContext, SharedAgent};
use feed_coordination::production::Crew;
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{Backstories, LlmSettings};
use crate::interests::InterestCatalog;

pub const MANAGER_NAME: &str = "social media manager";
pub const CRITIC_NAME: &str = "art critic";

/// One model role on one endpoint.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

pub struct ChatAgent {
    name: String,
    backstory: String,
    base_context: PromptContext,
    spec: ModelSpec,
    client: reqwest::Client,
}

impl std::fmt::Debug for ChatAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAgent")
            .field("name", &self.name)
            .field("model", &self.spec.model)
            .finish()
    }
}

impl ChatAgent {
    pub fn new(
        name: impl Into<String>,
        backstory: impl Into<String>,
        spec: ModelSpec,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            backstory: backstory.into(),
            base_context: PromptContext::new(),
            spec,
            client,
        }
    }

    pub fn with_context(mut self, context: PromptContext) -> Self {
        self.base_context = context;
        self
    }

    pub fn backstory(&self) -> &str {
        &self.backstory
    }

    /// Request body for one rendered prompt.
    pub fn request_body(&self, system: &str, user: &str) -> Value {
        json!({
            "model": self.spec.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "max_tokens": self.spec.max_tokens,
            "temperature": self.spec.temperature,
        })
    }
}

/// First choice's message content.
pub fn completion_text(response: &Value) -> Option<&str> {
    response["choices"][0]["message"]["content"].as_str()
}

#[async_trait]
impl Agent for ChatAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        prompt: &str,
        context: &PromptContext,
    ) -> Result<String, AgentResponseError> {
        let context = self.base_context.merged(context);
        let system = context.render(&self.backstory);
        let user = context.render(prompt);
        debug!(agent = %self.name, prompt = %user, "Calling chat model");

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.spec.url.trim_end_matches('/')))
            .header("Content-Type", "application/json")
            .json(&self.request_body(&system, &user));
        if let Some(key) = &self.spec.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentResponseError::request(&self.name, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentResponseError::request(
                &self.name,
                format!("chat API error ({status}): {body}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentResponseError::request(&self.name, e.to_string()))?;

        let text = completion_text(&body).unwrap_or("").to_string();
        debug!(agent = %self.name, answer = %text, "Chat model answered");
        Ok(text)
    }
}

/// Builds the crew for one post.
#[cfg_attr(test, mockall::automock)]
pub trait AgentSource: Send + Sync {
    fn manager(&self) -> SharedAgent;
    fn critic(&self) -> SharedAgent;
    fn interest(&self, interest: &str, story: &str) -> SharedAgent;
}

/// Assemble a crew for `interests`, skipping names missing from the catalog.
/// Interests with alternative stories get one picked at random.
pub fn build_crew<R: Rng + ?Sized>(
    source: &dyn AgentSource,
    catalog: &InterestCatalog,
    interests: &[String],
    timeout: Duration,
    rng: &mut R,
) -> Crew {
    let members = interests
        .iter()
        .filter_map(|name| {
            let story = catalog.pick_story(name, rng)?;
            Some((name.clone(), source.interest(name, story)))
        })
        .collect();
    Crew::new(source.manager(), source.critic(), members).with_timeout(timeout)
}

/// HTTP agents for every role, sharing one client.
pub struct AgentFactory {
    client: reqwest::Client,
    manager: ModelSpec,
    creative: ModelSpec,
    backstories: Backstories,
}

impl AgentFactory {
    pub fn new(llm: &LlmSettings, backstories: &Backstories) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()
            .context("Failed to build chat HTTP client")?;

        let spec = |model: &str, temperature: f32| ModelSpec {
            url: llm.url.clone(),
            api_key: llm.api_key.clone(),
            model: model.to_string(),
            temperature,
            max_tokens: llm.max_tokens,
        };

        Ok(Self {
            manager: spec(&llm.manager_model, llm.manager_temperature),
            creative: spec(&llm.creative_model, llm.creative_temperature),
            client,
            backstories: backstories.clone(),
        })
    }
}

impl AgentSource for AgentFactory {
    fn manager(&self) -> SharedAgent {
        Arc::new(ChatAgent::new(
            MANAGER_NAME,
            &self.backstories.social_media_manager,
            self.manager.clone(),
            self.client.clone(),
        ))
    }

    fn critic(&self) -> SharedAgent {
        Arc::new(ChatAgent::new(
            CRITIC_NAME,
            &self.backstories.art_critic,
            self.creative.clone(),
            self.client.clone(),
        ))
    }

    fn interest(&self, interest: &str, story: &str) -> SharedAgent {
        Arc::new(
            ChatAgent::new(
                format!("{interest} scientist"),
                format!("{} {story}", self.backstories.interest_scientist),
                self.creative.clone(),
                self.client.clone(),
            )
            .with_context(PromptContext::new().with("interest", interest)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interests::InterestEntry;
    use feed_coordination::fakes::ScriptedAgent;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn spec() -> ModelSpec {
        ModelSpec {
            url: "http://localhost:9/v1".into(),
            api_key: None,
            model: "creative".into(),
            temperature: 0.9,
            max_tokens: 256,
        }
    }

    #[test]
    fn test_request_body_shape() {
        let agent = ChatAgent::new("critic", "You judge art.", spec(), reqwest::Client::new());
        let body = agent.request_body("system text", "user text");
        assert_eq!(body["model"], "creative");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user text");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn test_completion_text() {
        let response = json!({"choices": [{"message": {"content": "Hello"}}]});
        assert_eq!(completion_text(&response), Some("Hello"));
        assert_eq!(completion_text(&json!({"choices": []})), None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let agent = ChatAgent::new("critic", "You judge art.", spec(), reqwest::Client::new());
        let err = agent.call("Hi", &PromptContext::new()).await.unwrap_err();
        assert!(matches!(err, AgentResponseError::RequestFailed { .. }));
    }

    #[test]
    fn test_factory_names_agents() {
        let factory = AgentFactory::new(&LlmSettings::default(), &Backstories::default()).unwrap();
        assert_eq!(factory.manager().name(), MANAGER_NAME);
        assert_eq!(factory.critic().name(), CRITIC_NAME);
        assert_eq!(factory.interest("boats", "Boats!").name(), "boats scientist");
    }

    #[test]
    fn test_build_crew_skips_unknown_interests() {
        let mut source = MockAgentSource::new();
        source
            .expect_manager()
            .returning(|| Arc::new(ScriptedAgent::always("manager", "ok")));
        source
            .expect_critic()
            .returning(|| Arc::new(ScriptedAgent::always("critic", "ok")));
        source
            .expect_interest()
            .times(1)
            .returning(|name, _| Arc::new(ScriptedAgent::always(&format!("{name} scientist"), "ok")));

        let mut catalog = InterestCatalog::new();
        catalog.insert("boats", InterestEntry::Simple("Boats.".into()));

        let crew = build_crew(
            &source,
            &catalog,
            &["boats".to_string(), "unknown".to_string()],
            Duration::from_secs(5),
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(crew.interest_names(), vec!["boats"]);
    }

    #[test]
    fn test_build_crew_picks_one_alternative_story() {
        let mut source = MockAgentSource::new();
        source
            .expect_manager()
            .returning(|| Arc::new(ScriptedAgent::always("manager", "ok")));
        source
            .expect_critic()
            .returning(|| Arc::new(ScriptedAgent::always("critic", "ok")));
        source
            .expect_interest()
            .withf(|name, story| name == "painting" && story.starts_with("You love "))
            .times(1)
            .returning(|name, _| Arc::new(ScriptedAgent::always(&format!("{name} scientist"), "ok")));

        let mut catalog = InterestCatalog::new();
        catalog.insert(
            "painting",
            InterestEntry::Alternatives(vec![
                "You love oil paint.".into(),
                "You love watercolor.".into(),
            ]),
        );

        let crew = build_crew(
            &source,
            &catalog,
            &["painting".to_string()],
            Duration::from_secs(5),
            &mut StdRng::seed_from_u64(2),
        );
        assert_eq!(crew.interest_names(), vec!["painting"]);
    }
}
