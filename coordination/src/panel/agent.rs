//! Agent abstraction and prompt context.
//!
//! An agent is an opaque text-generation collaborator: given a prompt
//! template and a context, it returns free text. Concrete HTTP-backed
//! agents live in the application crate; tests use scripted agents.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error from a single agent call. Always absorbed at the panel boundary.
#[derive(Debug, thiserror::Error)]
pub enum AgentResponseError {
    #[error("Agent {agent} request failed: {reason}")]
    RequestFailed { agent: String, reason: String },

    #[error("Agent {agent} timed out after {after:?}")]
    Timeout { agent: String, after: Duration },

    #[error("Agent {agent} answer could not be parsed: {reason} (text: {text})")]
    Unparseable {
        agent: String,
        reason: String,
        text: String,
    },

    #[error("Agent {agent} returned an empty answer")]
    Empty { agent: String },
}

impl AgentResponseError {
    /// Build a request failure for the named agent.
    pub fn request(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RequestFailed {
            agent: agent.into(),
            reason: reason.into(),
        }
    }

    /// Name of the agent that failed.
    pub fn agent(&self) -> &str {
        match self {
            Self::RequestFailed { agent, .. }
            | Self::Timeout { agent, .. }
            | Self::Unparseable { agent, .. }
            | Self::Empty { agent } => agent,
        }
    }
}

/// Trait for panel members.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier of this agent within a panel.
    fn name(&self) -> &str;

    /// Render `prompt` with `context` and return the agent's raw answer.
    async fn call(&self, prompt: &str, context: &PromptContext)
        -> Result<String, AgentResponseError>;
}

/// Shared reference to an agent.
pub type SharedAgent = Arc<dyn Agent>;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("PLACEHOLDER_RE regex should compile")
});

/// Key→value context used to fill `{placeholder}` slots in prompt templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptContext(Map<String, Value>);

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String view of a value, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Copy every entry of `other` over this context.
    pub fn merge(&mut self, other: &PromptContext) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Return a copy of this context with `other` merged on top.
    pub fn merged(&self, other: &PromptContext) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fill `{key}` placeholders. Unknown placeholders are left verbatim.
    pub fn render(&self, template: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &regex::Captures<'_>| {
                match self.0.get(&caps[1]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for PromptContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = Self::new();
        for (key, value) in iter {
            context.insert(key, value);
        }
        context
    }
}
