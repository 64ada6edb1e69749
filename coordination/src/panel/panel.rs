//! Panel: a fixed set of agents queried with the same prompt.
//!
//! Members are queried concurrently, each under its own timeout. The panel
//! waits for every member before returning; failed or unparseable answers
//! are logged and excluded rather than propagated.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use super::agent::{AgentResponseError, PromptContext, SharedAgent};

/// Default per-agent timeout for one panel query.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Answers collected from one panel round.
#[derive(Debug)]
pub struct PanelResponses<T> {
    /// Parsed answers in member order: (agent name, value).
    pub answers: Vec<(String, T)>,
    /// Members whose answer was excluded.
    pub failures: Vec<AgentResponseError>,
}

impl<T> PanelResponses<T> {
    /// Number of members that produced a usable answer.
    pub fn responded(&self) -> usize {
        self.answers.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.answers.iter().map(|(_, v)| v)
    }
}

/// A named group of agents.
#[derive(Clone)]
pub struct Panel {
    name: String,
    members: Vec<SharedAgent>,
    timeout: Duration,
}

impl std::fmt::Debug for Panel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Panel")
            .field("name", &self.name)
            .field(
                "members",
                &self.members.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Panel {
    pub fn new(name: impl Into<String>, members: Vec<SharedAgent>) -> Self {
        Self {
            name: name.into(),
            members,
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    /// Override the per-agent timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[SharedAgent] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Query a single agent under the panel timeout.
    pub async fn ask(
        &self,
        agent: &SharedAgent,
        prompt: &str,
        context: &PromptContext,
    ) -> Result<String, AgentResponseError> {
        match tokio::time::timeout(self.timeout, agent.call(prompt, context)).await {
            Ok(Ok(text)) if text.trim().is_empty() => Err(AgentResponseError::Empty {
                agent: agent.name().to_string(),
            }),
            Ok(result) => result,
            Err(_) => Err(AgentResponseError::Timeout {
                agent: agent.name().to_string(),
                after: self.timeout,
            }),
        }
    }

    /// Query a single agent and parse its answer.
    pub async fn ask_parsed<T, F>(
        &self,
        agent: &SharedAgent,
        prompt: &str,
        context: &PromptContext,
        parser: &F,
    ) -> Result<T, AgentResponseError>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let text = self.ask(agent, prompt, context).await?;
        parser(&text).map_err(|reason| AgentResponseError::Unparseable {
            agent: agent.name().to_string(),
            reason,
            text,
        })
    }

    /// Query every member with the same prompt and context.
    pub async fn sample<T, F>(
        &self,
        prompt: &str,
        context: &PromptContext,
        parser: F,
    ) -> PanelResponses<T>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let parser = &parser;
        let calls = self.members.iter().map(|agent| async move {
            let result = self.ask_parsed(agent, prompt, context, parser).await;
            (agent.name().to_string(), result)
        });

        let mut responses = PanelResponses {
            answers: Vec::with_capacity(self.members.len()),
            failures: Vec::new(),
        };

        for (name, result) in join_all(calls).await {
            match result {
                Ok(value) => {
                    debug!(panel = %self.name, agent = %name, "Panel member answered");
                    responses.answers.push((name, value));
                }
                Err(e) => {
                    warn!(panel = %self.name, agent = %name, error = %e, "Panel member excluded");
                    responses.failures.push(e);
                }
            }
        }

        responses
    }
}
