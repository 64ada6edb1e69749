//! The agents working on one post.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::panel::{Panel, SharedAgent, DEFAULT_AGENT_TIMEOUT};

/// Manager, critic, and one agent per selected interest.
#[derive(Clone)]
pub struct Crew {
    manager: SharedAgent,
    critic: SharedAgent,
    interests: Vec<(String, SharedAgent)>,
    timeout: Duration,
}

impl std::fmt::Debug for Crew {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crew")
            .field("manager", &self.manager.name())
            .field("critic", &self.critic.name())
            .field("interests", &self.interest_names())
            .finish()
    }
}

impl Crew {
    pub fn new(
        manager: SharedAgent,
        critic: SharedAgent,
        interests: Vec<(String, SharedAgent)>,
    ) -> Self {
        Self {
            manager,
            critic,
            interests,
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn manager(&self) -> &SharedAgent {
        &self.manager
    }

    pub fn critic(&self) -> &SharedAgent {
        &self.critic
    }

    /// (interest, agent) pairs in selection order.
    pub fn interests(&self) -> &[(String, SharedAgent)] {
        &self.interests
    }

    pub fn interest_names(&self) -> Vec<&str> {
        self.interests.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn random_interest<R: Rng>(&self, rng: &mut R) -> Option<&SharedAgent> {
        self.interests.choose(rng).map(|(_, agent)| agent)
    }

    pub fn interest_panel(&self) -> Panel {
        let members = self.interests.iter().map(|(_, a)| a.clone()).collect();
        Panel::new("interests", members).with_timeout(self.timeout)
    }

    /// The critic followed by every interest agent.
    pub fn critic_panel(&self) -> Panel {
        let mut members = vec![self.critic.clone()];
        members.extend(self.interests.iter().map(|(_, a)| a.clone()));
        Panel::new("critics", members).with_timeout(self.timeout)
    }

    /// Single-member panel for one-off questions.
    pub fn solo(&self, agent: &SharedAgent) -> Panel {
        Panel::new(agent.name(), vec![agent.clone()]).with_timeout(self.timeout)
    }
}
