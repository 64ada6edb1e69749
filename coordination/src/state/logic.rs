//! Rule middleware: probabilistic conditional patches to the state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::middleware::{MiddlewareError, StateDict, StateMiddleware, StateStatus};
use crate::production::PostRecord;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleError {
    #[error("Rule {index} has chance {chance}, expected a value in [0, 1]")]
    ChanceOutOfRange { index: usize, chance: f64 },
}

/// One conditional patch.
///
/// Fires when every `match` pair is present in the state and a random draw
/// passes `chance`; then merges `set` and deletes each key in `remove`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicRule {
    #[serde(rename = "match", default)]
    pub matches: StateDict,
    #[serde(default = "default_chance")]
    pub chance: f64,
    #[serde(default)]
    pub set: StateDict,
    #[serde(default)]
    pub remove: Vec<String>,
}

fn default_chance() -> f64 {
    1.0
}

impl LogicRule {
    pub fn new(matches: StateDict) -> Self {
        Self {
            matches,
            chance: 1.0,
            set: StateDict::new(),
            remove: Vec::new(),
        }
    }

    pub fn with_chance(mut self, chance: f64) -> Self {
        self.chance = chance;
        self
    }

    pub fn with_set(mut self, key: &str, value: &str) -> Self {
        self.set.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_remove(mut self, key: &str) -> Self {
        self.remove.push(key.to_string());
        self
    }

    /// Whether every `match` pair appears in `state`.
    pub fn matches(&self, state: &StateDict) -> bool {
        self.matches
            .iter()
            .all(|(key, value)| state.get(key) == Some(value))
    }
}

/// Applies an ordered rule list; later rules see earlier rules' effects.
pub struct LogicMiddleware {
    rules: Vec<LogicRule>,
    rng: StdRng,
}

impl LogicMiddleware {
    /// Validates every rule's `chance`.
    pub fn new(rules: Vec<LogicRule>, rng: StdRng) -> Result<Self, RuleError> {
        for (index, rule) in rules.iter().enumerate() {
            if !(0.0..=1.0).contains(&rule.chance) {
                return Err(RuleError::ChanceOutOfRange {
                    index,
                    chance: rule.chance,
                });
            }
        }
        Ok(Self { rules, rng })
    }

    pub fn seeded(rules: Vec<LogicRule>, seed: u64) -> Result<Self, RuleError> {
        Self::new(rules, StdRng::seed_from_u64(seed))
    }

    pub fn rules(&self) -> &[LogicRule] {
        &self.rules
    }
}

impl StateMiddleware for LogicMiddleware {
    fn name(&self) -> &str {
        "rules"
    }

    fn apply(
        &mut self,
        _status: StateStatus,
        _post: Option<&PostRecord>,
        state: &StateDict,
    ) -> Result<StateDict, MiddlewareError> {
        let mut state = state.clone();

        for rule in &self.rules {
            if !rule.matches(&state) {
                continue;
            }
            if !self.rng.gen_bool(rule.chance) {
                debug!(matches = ?rule.matches, chance = rule.chance, "Rule skipped by chance");
                continue;
            }

            info!(matches = ?rule.matches, set = ?rule.set, remove = ?rule.remove, "Rule fired");
            state.extend(rule.set.iter().map(|(k, v)| (k.clone(), v.clone())));
            for key in &rule.remove {
                state.remove(key);
            }
        }

        Ok(state)
    }
}
