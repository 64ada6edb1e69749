//! Markov middleware: samples the next value of each state category.
//!
//! The table maps `category -> current value -> next value -> weight`.
//! Within a row, a `*` next value spreads its weight over every value the
//! row does not name. A `*` row supplies the weights used when the category
//! has no current value; without one the first value is drawn uniformly.

use std::collections::BTreeMap;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{info, warn};

use super::middleware::{MiddlewareError, StateDict, StateMiddleware, StateStatus};
use crate::production::PostRecord;

pub const WILDCARD: &str = "*";

/// Raw weights as configured.
pub type MarkovTransitionTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarkovError {
    #[error("Category '{category}' has no values")]
    EmptyCategory { category: String },

    #[error("Category '{category}', row '{from}': unknown next value '{to}'")]
    UnknownValue {
        category: String,
        from: String,
        to: String,
    },

    #[error("Category '{category}', row '{from}': weight {weight} is negative or not finite")]
    InvalidWeight {
        category: String,
        from: String,
        weight: f64,
    },

    #[error("Category '{category}', row '{from}': weights sum to zero")]
    ZeroTotal { category: String, from: String },
}

/// One normalised row: next values and their probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRow {
    pub values: Vec<String>,
    pub probabilities: Vec<f64>,
}

impl TransitionRow {
    fn sample(&self, rng: &mut StdRng) -> Option<&str> {
        let dist = WeightedIndex::new(&self.probabilities).ok()?;
        self.values.get(dist.sample(rng)).map(String::as_str)
    }

    pub fn probability_of(&self, value: &str) -> f64 {
        self.values
            .iter()
            .position(|v| v == value)
            .map(|i| self.probabilities[i])
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
struct CategoryChain {
    values: Vec<String>,
    rows: BTreeMap<String, TransitionRow>,
    init: TransitionRow,
}

/// Validated, normalised transition table.
#[derive(Debug, Clone)]
pub struct MarkovChain {
    categories: BTreeMap<String, CategoryChain>,
}

impl MarkovChain {
    pub fn new(table: &MarkovTransitionTable) -> Result<Self, MarkovError> {
        let mut categories = BTreeMap::new();

        for (category, rows) in table {
            let values: Vec<String> = rows.keys().filter(|k| *k != WILDCARD).cloned().collect();
            if values.is_empty() {
                return Err(MarkovError::EmptyCategory {
                    category: category.clone(),
                });
            }

            let mut normalised = BTreeMap::new();
            for (from, edges) in rows {
                let row = normalise_row(category, from, edges, &values)?;
                normalised.insert(from.clone(), row);
            }

            let init = normalised.remove(WILDCARD).unwrap_or_else(|| TransitionRow {
                values: values.clone(),
                probabilities: vec![1.0 / values.len() as f64; values.len()],
            });

            categories.insert(
                category.clone(),
                CategoryChain {
                    values,
                    rows: normalised,
                    init,
                },
            );
        }

        Ok(Self { categories })
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn values(&self, category: &str) -> Option<&[String]> {
        self.categories.get(category).map(|c| c.values.as_slice())
    }

    /// Normalised row for `current`, or the init row when `current` is `None`.
    pub fn row(&self, category: &str, current: Option<&str>) -> Option<&TransitionRow> {
        let chain = self.categories.get(category)?;
        match current {
            Some(value) => chain.rows.get(value),
            None => Some(&chain.init),
        }
    }

    /// Draw the next value for one category.
    ///
    /// An unknown current value is treated as missing.
    pub fn next_value(
        &self,
        category: &str,
        current: Option<&str>,
        rng: &mut StdRng,
    ) -> Option<String> {
        let chain = self.categories.get(category)?;
        let row = match current {
            Some(value) => match chain.rows.get(value) {
                Some(row) => row,
                None => {
                    warn!(category, value, "Unknown current value, using init weights");
                    &chain.init
                }
            },
            None => &chain.init,
        };
        row.sample(rng).map(String::from)
    }
}

fn normalise_row(
    category: &str,
    from: &str,
    edges: &BTreeMap<String, f64>,
    values: &[String],
) -> Result<TransitionRow, MarkovError> {
    let mut weights: BTreeMap<&str, f64> = BTreeMap::new();

    for (to, weight) in edges {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(MarkovError::InvalidWeight {
                category: category.to_string(),
                from: from.to_string(),
                weight: *weight,
            });
        }
        if to == WILDCARD {
            continue;
        }
        if !values.contains(to) {
            return Err(MarkovError::UnknownValue {
                category: category.to_string(),
                from: from.to_string(),
                to: to.clone(),
            });
        }
        weights.insert(to, *weight);
    }

    if let Some(fill) = edges.get(WILDCARD) {
        for value in values {
            weights.entry(value.as_str()).or_insert(*fill);
        }
    }

    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        return Err(MarkovError::ZeroTotal {
            category: category.to_string(),
            from: from.to_string(),
        });
    }

    // Keep the category's value order so sampling is reproducible.
    let (values, probabilities) = values
        .iter()
        .filter_map(|v| weights.get(v.as_str()).map(|w| (v.clone(), w / total)))
        .unzip();

    Ok(TransitionRow {
        values,
        probabilities,
    })
}

/// Resamples every category on `approved` and `init`.
pub struct MarkovMiddleware {
    chain: MarkovChain,
    rng: StdRng,
}

impl MarkovMiddleware {
    pub fn new(table: &MarkovTransitionTable, rng: StdRng) -> Result<Self, MarkovError> {
        Ok(Self {
            chain: MarkovChain::new(table)?,
            rng,
        })
    }

    pub fn seeded(table: &MarkovTransitionTable, seed: u64) -> Result<Self, MarkovError> {
        Self::new(table, StdRng::seed_from_u64(seed))
    }

    pub fn chain(&self) -> &MarkovChain {
        &self.chain
    }
}

impl StateMiddleware for MarkovMiddleware {
    fn name(&self) -> &str {
        "markov"
    }

    fn apply(
        &mut self,
        status: StateStatus,
        _post: Option<&PostRecord>,
        state: &StateDict,
    ) -> Result<StateDict, MiddlewareError> {
        let mut state = state.clone();
        if !matches!(status, StateStatus::Approved | StateStatus::Init) {
            return Ok(state);
        }

        for category in self.chain.categories.keys() {
            let current = state.get(category).map(String::as_str);
            if let Some(next) = self.chain.next_value(category, current, &mut self.rng) {
                info!(category = %category, from = ?current, to = %next, "Markov transition");
                state.insert(category.clone(), next);
            }
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(yaml: &[(&str, &str, &[(&str, f64)])]) -> MarkovTransitionTable {
        let mut table = MarkovTransitionTable::new();
        for (category, from, edges) in yaml {
            table
                .entry(category.to_string())
                .or_default()
                .insert(
                    from.to_string(),
                    edges.iter().map(|(k, w)| (k.to_string(), *w)).collect(),
                );
        }
        table
    }

    fn mood_table() -> MarkovTransitionTable {
        table(&[
            ("mood", "happy", &[("happy", 1.0), ("sad", 3.0)]),
            ("mood", "sad", &[("happy", 1.0)]),
        ])
    }

    #[test]
    fn test_rows_are_normalised() {
        let chain = MarkovChain::new(&mood_table()).unwrap();
        let row = chain.row("mood", Some("happy")).unwrap();
        let total: f64 = row.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((row.probability_of("sad") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_sampling_converges_to_weights() {
        let mut mw = MarkovMiddleware::seeded(&mood_table(), 42).unwrap();
        let mut current = StateDict::new();
        current.insert("mood".into(), "happy".into());

        let draws = 10_000;
        let mut sad = 0;
        for _ in 0..draws {
            let next = mw.apply(StateStatus::Approved, None, &current).unwrap();
            if next["mood"] == "sad" {
                sad += 1;
            }
        }
        let ratio = sad as f64 / draws as f64;
        assert!((ratio - 0.75).abs() < 0.02, "sad ratio was {ratio}");
    }

    #[test]
    fn test_same_seed_same_samples() {
        let mut a = MarkovMiddleware::seeded(&mood_table(), 9).unwrap();
        let mut b = MarkovMiddleware::seeded(&mood_table(), 9).unwrap();
        let mut state_a = StateDict::new();
        let mut state_b = StateDict::new();
        for _ in 0..50 {
            state_a = a.apply(StateStatus::Approved, None, &state_a).unwrap();
            state_b = b.apply(StateStatus::Approved, None, &state_b).unwrap();
            assert_eq!(state_a, state_b);
        }
    }

    #[test]
    fn test_wildcard_fills_remaining_values() {
        let t = table(&[
            ("season", "spring", &[("summer", 2.0), ("*", 1.0)]),
            ("season", "summer", &[("*", 1.0)]),
            ("season", "winter", &[("spring", 1.0)]),
        ]);
        let chain = MarkovChain::new(&t).unwrap();
        let row = chain.row("season", Some("spring")).unwrap();
        assert!((row.probability_of("summer") - 0.5).abs() < 1e-9);
        assert!((row.probability_of("spring") - 0.25).abs() < 1e-9);
        assert!((row.probability_of("winter") - 0.25).abs() < 1e-9);
        assert_eq!(chain.values("season").unwrap().len(), 3);
    }

    #[test]
    fn test_init_uses_wildcard_row() {
        let t = table(&[
            ("mood", "*", &[("calm", 1.0)]),
            ("mood", "calm", &[("calm", 1.0)]),
            ("mood", "wild", &[("calm", 1.0)]),
        ]);
        let mut mw = MarkovMiddleware::seeded(&t, 0).unwrap();
        let state = mw.apply(StateStatus::Init, None, &StateDict::new()).unwrap();
        assert_eq!(state["mood"], "calm");
    }

    #[test]
    fn test_rejected_status_leaves_state() {
        let mut mw = MarkovMiddleware::seeded(&mood_table(), 0).unwrap();
        let state = mw.apply(StateStatus::Rejected, None, &StateDict::new()).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_invalid_tables_rejected() {
        let zero = table(&[("mood", "happy", &[("happy", 0.0)])]);
        assert!(matches!(
            MarkovChain::new(&zero),
            Err(MarkovError::ZeroTotal { .. })
        ));

        let unknown = table(&[("mood", "happy", &[("angry", 1.0)])]);
        assert!(matches!(
            MarkovChain::new(&unknown),
            Err(MarkovError::UnknownValue { .. })
        ));

        let negative = table(&[("mood", "happy", &[("happy", -1.0)])]);
        assert!(matches!(
            MarkovChain::new(&negative),
            Err(MarkovError::InvalidWeight { .. })
        ));
    }
}
