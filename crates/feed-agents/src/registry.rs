//! Builds the state middleware chain from settings.

use anyhow::{bail, Context, Result};
use feed_coordination::state::{
    LogicMiddleware, MarkovMiddleware, MiddlewareChain, StateMiddleware, StateStatus, StateStore,
    StatusFilter,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::{Settings, StateSettings};

fn rng_for(seed: Option<u64>, index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
        None => StdRng::from_entropy(),
    }
}

fn filtered(statuses: &[StateStatus], middleware: Box<dyn StateMiddleware>) -> Box<dyn StateMiddleware> {
    if statuses.is_empty() {
        middleware
    } else {
        Box::new(StatusFilter::new(statuses.to_vec(), middleware))
    }
}

/// Middlewares in configured order, each behind a status filter when one is set.
///
/// With a seed, every middleware gets its own deterministic RNG stream.
pub fn build_chain(settings: &StateSettings, seed: Option<u64>) -> Result<MiddlewareChain> {
    let mut chain = MiddlewareChain::default();
    for (index, name) in settings.middleware.iter().enumerate() {
        let rng = rng_for(seed, index);
        let middleware: Box<dyn StateMiddleware> = match name.as_str() {
            "rules" => filtered(
                &settings.rules.statuses,
                Box::new(
                    LogicMiddleware::new(settings.rules.rules.clone(), rng)
                        .context("Invalid state rules")?,
                ),
            ),
            "markov" => filtered(
                &settings.markov.statuses,
                Box::new(
                    MarkovMiddleware::new(&settings.markov.table, rng)
                        .context("Invalid Markov transition table")?,
                ),
            ),
            other => bail!("Unknown state middleware: {other}"),
        };
        chain.push(middleware);
    }
    Ok(chain)
}

/// The persisted state store, or `None` when state is disabled.
pub fn open_store(settings: &Settings) -> Result<Option<StateStore>> {
    if !settings.state.enabled {
        return Ok(None);
    }
    let chain = build_chain(&settings.state, settings.seed)?;
    let path = settings.state_path();
    info!(path = %path.display(), middlewares = ?chain.names(), "Opening state");
    let store = StateStore::open(&path, chain)
        .with_context(|| format!("Failed to open state at {}", path.display()))?;
    Ok(Some(store))
}
