//! Cross-run state: a small persisted map evolved between posts.
//!
//! # Architecture
//!
//! - `middleware.rs`: the `StateMiddleware` trait, the ordered
//!   `MiddlewareChain`, and `StatusFilter`.
//! - `logic.rs`: conditional, probabilistic patch rules.
//! - `markov.rs`: per-category Markov sampling.
//! - `store.rs`: JSON file persistence with init-on-first-load.
//!
//! # Usage
//!
//! ```ignore
//! use feed_coordination::state::{MarkovMiddleware, MiddlewareChain, StateStatus, StateStore};
//!
//! let chain = MiddlewareChain::new(vec![Box::new(MarkovMiddleware::seeded(&table, 7)?)]);
//! let mut store = StateStore::open("posts/state.json", chain)?;
//! store.update(StateStatus::Approved, Some(&post))?;
//! ```

pub mod logic;
pub mod markov;
pub mod middleware;
pub mod store;

pub use logic::{LogicMiddleware, LogicRule, RuleError};
pub use markov::{MarkovChain, MarkovError, MarkovMiddleware, MarkovTransitionTable, WILDCARD};
pub use middleware::{
    MiddlewareChain, MiddlewareError, StateDict, StateMiddleware, StateStatus, StatusFilter,
};
pub use store::{save_state, PersistenceError, PersistenceResult, StateStore};
