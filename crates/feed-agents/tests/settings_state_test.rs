//! Settings and state registry integration tests.
//!
//! Tests verify:
//! - The shipped demo settings load and validate
//! - The configured middleware chain initializes and evolves the state file
//! - Seeded chains are reproducible

use std::path::{Path, PathBuf};

use feed_agents::config::{PublishTarget, Settings};
use feed_agents::registry::{build_chain, open_store};
use feed_coordination::production::CritiqueMode;
use feed_coordination::state::{StateDict, StateStatus};

fn demo_settings() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/feedme.yaml")
}

fn load_demo(root: &Path) -> Settings {
    let mut settings = Settings::load(&demo_settings()).unwrap();
    settings.root = root.to_path_buf();
    settings
}

#[test]
fn test_demo_settings_load() {
    let settings = Settings::load(&demo_settings()).unwrap();
    assert_eq!(settings.posts.formats, vec!["photo", "painting", "poster"]);
    assert_eq!(settings.production.critique_mode, CritiqueMode::Binary);
    assert_eq!(settings.publish, PublishTarget::Html);
    assert_eq!(settings.interests.len(), 5);
    assert_eq!(settings.interests.categories()["nature"], vec!["birds", "trees"]);
    assert_eq!(settings.interests.categories()["general"], vec!["boats", "painting"]);
    assert_eq!(settings.interests.get("painting").unwrap().stories.len(), 2);
    assert_eq!(settings.state.middleware, vec!["markov", "rules"]);
}

#[test]
fn test_demo_state_initializes_within_table() {
    let root = tempfile::tempdir().unwrap();
    let settings = load_demo(root.path());

    let store = open_store(&settings).unwrap().unwrap();
    let state = store.state();
    assert!(["sunny", "cloudy"].contains(&state["weather"].as_str()));
    assert!(["spring", "summer", "autumn", "winter"].contains(&state["season"].as_str()));
    assert!(root.path().join("state.json").exists());
}

#[test]
fn test_demo_state_evolves_and_reloads() {
    let root = tempfile::tempdir().unwrap();
    let settings = load_demo(root.path());

    let mut store = open_store(&settings).unwrap().unwrap();
    for _ in 0..10 {
        let state = store.update(StateStatus::Approved, None).unwrap().clone();
        if state["weather"] == "rainy" {
            assert_eq!(state.get("props").map(String::as_str), Some("umbrella"));
        }
        if state["weather"] == "sunny" {
            assert!(!state.contains_key("props"));
        }
    }
    let last = store.state().clone();

    let reopened = open_store(&settings).unwrap().unwrap();
    assert_eq!(reopened.state(), &last);
}

#[test]
fn test_seeded_chains_agree() {
    let root = tempfile::tempdir().unwrap();
    let settings = load_demo(root.path());

    let run = || {
        let mut chain = build_chain(&settings.state, Some(99)).unwrap();
        let mut state = chain.apply(StateStatus::Init, None, StateDict::new());
        for _ in 0..5 {
            state = chain.apply(StateStatus::Approved, None, state);
        }
        state
    };
    assert_eq!(run(), run());
}

#[test]
fn test_rejections_leave_markov_state() {
    let root = tempfile::tempdir().unwrap();
    let settings = load_demo(root.path());

    let mut store = open_store(&settings).unwrap().unwrap();
    let before = store.state().clone();
    let after = store.update(StateStatus::Rejected, None).unwrap();
    assert_eq!(after["weather"], before["weather"]);
    assert_eq!(after["season"], before["season"]);
}
