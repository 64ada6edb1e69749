//! Cross-run state tests: middleware chains over a file-backed store.
//!
//! Tests verify:
//! - A missing state file is initialised through the chain and persisted
//! - An existing state file is loaded, not re-initialised
//! - Status filters gate which middlewares see an update
//! - Markov draws stay inside each category's value set

use std::collections::BTreeMap;

use feed_coordination::production::PostRecord;
use feed_coordination::state::{
    LogicMiddleware, LogicRule, MarkovMiddleware, MarkovTransitionTable, MiddlewareChain,
    StateDict, StateMiddleware, StateStatus, StateStore, StatusFilter,
};

fn weather_table() -> MarkovTransitionTable {
    let mut rows = BTreeMap::new();
    rows.insert(
        "*".to_string(),
        BTreeMap::from([("sunny".to_string(), 1.0)]),
    );
    rows.insert(
        "sunny".to_string(),
        BTreeMap::from([("sunny".to_string(), 1.0), ("rainy".to_string(), 3.0)]),
    );
    rows.insert(
        "rainy".to_string(),
        BTreeMap::from([("*".to_string(), 1.0)]),
    );
    BTreeMap::from([("weather".to_string(), rows)])
}

fn chain() -> MiddlewareChain {
    let markov: Box<dyn StateMiddleware> =
        Box::new(MarkovMiddleware::seeded(&weather_table(), 11).unwrap());
    let umbrella = LogicRule::new(StateDict::from([("weather".to_string(), "rainy".to_string())]))
        .with_set("props", "umbrella");
    let dry = LogicRule::new(StateDict::from([("weather".to_string(), "sunny".to_string())]))
        .with_remove("props");
    let rules: Box<dyn StateMiddleware> = Box::new(StatusFilter::new(
        vec![StateStatus::Init, StateStatus::Approved, StateStatus::Rejected],
        Box::new(LogicMiddleware::seeded(vec![umbrella, dry], 5).unwrap()),
    ));
    MiddlewareChain::new(vec![markov, rules])
}

fn post() -> PostRecord {
    PostRecord::new("Harbor", "Fog.", vec!["a.png".into()], "fog")
}

#[test]
fn test_open_initialises_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let store = StateStore::open(&path, chain()).unwrap();
    // The init row only allows "sunny".
    assert_eq!(store.state().get("weather").map(String::as_str), Some("sunny"));
    assert!(store.state().get("props").is_none());

    let saved: StateDict =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(&saved, store.state());
}

#[test]
fn test_existing_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, r#"{"weather": "rainy", "props": "umbrella"}"#).unwrap();

    let store = StateStore::open(&path, chain()).unwrap();
    assert_eq!(store.state().get("weather").map(String::as_str), Some("rainy"));
    assert_eq!(store.state().get("props").map(String::as_str), Some("umbrella"));
}

#[test]
fn test_rejection_keeps_markov_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, r#"{"weather": "rainy"}"#).unwrap();

    let mut store = StateStore::open(&path, chain()).unwrap();
    let state = store.update(StateStatus::Rejected, Some(&post())).unwrap();

    // Markov ignores rejections; the rule still fires on the unchanged value.
    assert_eq!(state.get("weather").map(String::as_str), Some("rainy"));
    assert_eq!(state.get("props").map(String::as_str), Some("umbrella"));
}

#[test]
fn test_approved_updates_stay_in_value_set() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open(dir.path().join("state.json"), chain()).unwrap();

    for _ in 0..50 {
        let state = store.update(StateStatus::Approved, Some(&post())).unwrap().clone();
        let weather = state.get("weather").map(String::as_str);
        assert!(matches!(weather, Some("sunny") | Some("rainy")));
        match weather {
            Some("rainy") => assert_eq!(state.get("props").map(String::as_str), Some("umbrella")),
            _ => assert!(state.get("props").is_none()),
        }
    }
}

#[test]
fn test_corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "not json").unwrap();

    assert!(StateStore::open(&path, chain()).is_err());
}
