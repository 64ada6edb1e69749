//! Runtime for the agent-driven post feed.
//!
//! Wires the deterministic core in `feed_coordination` to real
//! collaborators: chat agents over an OpenAI-compatible API, an ONNX web UI
//! image backend, an HTML publisher, and YAML settings. The batch
//! orchestrator turns interests into themes and themes into posts.

pub mod agents;
pub mod collaborators;
pub mod config;
pub mod interests;
pub mod orchestrator;
pub mod registry;
pub mod telemetry;

pub use agents::{build_crew, AgentFactory, AgentSource, ChatAgent};
pub use config::Settings;
pub use interests::{Interest, InterestCatalog, InterestEntry};
pub use orchestrator::{build_pipeline, BatchOrchestrator};
