//! Agent panels: concurrent querying of independent evaluators.

pub mod agent;
#[allow(clippy::module_inception)]
pub mod panel;
pub mod parsers;

pub use agent::{Agent, AgentResponseError, PromptContext, SharedAgent};
pub use panel::{Panel, PanelResponses, DEFAULT_AGENT_TIMEOUT};
pub use parsers::{parse_bool, parse_choice, parse_one_line, parse_score, parse_text};
