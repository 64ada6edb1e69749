//! Progress streaming for long-running production runs.
//!
//! A run reports spans through a [`ProgressTracer`]; the receiving side
//! writes each [`ProgressEvent`] as one line of JSON. The stream always
//! ends with a `{"done": true, "result": ...}` line.
//!
//! ```text
//! ┌──────────────┐  mpsc   ┌──────────────┐  NDJSON  ┌──────────┐
//! │ pipeline run │────────▶│  receiver    │─────────▶│  client  │
//! │ (spawned)    │         │ write_ndjson │          │          │
//! └──────────────┘         └──────────────┘          └──────────┘
//! ```

pub mod tracer;
pub mod types;

pub use tracer::{spawn_with_progress, write_ndjson, ProgressReceiver, ProgressTracer, Span};
pub use types::ProgressEvent;
