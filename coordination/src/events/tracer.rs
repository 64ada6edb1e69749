//! Progress tracer: spans reported over a tokio channel.
//!
//! A disabled tracer drops every event, so pipeline code can report
//! unconditionally.

use std::future::Future;

use serde_json::{Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::types::ProgressEvent;

pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Cloneable handle that emits progress events.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracer {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressTracer {
    /// Tracer plus the receiving end of its stream.
    pub fn channel() -> (Self, ProgressReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Tracer that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                debug!("Progress receiver dropped");
            }
        }
    }

    /// Open a span named `{kind}.{name}`.
    pub fn span(&self, kind: &str, name: impl std::fmt::Display) -> Span {
        let span = Span {
            name: format!("{kind}.{name}"),
            tracer: self.clone(),
        };
        self.emit(ProgressEvent::Opened {
            span: span.name.clone(),
        });
        span
    }

    /// Emit the terminal event.
    pub fn done(&self, result: Value) {
        self.emit(ProgressEvent::done(result));
    }
}

/// An open span; reports inputs and outputs under its name.
#[derive(Debug, Clone)]
pub struct Span {
    name: String,
    tracer: ProgressTracer,
}

impl Span {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn report_args(&self, args: Vec<Value>, kwargs: Map<String, Value>) {
        self.tracer.emit(ProgressEvent::Args {
            span: self.name.clone(),
            args,
            kwargs,
        });
    }

    pub fn report_output(&self, result: Value) {
        self.tracer.emit(ProgressEvent::Output {
            span: self.name.clone(),
            result,
        });
    }
}

/// Run `job` on a background task, streaming its progress.
///
/// The task sends a terminal `done` event carrying the job's result. There
/// is no cancellation; dropping the receiver only discards events.
pub fn spawn_with_progress<F, Fut>(job: F) -> (JoinHandle<()>, ProgressReceiver)
where
    F: FnOnce(ProgressTracer) -> Fut,
    Fut: Future<Output = Value> + Send + 'static,
{
    let (tracer, receiver) = ProgressTracer::channel();
    let run = job(tracer.clone());
    let handle = tokio::spawn(async move {
        let result = run.await;
        tracer.done(result);
    });
    (handle, receiver)
}

/// Write events as NDJSON until the terminal event or channel close.
pub async fn write_ndjson<W>(mut receiver: ProgressReceiver, writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = receiver.recv().await {
        writer.write_all(event.to_ndjson().as_bytes()).await?;
        writer.flush().await?;
        if event.is_done() {
            break;
        }
    }
    Ok(())
}
