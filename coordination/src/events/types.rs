//! Progress events streamed to clients as newline-delimited JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line of the progress stream.
///
/// Serialized without a tag, so each variant is identified by its fields:
/// `{span, args, kwargs}`, `{span, result}`, `{span}`, or
/// `{done: true, result}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    /// A span reported its inputs.
    Args {
        span: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    },
    /// A span reported its output.
    Output { span: String, result: Value },
    /// The run finished; always the last event.
    Done { done: bool, result: Value },
    /// A span was opened.
    Opened { span: String },
}

impl ProgressEvent {
    pub fn done(result: Value) -> Self {
        Self::Done { done: true, result }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    pub fn span(&self) -> Option<&str> {
        match self {
            Self::Args { span, .. } | Self::Output { span, .. } | Self::Opened { span } => {
                Some(span)
            }
            Self::Done { .. } => None,
        }
    }

    /// JSON text followed by a newline.
    pub fn to_ndjson(&self) -> String {
        // Serializing plain strings and JSON values cannot fail.
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shapes() {
        let args = ProgressEvent::Args {
            span: "feedme.post.retry.0".into(),
            args: vec![json!("tide pools")],
            kwargs: json!({"count": 3}).as_object().cloned().unwrap(),
        };
        assert_eq!(
            serde_json::to_value(&args).unwrap(),
            json!({"span": "feedme.post.retry.0", "args": ["tide pools"], "kwargs": {"count": 3}})
        );

        let output = ProgressEvent::Output {
            span: "feedme.post.retry.0".into(),
            result: json!({"status": "approved"}),
        };
        assert_eq!(
            serde_json::to_value(&output).unwrap(),
            json!({"span": "feedme.post.retry.0", "result": {"status": "approved"}})
        );

        let done = ProgressEvent::done(json!({"status": "failed"}));
        assert_eq!(
            done.to_ndjson(),
            "{\"done\":true,\"result\":{\"status\":\"failed\"}}\n"
        );
    }

    #[test]
    fn test_parse_back_from_line() {
        let event: ProgressEvent =
            serde_json::from_str(r#"{"span": "feedme.post.x", "result": 1}"#).unwrap();
        assert_eq!(event.span(), Some("feedme.post.x"));
        assert!(!event.is_done());

        let opened: ProgressEvent = serde_json::from_str(r#"{"span": "feedme.post.x"}"#).unwrap();
        assert!(matches!(opened, ProgressEvent::Opened { .. }));
    }
}
