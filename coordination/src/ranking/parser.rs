//! Text-repair parser for model-produced rankings.
//!
//! Models are asked for a JSON array of filenames but routinely leak chat
//! markup, forget a bracket, double their quotes, or mangle the extension.
//! [`parse_ranking`] applies a fixed sequence of repairs and then unwraps
//! the common "array nested in an object" shapes.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// Error type for ranking parsing.
#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    /// The repaired text was still not valid JSON.
    #[error("Malformed ranking: {reason} (text: {text})")]
    Malformed { reason: String, text: String },

    /// Valid JSON, but not something that unwraps to a sequence.
    #[error("Invalid ranking format: expected a list, got {found}")]
    InvalidFormat { found: String },
}

impl RankingError {
    /// Both variants are worth another attempt with extra guidance.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Result type for ranking operations.
pub type RankingResult<T> = Result<T, RankingError>;

/// Object keys that models like to wrap their ranking in.
pub const RANKING_SUBKEYS: &[&str] = &[
    "filename",
    "ranks",
    "images",
    "image_filenames",
    "image_ranking",
    "ranked_filenames",
    "sorted_images",
    "sorted_filenames",
    "imagesSorted",
    "updatedImages",
];

/// Extension typos, applied in order.
const EXTENSION_FIXUPS: &[(&str, &str)] = &[
    (".0.png", ".png"),
    (" .png", ".png"),
    ("..png", ".png"),
    (". png", ".png"),
];

/// Everything from a closing chat-template tag (`</|...`) onwards.
static TRAILING_MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</\|.*$").expect("TRAILING_MARKUP_RE regex should compile")
});

/// A lone end-of-turn token such as `<|im_end|>` at the very end.
static END_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\|[^|<>]*\|>\s*$").expect("END_TOKEN_RE regex should compile")
});

/// Anything before the first bracket, e.g. `Here is the list: [`. Never
/// crosses a `{` so a bare object keeps its shape.
static LEADING_PREAMBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\{\[]*?\[").expect("LEADING_PREAMBLE_RE regex should compile")
});

/// Apply the text repairs (steps 1–7 plus trimming) without parsing.
pub fn repair_ranking_text(raw: &str) -> String {
    let mut text = raw.replace(['\n', '\r'], "");

    text = TRAILING_MARKUP_RE.replace(&text, "").into_owned();
    text = END_TOKEN_RE.replace(&text, "").into_owned();
    text = LEADING_PREAMBLE_RE.replace(&text, "[").into_owned();
    text = text.replace("\"\"", "\"");

    // Bracket repairs only apply to text that is not already a JSON value,
    // otherwise a wrapper object like `{"images": [..], "note": ".."}` would
    // be turned into a list of one object.
    if serde_json::from_str::<Value>(text.trim()).is_err() {
        if text.ends_with("\"}") && !text.ends_with(']') {
            text.push(']');
        }

        if text.starts_with("{\"") && !text.starts_with('[') {
            text.insert(0, '[');
        }
    }

    for (from, to) in EXTENSION_FIXUPS {
        text = text.replace(from, to);
    }

    text.trim().to_string()
}

/// Parse raw agent output into an ordered list of identifiers,
/// highest-ranked first. Duplicates are preserved.
pub fn parse_ranking(raw: &str) -> RankingResult<Vec<String>> {
    let repaired = repair_ranking_text(raw);
    debug!(ranking = %repaired, "Ranking after fixups");

    let parsed: Value =
        serde_json::from_str(&repaired).map_err(|e| RankingError::Malformed {
            reason: e.to_string(),
            text: repaired.clone(),
        })?;

    let unwrapped = unwrap_ranking(unwrap_ranking(parsed));
    match unwrapped {
        Value::Array(items) => Ok(items
            .into_iter()
            .map(unwrap_ranking)
            .filter_map(identifier)
            .collect()),
        other => Err(RankingError::InvalidFormat {
            found: value_kind(&other).to_string(),
        }),
    }
}

/// Descend one level into the wrappers models put around a ranking.
///
/// A single-key object is replaced by its value; then each known subkey is
/// followed in turn while the value is still an object.
pub fn unwrap_ranking(value: Value) -> Value {
    let mut value = match value {
        Value::Object(map) if map.len() == 1 => {
            map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null)
        }
        other => other,
    };

    for key in RANKING_SUBKEYS {
        if let Value::Object(map) = &mut value {
            if let Some(inner) = map.remove(*key) {
                value = inner;
            }
        }
    }

    value
}

fn identifier(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        other => {
            warn!(item = %other, "Dropping ranking entry that is not an identifier");
            None
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
