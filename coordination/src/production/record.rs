//! Post records, content hashing, and folder naming.

use std::io;
use std::sync::LazyLock;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, Serializer};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Longest theme prefix kept in a post folder name.
pub const MAX_SLUG_LEN: usize = 50;

static NON_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W").expect("NON_WORD_RE regex should compile"));
static UNDERSCORES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("UNDERSCORES_RE regex should compile"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("WHITESPACE_RE regex should compile"));

/// A compiled post, written to `post.json` in the post folder.
///
/// `rating` and `critiques` are filled in after the critique stage; they
/// are not part of the content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub title: String,
    pub description: String,
    pub files: Vec<String>,
    pub keywords: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critiques: Option<Vec<String>>,
}

impl PostRecord {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        files: Vec<String>,
        keywords: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            files,
            keywords: keywords.into(),
            rating: None,
            critiques: None,
        }
    }

    /// Stable identity token for the post content.
    ///
    /// SHA-256 over the sorted-key JSON of title, description, files and
    /// keywords, encoded as URL-safe base64 with padding. The JSON is laid
    /// out like Python's `json.dumps(..., sort_keys=True)` so hashes match
    /// posts made by the Python tooling.
    pub fn content_hash(&self) -> String {
        // Keys in sorted order even if the map keeps insertion order.
        let content = json!({
            "description": self.description,
            "files": self.files,
            "keywords": self.keywords,
            "title": self.title,
        });
        let digest = Sha256::digest(python_dumps(&content));
        URL_SAFE.encode(digest)
    }

    /// Folder name: truncated theme slug plus content hash.
    pub fn slug(&self) -> String {
        post_slug(&self.title, &self.content_hash())
    }
}

/// JSON with `", "` and `": "` separators and every character outside
/// printable ASCII written as a lowercase `\uXXXX` UTF-16 escape.
struct PythonFormatter;

impl Formatter for PythonFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for c in fragment.chars() {
            if (' '..='~').contains(&c) {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

fn python_dumps(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PythonFormatter);
    // Serializing a Value into memory has no failure path.
    let _ = value.serialize(&mut serializer);
    out
}

/// Replace every non-word character with `_`, then collapse runs of `_`.
pub fn sanitize_name(name: &str) -> String {
    let replaced = NON_WORD_RE.replace_all(name, "_");
    UNDERSCORES_RE.replace_all(&replaced, "_").into_owned()
}

/// `{sanitized theme, at most 50 chars}_{hash}`.
pub fn post_slug(theme: &str, hash: &str) -> String {
    let slug: String = sanitize_name(theme).chars().take(MAX_SLUG_LEN).collect();
    format!("{slug}_{hash}")
}

/// Tidy model output into a single sentence.
///
/// Collapses whitespace, strips wrapping quotes, and optionally ensures a
/// trailing period.
pub fn cleanup_sentence(text: &str, trailing_period: bool) -> String {
    let collapsed = WHITESPACE_RE.replace_all(text.trim(), " ");
    let mut sentence = collapsed
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string();

    if trailing_period {
        if !sentence.is_empty() && !sentence.ends_with(['.', '!', '?']) {
            sentence.push('.');
        }
    } else {
        while sentence.ends_with('.') {
            sentence.pop();
        }
    }
    sentence
}

/// `- item` per line, with embedded newlines flattened.
pub fn format_bullet_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| format!("- {}", item.as_ref().replace('\r', "").replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n")
}
