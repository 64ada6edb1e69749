//! Result parsers turning free-text answers into typed votes.
//!
//! Each parser returns `Err(reason)` when the answer cannot be interpreted;
//! the panel converts that into an excluded vote.

use std::sync::LazyLock;

use regex::Regex;

static INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("INTEGER_RE regex should compile"));

/// Scale bounds quoted back by the model: `1 to 5`, `1-5`, `out of 5`, `/5`.
static SCALE_BOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d+\s*(?:-|–|to)\s*\d+\b|\bout\s+of\s+\d+\b|/\s*\d+\b")
        .expect("SCALE_BOUND_RE regex should compile")
});

const TRUE_WORDS: &[&str] = &["yes", "true", "y", "approve", "approved"];
const FALSE_WORDS: &[&str] = &["no", "false", "n", "reject", "rejected"];

/// Trimmed text, rejecting empty answers.
pub fn parse_text(text: &str) -> Result<String, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty answer".to_string());
    }
    Ok(trimmed.to_string())
}

/// Single-line text, rejecting answers that span multiple lines.
pub fn parse_one_line(text: &str) -> Result<String, String> {
    let trimmed = parse_text(text)?;
    if trimmed.contains('\n') {
        return Err(
            "Too many lines in the text. Please reduce your response to one line.".to_string(),
        );
    }
    Ok(trimmed)
}

/// Boolean-like answer judged by its first word.
pub fn parse_bool(text: &str) -> Result<bool, String> {
    let lowered = text.trim().to_lowercase();
    let first = lowered
        .split(|c: char| !c.is_alphanumeric())
        .find(|word| !word.is_empty())
        .unwrap_or("");

    if TRUE_WORDS.contains(&first) {
        Ok(true)
    } else if FALSE_WORDS.contains(&first) {
        Ok(false)
    } else {
        Err(format!("not a yes/no answer: {first:?}"))
    }
}

/// Score on a `1..=max_score` scale.
///
/// Scale bounds quoted back by the model are ignored, then the last
/// integer left in the answer is the score. Out-of-range scores are invalid.
pub fn parse_score(text: &str, max_score: i64) -> Result<i64, String> {
    let stripped = SCALE_BOUND_RE.replace_all(text, " ");
    let score = INTEGER_RE
        .find_iter(&stripped)
        .last()
        .ok_or_else(|| "no score in answer".to_string())?
        .as_str()
        .parse::<i64>()
        .map_err(|e| e.to_string())?;

    if !(1..=max_score).contains(&score) {
        return Err(format!("score {score} outside 1..={max_score}"));
    }
    Ok(score)
}

/// The option mentioned earliest in the answer (case-insensitive).
///
/// An answer mentioning none of the options is invalid.
pub fn parse_choice(text: &str, options: &[&str]) -> Result<String, String> {
    let lowered = text.to_lowercase();
    options
        .iter()
        .filter_map(|option| {
            lowered
                .find(&option.to_lowercase())
                .map(|index| (index, *option))
        })
        .min_by_key(|(index, _)| *index)
        .map(|(_, option)| option.to_string())
        .ok_or_else(|| format!("none of {options:?} found in answer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("Yes, I like it."), Ok(true));
        assert_eq!(parse_bool("  TRUE"), Ok(true));
        assert_eq!(parse_bool("**No** - too dark"), Ok(false));
        assert_eq!(parse_bool("false"), Ok(false));
        assert!(parse_bool("maybe").is_err());
        assert!(parse_bool("").is_err());
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("4", 5), Ok(4));
        assert_eq!(parse_score("I would rate this a 3 out of 5", 5), Ok(3));
        assert_eq!(parse_score("4/5", 5), Ok(4));
        assert!(parse_score("five", 5).is_err());
    }

    #[test]
    fn test_parse_score_skips_quoted_scale() {
        assert_eq!(
            parse_score("On a scale of 1 to 5, I would give it a 4.", 5),
            Ok(4)
        );
        assert_eq!(parse_score("Score (1-5): 2", 5), Ok(2));
        assert_eq!(parse_score("Rating: 2, maybe 3 on a 1–5 scale", 5), Ok(3));
    }

    #[test]
    fn test_parse_score_out_of_range() {
        assert!(parse_score("7", 5).is_err());
        assert!(parse_score("0", 5).is_err());
        assert!(parse_score("-1", 5).is_err());
    }

    #[test]
    fn test_parse_choice_earliest_wins() {
        let options = ["landscape", "portrait", "square"];
        assert_eq!(
            parse_choice("Portrait, though square could work", &options),
            Ok("portrait".to_string())
        );
        assert_eq!(parse_choice("SQUARE", &options), Ok("square".to_string()));
        assert!(parse_choice("wide", &options).is_err());
    }

    #[test]
    fn test_parse_one_line() {
        assert_eq!(parse_one_line("  a cat, a hat \n"), Ok("a cat, a hat".to_string()));
        assert!(parse_one_line("line one\nline two").is_err());
        assert!(parse_text("   ").is_err());
    }
}
