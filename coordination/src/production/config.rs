//! Pipeline tuning knobs and prompt templates.

use serde::{Deserialize, Serialize};

/// How the critic panel rates a compiled post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueMode {
    /// Fraction of critics who approve.
    Binary,
    /// Mean of in-range scores divided by the maximum score.
    Scale,
}

/// Policy for choosing among supplied input images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRanking {
    /// Each image put to a yes/no vote; most approvals first.
    Binary,
    /// Each image scored on its own, thresholded.
    Scale,
    /// Each agent sorts the whole set; positions are summed.
    Ordinal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionConfig {
    /// Attempts per post before it is marked failed.
    pub max_post_retry: u32,
    /// Minimum critique average for approval.
    pub approval_threshold: f64,
    pub critique_mode: CritiqueMode,
    pub critique_max_score: i64,
    pub image_ranking: ImageRanking,
    /// Minimum average score for a supplied image under scale ranking.
    pub image_threshold: f64,
    pub image_max_score: i64,
    pub min_image_count: usize,
    pub max_image_count: usize,
    /// Attempts at a single-line image prompt.
    pub prompt_retry: u32,
    /// Abstract concepts the image prompt should not contain; shown to the
    /// keyword step as examples.
    pub remove_concepts: Vec<String>,
    /// Quality keywords appended to each image prompt.
    pub quality_keyword_count: usize,
    pub quality_keywords: Vec<String>,
    /// Style modifiers; one is picked per attempt.
    pub modifiers: Vec<String>,
    pub bot_name: String,
    pub mature: bool,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            max_post_retry: 3,
            approval_threshold: 0.65,
            critique_mode: CritiqueMode::Binary,
            critique_max_score: 5,
            image_ranking: ImageRanking::Scale,
            image_threshold: 3.5,
            image_max_score: 5,
            min_image_count: 3,
            max_image_count: 5,
            prompt_retry: 3,
            remove_concepts: vec![
                "love".to_string(),
                "freedom".to_string(),
                "nostalgia".to_string(),
                "hope".to_string(),
            ],
            quality_keyword_count: 6,
            quality_keywords: Vec::new(),
            modifiers: Vec::new(),
            bot_name: "feedme".to_string(),
            mature: true,
        }
    }
}

/// Prompt templates; `{placeholder}` slots are filled from the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub generate_concepts: String,
    pub rank_concepts_binary: String,
    pub rank_concepts_scale: String,
    pub cleanup_theme: String,
    pub generate_ideas: String,
    pub generate_description: String,
    pub generate_keywords: String,
    pub elaborate_characters: String,
    pub elaborate_scene: String,
    pub generate_prompt: String,
    pub remove_concepts: String,
    pub choose_image_size: String,
    pub rank_image_binary: String,
    pub rank_image_scale: String,
    pub rank_image_sort: String,
    pub rank_image_sort_retry: String,
    pub critique_image_opinion: String,
    pub critique_image_binary: String,
    pub critique_image_scale: String,
    pub post_notice: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            generate_concepts: "Suggest a concept for a {post_format} post in {min_words} to \
                {max_words} words. Reply with only the concept."
                .into(),
            rank_concepts_binary: "Is the concept \"{concept}\" interesting enough for a \
                {post_format} post? Answer yes or no."
                .into(),
            rank_concepts_scale: "How interesting is the concept \"{concept}\" on a scale from 1 \
                to {max_score}? Reply with a single number."
                .into(),
            cleanup_theme: "Rewrite \"{concept}\" as one short sentence suitable as a post title."
                .into(),
            generate_ideas: "Share one idea for a {post_format} post about {theme}, in a \
                {modifier} style. Keep it to two sentences."
                .into(),
            generate_description: "Write a social media post description about {theme} using \
                these ideas:\n{ideas}"
                .into(),
            generate_keywords: "List the visual keywords for an image about: {description}\n\
                Use concrete objects, colors and places. Avoid abstract concepts like these:\n\
                {example_concepts}\nReply with a comma-separated list."
                .into(),
            elaborate_characters: "Describe the people or animals in an image about \
                {description}, using these keywords: {keywords}. Keep it to one sentence."
                .into(),
            elaborate_scene: "Describe the setting and lighting of this scene in one sentence: \
                {scene}"
                .into(),
            generate_prompt: "Describe a single image for this post as a comma-separated list of \
                visual keywords on one line.{error}\nKeywords: {keywords}\nCharacters: \
                {characters}\nScene: {scene}"
                .into(),
            remove_concepts: "Remove any abstract concepts from this comma-separated list and \
                reply with the remaining list on one line: {keywords}"
                .into(),
            choose_image_size: "Which image shape fits this post best: landscape, portrait, or \
                square? {description}"
                .into(),
            rank_image_binary: "Does the image \"{caption}\" fit the post \"{description}\"? \
                Answer yes or no."
                .into(),
            rank_image_scale: "Rate how well the image \"{caption}\" fits the post \
                \"{description}\" on a scale from 1 to {max_score}. Reply with a single number."
                .into(),
            rank_image_sort: "{careful_warning}Sort these images from best to worst for the post \
                and reply with only a JSON list of filenames: {image_data}"
                .into(),
            rank_image_sort_retry: "Be careful: your last answer could not be parsed. Reply with \
                only a JSON list of filenames. "
                .into(),
            critique_image_opinion: "Give your honest opinion of the post titled \"{title}\": \
                {description}"
                .into(),
            critique_image_binary: "Should the post titled \"{title}\" be published? Answer yes \
                or no."
                .into(),
            critique_image_scale: "Rate the post titled \"{title}\" on a scale from 1 to \
                {max_score}. Reply with a single number."
                .into(),
            post_notice: "{body}\n\nThis post was created by {bot_name}. Post ID: {hash}".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProductionConfig::default();
        assert_eq!(config.max_post_retry, 3);
        assert_eq!(config.approval_threshold, 0.65);
        assert_eq!(config.image_threshold, 3.5);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ProductionConfig =
            serde_json::from_str(r#"{"critique_mode": "scale", "max_post_retry": 5}"#).unwrap();
        assert_eq!(config.critique_mode, CritiqueMode::Scale);
        assert_eq!(config.max_post_retry, 5);
        assert_eq!(config.min_image_count, 3);

        let prompts: PromptSet = serde_json::from_str(r#"{"post_notice": "{body}"}"#).unwrap();
        assert_eq!(prompts.post_notice, "{body}");
        assert!(prompts.rank_image_sort.contains("{careful_warning}"));
    }

    #[test]
    fn test_binary_image_ranking_parses() {
        let config: ProductionConfig =
            serde_json::from_str(r#"{"image_ranking": "binary", "remove_concepts": ["joy"]}"#)
                .unwrap();
        assert_eq!(config.image_ranking, ImageRanking::Binary);
        assert_eq!(config.remove_concepts, vec!["joy"]);
    }
}
