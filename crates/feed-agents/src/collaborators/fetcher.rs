//! Downloads externally supplied images and their prompt sidecars.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use feed_coordination::consensus::ImageCandidate;
use feed_coordination::production::{AcquisitionError, ImageFetcher};
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

/// Longest caption offered to ranking agents.
pub const MAX_CAPTION_LEN: usize = 200;

static LORA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("LORA_RE regex should compile"));

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Caption from generation metadata: the detail half of `params.prompt`,
/// with LoRA tags stripped and length capped.
pub fn caption_from_metadata(metadata: &Value) -> String {
    let prompt = metadata["params"]["prompt"].as_str().unwrap_or("");
    let detail = prompt.split("||").next().unwrap_or("");
    let cleaned = LORA_RE.replace_all(detail, "");
    cleaned
        .chars()
        .take(MAX_CAPTION_LEN)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Width and height from a PNG's IHDR chunk.
pub fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 24 || !bytes.starts_with(PNG_SIGNATURE) || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some((width, height))
}

pub struct HttpImageFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImageFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn get_bytes(&self, url: &str) -> Option<Vec<u8>> {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(bytes) => Some(bytes.to_vec()),
                Err(e) => {
                    warn!(url, error = %e, "Failed to read image response");
                    None
                }
            },
            Ok(response) => {
                warn!(url, status = %response.status(), "Image request failed");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "Image request failed");
                None
            }
        }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(
        &self,
        sources: &[String],
        destination: &Path,
    ) -> Result<Vec<ImageCandidate>, AcquisitionError> {
        let base = self.base_url.trim_end_matches('/');
        let mut candidates = Vec::with_capacity(sources.len());

        for (i, source) in sources.iter().enumerate() {
            info!(source = %source, "Downloading input image");
            let Some(image) = self.get_bytes(&format!("{base}/output/{source}.png")).await else {
                continue;
            };
            let Some((width, height)) = png_dimensions(&image) else {
                warn!(source = %source, "Input image is not a PNG, skipping");
                continue;
            };

            let filename = format!("{i}.png");
            tokio::fs::write(destination.join(&filename), &image)
                .await
                .map_err(|e| AcquisitionError::Fetch(e.to_string()))?;

            let caption = match self.get_bytes(&format!("{base}/output/{source}.png.json")).await {
                Some(sidecar) => {
                    tokio::fs::write(destination.join(format!("{filename}.json")), &sidecar)
                        .await
                        .map_err(|e| AcquisitionError::Fetch(e.to_string()))?;
                    serde_json::from_slice::<Value>(&sidecar)
                        .map(|metadata| caption_from_metadata(&metadata))
                        .unwrap_or_default()
                }
                None => String::new(),
            };

            candidates.push(ImageCandidate {
                filename,
                caption,
                width,
                height,
            });
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_coordination::fakes::TINY_PNG;
    use serde_json::json;

    #[test]
    fn test_caption_strips_lora_and_detail_split() {
        let metadata = json!({
            "params": {"prompt": "a harbor at dawn <lora:film:0.8>, fog || 35mm, grain"}
        });
        assert_eq!(caption_from_metadata(&metadata), "a harbor at dawn , fog");
    }

    #[test]
    fn test_caption_is_capped() {
        let long = "x".repeat(500);
        let metadata = json!({"params": {"prompt": long}});
        assert_eq!(caption_from_metadata(&metadata).len(), MAX_CAPTION_LEN);
    }

    #[test]
    fn test_caption_missing_prompt_is_empty() {
        assert_eq!(caption_from_metadata(&json!({})), "");
    }

    #[test]
    fn test_png_dimensions() {
        assert_eq!(png_dimensions(TINY_PNG), Some((1, 1)));
        assert_eq!(png_dimensions(b"GIF89a not a png at all....."), None);
        assert_eq!(png_dimensions(&TINY_PNG[..10]), None);
    }

    #[tokio::test]
    async fn test_unreachable_sources_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpImageFetcher::new("http://127.0.0.1:9");
        let candidates = fetcher
            .fetch(&["abc".to_string()], dir.path())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }
}
