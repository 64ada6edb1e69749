//! ONNX web UI image generator client.
//!
//! Submits `txt2img` jobs, polls `/api/ready` until the job finishes, lists
//! its outputs via `/api/job/status`, and downloads each from
//! `/output/{key}`. Every failure becomes a placeholder entry.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use feed_coordination::production::{GeneratedImage, ImageGenerator, ImageSize};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ImageSettings;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("could not get job name")]
    Submit(String),
    #[error("image not ready in time")]
    NotReady,
    #[error("job was cancelled or failed")]
    JobFailed,
    #[error("could not download images")]
    Download(String),
}

impl GenerationError {
    fn placeholder(&self) -> String {
        format!("Error generating images: {self}.")
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReadyResponse {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    cancelled: bool,
    #[serde(default)]
    failed: bool,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(default)]
    outputs: Vec<String>,
}

pub struct OnnxImageGenerator {
    client: reqwest::Client,
    settings: ImageSettings,
}

impl OnnxImageGenerator {
    pub fn new(settings: ImageSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.url.trim_end_matches('/'))
    }

    /// Job parameters with randomised CFG, step count, and checkpoint.
    pub fn job_parameters(&self, prompt: &str, batch: usize, size: ImageSize) -> Value {
        let (width, height) = self.settings.sizes.dimensions(size);
        let mut rng = rand::thread_rng();
        let cfg: u32 = rng.gen_range(3..=8);
        let min_steps = 25 + cfg;
        let steps = rng.gen_range(min_steps / 5..=40 / 5) * 5;
        let model = self.settings.checkpoints.choose(&mut rng).cloned();

        json!({
            "device": {"platform": "cuda"},
            "params": {
                "batch": batch,
                "cfg": cfg,
                "steps": steps,
                "prompt": prompt,
                "negativePrompt": self.settings.negative_prompt,
                "width": width,
                "height": height,
                "pipeline": "txt2img-sdxl",
                "model": model,
                "scheduler": "dpm-sde",
                "seed": -1,
            },
            "experimental": {
                "promptEditing": {
                    "enabled": true,
                    "addSuffix": "",
                    "minLength": 240,
                    "promptFilter": self.settings.prompt_filter,
                    "removeTokens": self.settings.remove_tokens,
                },
            },
        })
    }

    async fn submit(&self, parameters: &Value) -> Result<String, GenerationError> {
        let form = reqwest::multipart::Form::new().text("json", parameters.to_string());
        let response = self
            .client
            .post(self.url("/api/txt2img"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| GenerationError::Submit(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::Submit(format!(
                "status code {}",
                response.status()
            )));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Submit(e.to_string()))?;
        body.name
            .ok_or_else(|| GenerationError::Submit("response has no job name".into()))
    }

    async fn check_ready(&self, job: &str) -> Result<bool, GenerationError> {
        let response = self
            .client
            .get(self.url("/api/ready"))
            .query(&[("output", job)])
            .send()
            .await
            .map_err(|_| GenerationError::NotReady)?;
        if !response.status().is_success() {
            warn!(job, status = %response.status(), "Ready request failed");
            return Err(GenerationError::NotReady);
        }

        let ready: ReadyResponse = response.json().await.unwrap_or_default();
        if ready.ready && (ready.cancelled || ready.failed) {
            return Err(GenerationError::JobFailed);
        }
        Ok(ready.ready)
    }

    async fn wait_ready(&self, job: &str) -> Result<(), GenerationError> {
        let poll = Duration::from_secs(self.settings.poll_secs);
        for _ in 0..self.settings.retries {
            if self.check_ready(job).await? {
                debug!(job, "Image is ready");
                return Ok(());
            }
            debug!(job, "Waiting for image to be ready");
            tokio::time::sleep(poll).await;
        }
        Err(GenerationError::NotReady)
    }

    async fn outputs(&self, job: &str) -> Result<Vec<String>, GenerationError> {
        let response = self
            .client
            .get(self.url("/api/job/status"))
            .query(&[("jobs", job)])
            .send()
            .await
            .map_err(|e| GenerationError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GenerationError::Download(format!(
                "job status {}",
                response.status()
            )));
        }

        let statuses: Vec<JobStatus> = response
            .json()
            .await
            .map_err(|e| GenerationError::Download(e.to_string()))?;
        Ok(statuses
            .into_iter()
            .next()
            .map(|status| status.outputs)
            .unwrap_or_default())
    }

    async fn download(
        &self,
        job_index: usize,
        keys: &[String],
        destination: &Path,
    ) -> Result<Vec<GeneratedImage>, GenerationError> {
        let mut saved = Vec::with_capacity(keys.len());
        for (j, key) in keys.iter().enumerate() {
            let url = self.url(&format!("/output/{key}"));
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| GenerationError::Download(e.to_string()))?;
            if !response.status().is_success() {
                warn!(url = %url, status = %response.status(), "Download request failed");
                return Err(GenerationError::Download(url));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| GenerationError::Download(e.to_string()))?;

            let path = destination.join(format!("output-{job_index}-{j}.png"));
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| GenerationError::Download(e.to_string()))?;
            info!(path = %path.display(), "Saved generated image");
            saved.push(GeneratedImage::Saved(path));
        }

        if saved.is_empty() {
            return Err(GenerationError::Download("job produced no outputs".into()));
        }
        Ok(saved)
    }

    async fn run_job(
        &self,
        job_index: usize,
        prompt: &str,
        size: ImageSize,
        destination: &Path,
    ) -> Result<Vec<GeneratedImage>, GenerationError> {
        let parameters = self.job_parameters(prompt, self.settings.batch, size);
        let job = self.submit(&parameters).await?;
        info!(job = %job, "Submitted image job");
        self.wait_ready(&job).await?;
        let keys = self.outputs(&job).await?;
        self.download(job_index, &keys, destination).await
    }
}

#[async_trait]
impl ImageGenerator for OnnxImageGenerator {
    async fn generate(
        &self,
        prompt: &str,
        count: usize,
        size: ImageSize,
        destination: &Path,
    ) -> Vec<GeneratedImage> {
        let jobs = count.div_ceil(self.settings.batch.max(1));
        let mut images = Vec::with_capacity(count);

        for job_index in 0..jobs {
            match self.run_job(job_index, prompt, size, destination).await {
                Ok(saved) => images.extend(saved),
                Err(e) => {
                    warn!(job_index, error = ?e, "Image job failed");
                    images.push(GeneratedImage::Failed(e.placeholder()));
                }
            }
        }
        images
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_parameters() {
        let generator = OnnxImageGenerator::new(ImageSettings {
            checkpoints: vec!["sdxl-base".into()],
            ..ImageSettings::default()
        });
        let params = generator.job_parameters("a harbor", 2, ImageSize::Portrait);

        assert_eq!(params["params"]["prompt"], "a harbor");
        assert_eq!(params["params"]["batch"], 2);
        assert_eq!(params["params"]["width"], 832);
        assert_eq!(params["params"]["height"], 1216);
        assert_eq!(params["params"]["model"], "sdxl-base");

        let cfg = params["params"]["cfg"].as_u64().unwrap();
        assert!((3..=8).contains(&cfg));
        let steps = params["params"]["steps"].as_u64().unwrap();
        assert_eq!(steps % 5, 0);
        assert!((25..=40).contains(&steps));
    }

    #[test]
    fn test_placeholder_text() {
        assert_eq!(
            GenerationError::NotReady.placeholder(),
            "Error generating images: image not ready in time."
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_yields_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let generator = OnnxImageGenerator::new(ImageSettings {
            url: "http://127.0.0.1:9".into(),
            batch: 2,
            ..ImageSettings::default()
        });

        let images = generator
            .generate("a harbor", 3, ImageSize::Square, dir.path())
            .await;
        assert_eq!(images.len(), 2);
        assert!(images
            .iter()
            .all(|image| matches!(image, GeneratedImage::Failed(p) if p.contains("job name"))));
    }
}
