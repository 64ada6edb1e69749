//! External collaborators used by the pipeline: image generation, input
//! image fetching, and publishing.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::ImageCandidate;

/// Aspect ratio requested from the image generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSize {
    Landscape,
    Portrait,
    Square,
}

impl ImageSize {
    /// Option names offered to a plurality vote.
    pub const OPTIONS: [&'static str; 3] = ["landscape", "portrait", "square"];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "landscape" => Some(Self::Landscape),
            "portrait" => Some(Self::Portrait),
            "square" => Some(Self::Square),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
            Self::Square => "square",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested output from the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedImage {
    /// Saved to disk.
    Saved(PathBuf),
    /// User-visible placeholder describing why the output is missing.
    Failed(String),
}

/// Produces images for a prompt.
///
/// Failures never cross this boundary as errors: submission, polling and
/// download problems come back as [`GeneratedImage::Failed`] entries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        count: usize,
        size: ImageSize,
        destination: &Path,
    ) -> Vec<GeneratedImage>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("No images acquired ({requested} requested)")]
    NoCandidates { requested: usize },

    #[error("None of {candidates} candidate images was selected")]
    NoneSelected { candidates: usize },

    #[error("Failed to fetch input images: {0}")]
    Fetch(String),
}

/// Downloads externally supplied images into the working directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(
        &self,
        sources: &[String],
        destination: &Path,
    ) -> Result<Vec<ImageCandidate>, AcquisitionError>;
}

/// What to publish for an approved post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    /// Absolute image paths, in post order.
    pub files: Vec<PathBuf>,
    pub title: String,
    /// Description with the post notice appended.
    pub description: String,
    pub mature: bool,
    /// Approved post folder.
    pub folder: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Published {
    /// A static artifact was written.
    Rendered(PathBuf),
    /// An external service accepted the post under this identifier.
    Posted(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Publishing failed: {0}")]
pub struct PublishError(pub String);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> Result<Published, PublishError>;
}
