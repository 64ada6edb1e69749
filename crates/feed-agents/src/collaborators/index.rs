//! Listing of approved posts, newest first.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;

pub const POST_FILE: &str = "post.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostEntry {
    pub folder: PathBuf,
    pub title: String,
    pub images: Vec<String>,
    pub timestamp: String,
    #[serde(skip)]
    modified: SystemTime,
}

/// Post folders under a directory, each holding a `post.json`.
pub struct PostIndex;

impl PostIndex {
    /// Entries for every post folder in `root`, most recently modified first.
    /// A missing `root` lists nothing.
    pub fn list(root: &Path) -> Result<Vec<PostEntry>> {
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dir_entry in std::fs::read_dir(root)
            .with_context(|| format!("Failed to read {}", root.display()))?
        {
            let folder = dir_entry?.path();
            let post_file = folder.join(POST_FILE);
            if !post_file.is_file() {
                continue;
            }
            entries.push(Self::entry(&folder, &post_file)?);
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(entries)
    }

    fn entry(folder: &Path, post_file: &Path) -> Result<PostEntry> {
        let folder_name = folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let title = std::fs::read_to_string(post_file)
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .and_then(|post| post["title"].as_str().map(str::to_string))
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| folder_name.clone());

        let mut images: Vec<String> = std::fs::read_dir(folder)
            .with_context(|| format!("Failed to read {}", folder.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".png"))
            .collect();
        images.sort();

        let modified = std::fs::metadata(post_file)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("Failed to stat {}", post_file.display()))?;
        let timestamp = DateTime::<Local>::from(modified)
            .format("%Y-%m-%d %H:%M")
            .to_string();

        Ok(PostEntry {
            folder: folder.to_path_buf(),
            title,
            images,
            timestamp,
            modified,
        })
    }
}
