//! In-memory fakes for collaborator traits
//!
//! Compiled for this crate's tests and for dependents that enable the
//! `test-support` feature.
//!
//! `ScriptedAgent` replays a fixed list of answers and records every call,
//! so panels and pipelines can be exercised without any model backend.
//! The image and publishing fakes write real files so workspace moves can
//! be checked on disk.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::consensus::ImageCandidate;
use crate::panel::{Agent, AgentResponseError, PromptContext};
use crate::production::{
    AcquisitionError, GeneratedImage, ImageFetcher, ImageGenerator, ImageSize, PublishError,
    PublishRequest, Published, Publisher,
};

/// A recorded agent call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub context: PromptContext,
}

/// Agent that answers from a script.
///
/// Answers are consumed in order; once the script runs out the last answer
/// repeats. `None` entries produce a request failure.
#[derive(Debug)]
pub struct ScriptedAgent {
    name: String,
    script: Mutex<VecDeque<Option<String>>>,
    last: Mutex<Option<String>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedAgent {
    /// Agent that plays `answers` in order.
    pub fn new<I, S>(name: &str, answers: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            script: Mutex::new(answers.into_iter().map(|a| a.map(Into::into)).collect()),
            last: Mutex::new(None),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Agent that always gives the same answer.
    pub fn always(name: &str, answer: &str) -> Self {
        Self::new(name, [Some(answer)])
    }

    /// Agent whose every call fails.
    pub fn failing(name: &str) -> Self {
        Self::new(name, [None::<String>])
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_answer(&self) -> Option<String> {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        match script.pop_front() {
            Some(answer) => {
                *last = answer.clone();
                answer
            }
            None => last.clone(),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        prompt: &str,
        context: &PromptContext,
    ) -> Result<String, AgentResponseError> {
        self.calls.lock().unwrap().push(RecordedCall {
            prompt: prompt.to_string(),
            context: context.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.next_answer()
            .ok_or_else(|| AgentResponseError::request(&self.name, "scripted failure"))
    }
}

/// Smallest valid PNG: a 1x1 transparent pixel.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Generator that writes `count` tiny PNGs, or nothing when `broken`.
#[derive(Debug, Default)]
pub struct FakeGenerator {
    broken: bool,
    requests: Mutex<Vec<(String, usize, ImageSize)>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job fails with a placeholder.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    /// (prompt, count, size) per call.
    pub fn requests(&self) -> Vec<(String, usize, ImageSize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(
        &self,
        prompt: &str,
        count: usize,
        size: ImageSize,
        destination: &Path,
    ) -> Vec<GeneratedImage> {
        self.requests
            .lock()
            .unwrap()
            .push((prompt.to_string(), count, size));

        (0..count)
            .map(|i| {
                if self.broken {
                    return GeneratedImage::Failed(format!("fake-failure-{i}"));
                }
                let path = destination.join(format!("fake-{i}.png"));
                match std::fs::write(&path, TINY_PNG) {
                    Ok(()) => GeneratedImage::Saved(path),
                    Err(e) => GeneratedImage::Failed(e.to_string()),
                }
            })
            .collect()
    }
}

/// Fetcher that materializes one tiny PNG per source, captioned by the
/// source string.
#[derive(Debug, Default)]
pub struct StaticFetcher;

#[async_trait]
impl ImageFetcher for StaticFetcher {
    async fn fetch(
        &self,
        sources: &[String],
        destination: &Path,
    ) -> Result<Vec<ImageCandidate>, AcquisitionError> {
        sources
            .iter()
            .enumerate()
            .map(|(i, source)| {
                let filename = format!("input-{i}.png");
                std::fs::write(destination.join(&filename), TINY_PNG)
                    .map_err(|e| AcquisitionError::Fetch(e.to_string()))?;
                Ok(ImageCandidate {
                    filename,
                    caption: source.clone(),
                    width: 1,
                    height: 1,
                })
            })
            .collect()
    }
}

/// Publisher that keeps every request and reports a rendered folder.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    fail: bool,
    requests: Mutex<Vec<PublishRequest>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<PublishRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<Published, PublishError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(PublishError("fake publisher refused".to_string()));
        }
        Ok(Published::Rendered(PathBuf::from(&request.folder)))
    }
}
