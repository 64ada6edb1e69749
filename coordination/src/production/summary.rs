//! Running batch statistics.

use std::time::Duration;

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub approved_posts: u32,
    /// Rejected or failed attempts.
    pub rejected_posts: u32,
    /// Posts that used up every attempt.
    pub failed_posts: u32,
    pub ratings: Vec<f64>,
    #[serde(skip)]
    pub times: Vec<Duration>,
}

impl BatchSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a critique average and the time the attempt took to reach it.
    pub fn record_rating(&mut self, rating: f64, elapsed: Duration) {
        self.ratings.push(rating);
        self.times.push(elapsed);
    }

    pub fn approval_rate(&self) -> f64 {
        let total = self.approved_posts + self.rejected_posts;
        if total == 0 {
            0.0
        } else {
            self.approved_posts as f64 / total as f64
        }
    }

    pub fn average_rating(&self) -> f64 {
        mean(&self.ratings)
    }

    /// Mean seconds per rated attempt.
    pub fn average_time(&self) -> f64 {
        let secs: Vec<f64> = self.times.iter().map(Duration::as_secs_f64).collect();
        mean(&secs)
    }

    /// Mean seconds spent per approved post, rejected attempts included.
    pub fn average_time_per_approved(&self) -> f64 {
        let rate = self.approval_rate();
        if rate > 0.0 {
            self.average_time() / rate
        } else {
            0.0
        }
    }

    pub fn log(&self) {
        info!(
            approved = self.approved_posts,
            rejected = self.rejected_posts,
            failed = self.failed_posts,
            approval_rate = format!("{:.2}", self.approval_rate()),
            "Batch progress"
        );
        info!(
            average_rating = format!("{:.2}", self.average_rating()),
            average_time_secs = format!("{:.2}", self.average_time()),
            average_time_per_approved_secs = format!("{:.2}", self.average_time_per_approved()),
            "Batch timing"
        );
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
