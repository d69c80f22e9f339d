//! Threshold classification of predicted scores
//!
//! The threshold is compared against the model's output space. With the
//! default training target the model is not an identity on latency, so the
//! threshold is only "milliseconds" nominally.

use crate::error::InvalidSignal;
use crate::models::Label;

/// Default classification threshold
pub const DEFAULT_THRESHOLD: f64 = 2000.0;

/// Map a predicted score to a label. Only a score strictly above the
/// threshold is `RateLimited`.
pub fn classify(score: f64, threshold: f64) -> Result<Label, InvalidSignal> {
    let score = InvalidSignal::check(score)?;
    if score > threshold {
        Ok(Label::RateLimited)
    } else {
        Ok(Label::Normal)
    }
}

/// Classifier bound to a fixed threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classifier {
    threshold: f64,
}

impl Classifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(&self, score: f64) -> Result<Label, InvalidSignal> {
        classify(score, self.threshold)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
