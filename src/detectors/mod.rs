//! PII detectors
//!
//! Every detector scans text independently and emits raw [`DetectorVote`]s.
//! Detectors are resolved once from configuration into trait objects and
//! handed to the ensemble; nothing is looked up by name at call time.

pub mod custom;
pub mod ner;
pub mod rules;
pub mod validators;

pub use custom::{CustomPattern, CustomPatternDetector};
pub use ner::{NerModel, NeuralNerDetector};
pub use rules::RuleBasedDetector;

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A raw, per-detector span proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorVote {
    /// Entity type label (e.g. `EMAIL`)
    pub entity_type: String,
    /// Start byte offset
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl DetectorVote {
    pub fn new(entity_type: impl Into<String>, start: usize, end: usize, confidence: f64) -> Self {
        Self {
            entity_type: entity_type.into(),
            start,
            end,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Whether two votes' offset ranges intersect
    pub fn overlaps(&self, other: &DetectorVote) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Closed set of detector implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Regex with structural validators
    RuleBased,
    /// Statistical sequence tagger
    NeuralSequence,
    /// User-registered patterns
    CustomPattern,
}

/// Diagnostic description of a detector
#[derive(Debug, Clone, Serialize)]
pub struct DetectorInfo {
    pub id: String,
    pub kind: DetectorKind,
    pub version: String,
    pub supported_languages: Vec<String>,
    pub entity_types: Vec<String>,
}

/// Detector contract
///
/// `detect` must be stateless apart from loaded model data, so the ensemble
/// may run detectors on different threads concurrently.
pub trait Detector: Send + Sync {
    /// Stable identifier, also the key of the detector's adaptive weight
    fn id(&self) -> &str;

    fn kind(&self) -> DetectorKind;

    /// Languages this detector handles; an empty slice means any language
    fn supported_languages(&self) -> &[&str];

    /// Entity types this detector can emit
    fn entity_types(&self) -> Vec<String>;

    /// Scan `text` and return raw votes
    fn detect(&self, text: &str, language: &str) -> Result<Vec<DetectorVote>>;

    fn version(&self) -> &str {
        "1.0"
    }

    /// Whether the detector should run for `language`
    fn supports(&self, language: &str) -> bool {
        let langs = self.supported_languages();
        langs.is_empty() || langs.contains(&language)
    }

    fn info(&self) -> DetectorInfo {
        DetectorInfo {
            id: self.id().to_string(),
            kind: self.kind(),
            version: self.version().to_string(),
            supported_languages: self
                .supported_languages()
                .iter()
                .map(|l| l.to_string())
                .collect(),
            entity_types: self.entity_types(),
        }
    }
}

/// Resolve the configured detector kinds into concrete detectors.
pub fn build_detectors(config: &DetectionConfig) -> Result<Vec<Arc<dyn Detector>>> {
    let mut detectors: Vec<Arc<dyn Detector>> = Vec::new();

    if config.rule_based {
        detectors.push(Arc::new(RuleBasedDetector::new()?));
    }

    if config.neural_ner {
        let detector = match &config.ner_model_path {
            Some(path) => NeuralNerDetector::from_path(path),
            None => NeuralNerDetector::new(NerModel::builtin()),
        };
        detectors.push(Arc::new(detector));
    }

    if config.custom_patterns {
        detectors.push(Arc::new(CustomPatternDetector::from_config(config)?));
    }

    if detectors.is_empty() {
        return Err(Error::Config(
            "At least one detector must be enabled".to_string(),
        ));
    }

    tracing::info!(
        count = detectors.len(),
        "Detectors resolved: {}",
        detectors
            .iter()
            .map(|d| d.id())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(detectors)
}

/// Keep the higher-confidence vote wherever two votes of one detector overlap.
///
/// Ties prefer the longer span, then the earlier one. Output is sorted by start.
pub(crate) fn resolve_overlaps(mut votes: Vec<DetectorVote>) -> Vec<DetectorVote> {
    votes.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(b.len().cmp(&a.len()))
            .then(a.start.cmp(&b.start))
    });

    let mut kept: Vec<DetectorVote> = Vec::with_capacity(votes.len());
    for vote in votes {
        if !kept.iter().any(|k| k.overlaps(&vote)) {
            kept.push(vote);
        }
    }
    kept.sort_by_key(|v| v.start);
    kept
}
