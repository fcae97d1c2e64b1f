//! Detector ensemble
//!
//! Runs every active detector concurrently on the blocking pool, waits for
//! all of them, takes one snapshot of the adaptive weights and merges the
//! votes. A failing detector is logged and contributes nothing; the call
//! only fails when no detector succeeded.

pub mod aggregator;
pub mod weights;

pub use aggregator::{aggregate, AggregatorSettings, DetectorVotes};
pub use weights::{PerformanceStats, WeightProfile, WeightTracker};

use crate::config::DetectionConfig;
use crate::detectors::Detector;
use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Policy deciding how many detectors must agree on a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingStrategy {
    /// Every active detector agrees
    Unanimous,
    /// More than half of the active detectors agree
    Majority,
    /// At least one detector
    Any,
    /// Weighted confidence reaches `min_confidence`
    #[default]
    Weighted,
}

impl FromStr for VotingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "unanimous" => Ok(Self::Unanimous),
            "majority" => Ok(Self::Majority),
            "any" => Ok(Self::Any),
            "weighted" => Ok(Self::Weighted),
            other => Err(Error::Config(format!("Unknown voting strategy: {}", other))),
        }
    }
}

impl fmt::Display for VotingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unanimous => "unanimous",
            Self::Majority => "majority",
            Self::Any => "any",
            Self::Weighted => "weighted",
        };
        f.write_str(name)
    }
}

/// A final, located, typed and scored span
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Matched snippet; never serialized or logged
    #[serde(skip_serializing, default)]
    pub text: String,
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
    /// Ids of the detectors that voted for the winning entity type
    pub detectors: Vec<String>,
    pub vote_count: usize,
}

impl fmt::Debug for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detection")
            .field("entity_type", &self.entity_type)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("confidence", &self.confidence)
            .field("detectors", &self.detectors)
            .field("vote_count", &self.vote_count)
            .finish_non_exhaustive()
    }
}

impl Detection {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Ordered, pairwise non-overlapping detections
pub type AggregationResult = Vec<Detection>;

/// A detector call that failed
#[derive(Debug, Clone, Serialize)]
pub struct DetectorFailure {
    pub detector: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of one ensemble run
#[derive(Debug, Clone, Default)]
pub struct EnsembleOutcome {
    pub detections: AggregationResult,
    /// Detectors whose call succeeded
    pub active_detectors: Vec<String>,
    pub failures: Vec<DetectorFailure>,
}

/// Per-detector diagnostic counts
#[derive(Debug, Clone, Serialize)]
pub struct DetectorStat {
    pub detector: String,
    pub votes: usize,
    pub weight: f64,
    pub error: Option<String>,
}

/// Concurrent detector pool with weighted voting
pub struct Ensemble {
    detectors: Vec<Arc<dyn Detector>>,
    weights: WeightTracker,
    settings: AggregatorSettings,
}

impl Ensemble {
    /// Create an ensemble; `enabled_entities` must only name types some detector emits.
    pub fn new(
        detectors: Vec<Arc<dyn Detector>>,
        weights: WeightTracker,
        config: &DetectionConfig,
    ) -> Result<Self> {
        if detectors.is_empty() {
            return Err(Error::Config("Ensemble needs at least one detector".to_string()));
        }

        let mut ids = HashSet::new();
        for detector in &detectors {
            if !ids.insert(detector.id().to_string()) {
                return Err(Error::Config(format!(
                    "Duplicate detector id: {}",
                    detector.id()
                )));
            }
        }

        let enabled_entities = match &config.enabled_entities {
            Some(list) => {
                let emitted: HashSet<String> =
                    detectors.iter().flat_map(|d| d.entity_types()).collect();
                for entity in list {
                    if !emitted.contains(entity) {
                        return Err(Error::Config(format!(
                            "Unknown entity type '{}': no configured detector emits it",
                            entity
                        )));
                    }
                }
                Some(list.iter().cloned().collect())
            }
            None => None,
        };

        Ok(Self {
            detectors,
            weights,
            settings: AggregatorSettings {
                strategy: config.voting_strategy,
                min_confidence: config.min_confidence,
                min_votes: config.min_votes,
                enabled_entities,
            },
        })
    }

    pub fn detectors(&self) -> &[Arc<dyn Detector>] {
        &self.detectors
    }

    pub fn weights(&self) -> &WeightTracker {
        &self.weights
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Run all detectors for `language` and collect per-detector results
    async fn run_detectors(
        &self,
        text: &str,
        language: &str,
    ) -> Vec<(String, Result<Vec<crate::detectors::DetectorVote>>)> {
        let text: Arc<str> = Arc::from(text);
        let tasks = self
            .detectors
            .iter()
            .filter(|d| d.supports(language))
            .map(|detector| {
                let detector = Arc::clone(detector);
                let text = Arc::clone(&text);
                let language = language.to_string();
                let id = detector.id().to_string();
                async move {
                    let handle =
                        tokio::task::spawn_blocking(move || detector.detect(&text, &language));
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => {
                            Err(Error::Detection(format!("Detector {} panicked", id)))
                        }
                        Err(_) => Err(Error::Detection(format!("Detector {} was aborted", id))),
                    };
                    (id, result)
                }
            });
        futures::future::join_all(tasks).await
    }

    /// Detect entities in `text`.
    pub async fn detect(&self, text: &str, language: &str) -> Result<EnsembleOutcome> {
        let results = self.run_detectors(text, language).await;
        if results.is_empty() {
            tracing::warn!(language, "No detector supports this language");
            return Ok(EnsembleOutcome::default());
        }

        let attempted = results.len();
        let mut ballots = Vec::with_capacity(attempted);
        let mut failures = Vec::new();
        for (detector, result) in results {
            match result {
                Ok(votes) => ballots.push(DetectorVotes { detector, votes }),
                Err(e) => {
                    if e.is_recoverable_in_ensemble() {
                        tracing::warn!(detector = %detector, kind = ?e.kind(), "Detector failed: {}", e);
                    } else {
                        tracing::error!(detector = %detector, kind = ?e.kind(), "Detector failed: {}", e);
                    }
                    failures.push(DetectorFailure {
                        detector,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if ballots.is_empty() {
            return Err(Error::Detection(format!(
                "All {} detectors failed",
                attempted
            )));
        }

        let profile = self.weights.snapshot().await;
        let detections = aggregate(text, &ballots, &profile, &self.settings);

        tracing::info!(
            detections = detections.len(),
            active = ballots.len(),
            failed = failures.len(),
            strategy = %self.settings.strategy,
            "Ensemble detection finished"
        );
        for d in &detections {
            tracing::debug!(
                entity_type = %d.entity_type,
                start = d.start,
                end = d.end,
                votes = d.vote_count,
                "Detection"
            );
        }

        Ok(EnsembleOutcome {
            detections,
            active_detectors: ballots.into_iter().map(|b| b.detector).collect(),
            failures,
        })
    }

    /// Raw vote counts and current weight per detector
    pub async fn detector_stats(&self, text: &str, language: &str) -> Vec<DetectorStat> {
        let results = self.run_detectors(text, language).await;
        let mut stats = Vec::with_capacity(results.len());
        for (detector, result) in results {
            let weight = self.weights.weight(&detector).await;
            let (votes, error) = match result {
                Ok(votes) => (votes.len(), None),
                Err(e) => (0, Some(e.to_string())),
            };
            stats.push(DetectorStat {
                detector,
                votes,
                weight,
                error,
            });
        }
        stats
    }

    /// Feedback on a final detection
    pub async fn report_feedback(&self, detection: &Detection, is_correct: bool) -> Result<()> {
        self.weights.report_feedback(detection, is_correct).await
    }
}
