//! Adaptive per-detector weights
//!
//! Weights move by exponential moving average toward the upper bound when a
//! detector's output is confirmed and toward the lower bound when it is
//! rejected. The store is explicitly owned and shared by cloning the tracker;
//! writers are exclusive and readers take a consistent snapshot.

use super::Detection;
use crate::config::AnonymaConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lower weight bound; no detector is ever fully silenced
pub const MIN_WEIGHT: f64 = 0.1;
/// Upper weight bound
pub const MAX_WEIGHT: f64 = 2.0;
/// Weight of a detector with no configured initial weight
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Immutable view of detector weights taken at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    weights: BTreeMap<String, f64>,
}

impl WeightProfile {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self { weights }
    }

    /// Weight of `detector`, defaulting to 1.0 for unknown ids
    pub fn get(&self, detector: &str) -> f64 {
        self.weights
            .get(detector)
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }
}

/// Feedback statistics for one detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub hits: u64,
    pub misses: u64,
    pub total: u64,
    pub accuracy: f64,
    pub weight: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counter {
    hits: u64,
    misses: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    weights: BTreeMap<String, f64>,
    counters: BTreeMap<String, Counter>,
}

/// Shared adaptive weight store
#[derive(Debug, Clone)]
pub struct WeightTracker {
    state: Arc<RwLock<TrackerState>>,
    initial: Arc<BTreeMap<String, f64>>,
    alpha: f64,
}

fn clamp_weight(w: f64) -> f64 {
    w.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

impl WeightTracker {
    /// Create a tracker with initial weights (clamped to bounds) and smoothing factor
    pub fn new(initial: BTreeMap<String, f64>, alpha: f64) -> Self {
        let initial: BTreeMap<String, f64> = initial
            .into_iter()
            .map(|(id, w)| (id, clamp_weight(w)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(TrackerState {
                weights: initial.clone(),
                counters: BTreeMap::new(),
            })),
            initial: Arc::new(initial),
            alpha: alpha.clamp(f64::EPSILON, 1.0),
        }
    }

    pub fn from_config(config: &AnonymaConfig) -> Self {
        Self::new(config.detection.weights.clone(), config.adaptive.alpha)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    fn initial_weight(&self, detector: &str) -> f64 {
        self.initial
            .get(detector)
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// Current weight of one detector
    pub async fn weight(&self, detector: &str) -> f64 {
        let state = self.state.read().await;
        state
            .weights
            .get(detector)
            .copied()
            .unwrap_or_else(|| self.initial_weight(detector))
    }

    /// Consistent copy of all weights
    pub async fn snapshot(&self) -> WeightProfile {
        let state = self.state.read().await;
        WeightProfile::new(state.weights.clone())
    }

    /// Record whether `detection` was correct and update every contributing detector.
    pub async fn report_feedback(&self, detection: &Detection, is_correct: bool) -> Result<()> {
        if detection.detectors.is_empty() {
            return Err(Error::Validation(
                "Detection has no contributing detectors".to_string(),
            ));
        }

        let signal = if is_correct { 1.0 } else { 0.0 };
        let target = signal * MAX_WEIGHT;

        let mut state = self.state.write().await;
        for detector in &detection.detectors {
            let old = state
                .weights
                .get(detector)
                .copied()
                .unwrap_or_else(|| self.initial_weight(detector));
            let new = clamp_weight(self.alpha * target + (1.0 - self.alpha) * old);
            state.weights.insert(detector.clone(), new);

            let counter = state.counters.entry(detector.clone()).or_default();
            if is_correct {
                counter.hits += 1;
            } else {
                counter.misses += 1;
            }

            tracing::debug!(
                detector = %detector,
                entity_type = %detection.entity_type,
                correct = is_correct,
                old_weight = old,
                new_weight = new,
                "Detector weight updated"
            );
        }
        Ok(())
    }

    /// Per-detector hit/miss counts, accuracy and current weight
    pub async fn get_performance_stats(&self) -> BTreeMap<String, PerformanceStats> {
        let state = self.state.read().await;
        let mut ids: Vec<&String> = state.weights.keys().collect();
        for id in state.counters.keys() {
            if !state.weights.contains_key(id) {
                ids.push(id);
            }
        }

        ids.into_iter()
            .map(|id| {
                let counter = state.counters.get(id).copied().unwrap_or_default();
                let total = counter.hits + counter.misses;
                let accuracy = if total > 0 {
                    counter.hits as f64 / total as f64
                } else {
                    0.0
                };
                let weight = state
                    .weights
                    .get(id)
                    .copied()
                    .unwrap_or_else(|| self.initial_weight(id));
                (
                    id.clone(),
                    PerformanceStats {
                        hits: counter.hits,
                        misses: counter.misses,
                        total,
                        accuracy,
                        weight,
                    },
                )
            })
            .collect()
    }

    /// Restore initial weights and clear counters
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.weights = (*self.initial).clone();
        state.counters.clear();
        tracing::info!("Detector weights reset to initial values");
    }
}
