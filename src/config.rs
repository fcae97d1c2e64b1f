//! Anonyma configuration management
//!
//! Configuration is read from TOML, then selected values may be overridden
//! from the environment (`ANONYMA_*`). Every section has defaults, so an
//! empty file is a valid configuration.

use crate::ensemble::VotingStrategy;
use crate::error::{Error, Result};
use crate::modes::AnonymizationMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main Anonyma configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymaConfig {
    /// Detector ensemble configuration
    pub detection: DetectionConfig,

    /// Adaptive weighting configuration
    pub adaptive: AdaptiveConfig,

    /// Anonymization mode configuration
    pub anonymization: AnonymizationConfig,

    /// Document extraction / reconstruction configuration
    pub documents: DocumentsConfig,

    /// Job orchestration configuration
    pub pipeline: PipelineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Detector ensemble configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Voting strategy applied to each span cluster
    pub voting_strategy: VotingStrategy,

    /// Minimum weighted confidence for the `weighted` strategy
    pub min_confidence: f64,

    /// Minimum number of distinct agreeing detectors, for every strategy
    pub min_votes: usize,

    /// Enable the rule-based (regex + validators) detector
    pub rule_based: bool,

    /// Enable the statistical sequence-tagging NER detector
    pub neural_ner: bool,

    /// Enable the custom-pattern detector
    pub custom_patterns: bool,

    /// Optional path to a JSON tagger model; the built-in model is used when unset
    pub ner_model_path: Option<PathBuf>,

    /// Built-in custom pattern collections to register
    pub pattern_sets: Vec<PatternSet>,

    /// User-declared custom patterns
    pub patterns: Vec<CustomPatternConfig>,

    /// Initial detector weights, keyed by detector id
    pub weights: BTreeMap<String, f64>,

    /// Languages accepted by the pipeline
    pub supported_languages: Vec<String>,

    /// Language used when a request does not name one
    pub default_language: String,

    /// Restrict final detections to these entity types (None = all)
    pub enabled_entities: Option<Vec<String>>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            voting_strategy: VotingStrategy::Weighted,
            min_confidence: 0.6,
            min_votes: 1,
            rule_based: true,
            neural_ner: true,
            custom_patterns: false,
            ner_model_path: None,
            pattern_sets: Vec::new(),
            patterns: Vec::new(),
            weights: default_detector_weights(),
            supported_languages: vec!["it".to_string(), "en".to_string()],
            default_language: "it".to_string(),
            enabled_entities: None,
        }
    }
}

/// Initial weights for the built-in detectors
pub fn default_detector_weights() -> BTreeMap<String, f64> {
    let mut weights = BTreeMap::new();
    weights.insert("rule_based".to_string(), 1.0);
    weights.insert("neural_ner".to_string(), 1.2);
    weights.insert("custom_patterns".to_string(), 0.8);
    weights
}

/// Built-in custom pattern collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSet {
    /// EMPLOYEE_ID, PROJECT_CODE, DOCUMENT_ID, CONTRACT_ID
    InternalIds,
    /// COMPOUND_ID, CAS_NUMBER, DRUG_CODE
    Compounds,
}

/// A custom pattern declared in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPatternConfig {
    /// Entity type emitted for matches
    pub name: String,

    /// Regular expression
    pub pattern: String,

    /// Confidence assigned to matches
    #[serde(default = "default_pattern_confidence")]
    pub confidence: f64,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Match case-insensitively
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
}

fn default_pattern_confidence() -> f64 {
    0.9
}

fn default_true() -> bool {
    true
}

/// Adaptive weighting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Smoothing factor of the exponential moving average
    pub alpha: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self { alpha: 0.1 }
    }
}

/// Anonymization mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizationConfig {
    /// Mode used when a request does not name one
    pub default_mode: AnonymizationMode,

    /// Map identical originals to the same substitute within one call
    pub consistent_substitution: bool,

    /// Salt mixed into substitute generation
    pub substitution_salt: Option<String>,
}

impl Default for AnonymizationConfig {
    fn default() -> Self {
        Self {
            default_mode: AnonymizationMode::Redact,
            consistent_substitution: true,
            substitution_salt: None,
        }
    }
}

/// Document extraction / reconstruction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Below this many non-whitespace characters per page, pages are OCR'd
    pub min_chars_per_page: usize,

    /// Extra pixels drawn around each visual redaction box
    pub redaction_padding: u32,

    /// Largest accepted input document in bytes
    pub max_document_bytes: usize,

    /// OCR engine configuration
    pub ocr: OcrConfig,

    /// PDF tools configuration
    pub pdf: PdfConfig,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            min_chars_per_page: 50,
            redaction_padding: 0,
            max_document_bytes: 52_428_800,
            ocr: OcrConfig::default(),
            pdf: PdfConfig::default(),
        }
    }
}

/// OCR engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract binary (name on PATH or absolute path)
    pub binary: String,

    /// Time budget for one OCR invocation
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Poppler tools used for PDF text layers and page rasters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Resolution of rendered pages
    pub dpi: u32,

    /// Time budget for one tool invocation
    pub timeout_secs: u64,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            timeout_secs: 120,
        }
    }
}

/// Job orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Time budget for each of the extraction and detection phases
    pub phase_timeout_secs: u64,

    /// Longest accepted text request, in bytes
    pub max_text_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            phase_timeout_secs: 300,
            max_text_length: 10_000_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the `anonyma` target
    pub level: String,

    /// Emit JSON log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AnonymaConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Apply `ANONYMA_*` environment variable overrides
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("ANONYMA_LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(threshold) = lookup("ANONYMA_CONFIDENCE_THRESHOLD") {
            self.detection.min_confidence = threshold.parse().map_err(|_| {
                Error::Config("ANONYMA_CONFIDENCE_THRESHOLD must be a number".to_string())
            })?;
        }
        if let Some(strategy) = lookup("ANONYMA_VOTING_STRATEGY") {
            self.detection.voting_strategy = strategy.parse()?;
        }
        if let Some(model) = lookup("ANONYMA_NER_MODEL") {
            self.detection.ner_model_path = Some(PathBuf::from(model));
        }
        Ok(self)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence must be within [0, 1], got {}",
                d.min_confidence
            )));
        }
        if d.min_votes == 0 {
            return Err(Error::Config("min_votes must be at least 1".to_string()));
        }
        if !(self.adaptive.alpha > 0.0 && self.adaptive.alpha <= 1.0) {
            return Err(Error::Config(format!(
                "adaptive.alpha must be within (0, 1], got {}",
                self.adaptive.alpha
            )));
        }
        if d.supported_languages.is_empty() {
            return Err(Error::Config(
                "supported_languages must not be empty".to_string(),
            ));
        }
        if !d.supported_languages.contains(&d.default_language) {
            return Err(Error::Config(format!(
                "default_language '{}' is not in supported_languages",
                d.default_language
            )));
        }
        for (id, weight) in &d.weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(Error::Config(format!(
                    "weight for detector '{}' must be positive",
                    id
                )));
            }
        }
        if self.pipeline.phase_timeout_secs == 0
            || self.documents.ocr.timeout_secs == 0
            || self.documents.pdf.timeout_secs == 0
        {
            return Err(Error::Config(
                "timeouts must be positive".to_string(),
            ));
        }
        if self.documents.pdf.dpi == 0 {
            return Err(Error::Config("documents.pdf.dpi must be positive".to_string()));
        }
        Ok(())
    }
}
