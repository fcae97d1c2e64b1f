//! Custom-pattern detector
//!
//! User-registered regular expressions, each with an entity type, a fixed
//! confidence and an optional validation callback. Patterns are registered
//! before the detector is handed to a pipeline; afterwards the detector is
//! shared read-only.

use super::{Detector, DetectorKind, DetectorVote};
use crate::config::{DetectionConfig, PatternSet};
use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::sync::Arc;

/// Validation callback applied to every match of a pattern
pub type MatchValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A user-declared pattern
#[derive(Clone)]
pub struct CustomPattern {
    /// Entity type emitted for matches
    pub name: String,
    pub pattern: String,
    pub confidence: f64,
    pub description: String,
    pub case_insensitive: bool,
    pub validator: Option<MatchValidator>,
}

impl fmt::Debug for CustomPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPattern")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("confidence", &self.confidence)
            .field("case_insensitive", &self.case_insensitive)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl CustomPattern {
    /// New case-insensitive pattern with confidence 0.9
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            confidence: 0.9,
            description: String::new(),
            case_insensitive: true,
            validator: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_insensitive = false;
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    fn compile(&self) -> Result<Regex> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Custom pattern name cannot be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::Config(format!(
                "Confidence for pattern '{}' must be within [0, 1], got {}",
                self.name, self.confidence
            )));
        }
        RegexBuilder::new(&self.pattern)
            .case_insensitive(self.case_insensitive)
            .build()
            .map_err(|e| {
                Error::Config(format!("Invalid regex pattern for '{}': {}", self.name, e))
            })
    }
}

struct CompiledPattern {
    pattern: CustomPattern,
    regex: Regex,
}

/// Detector over user-registered patterns, in registration order
#[derive(Default)]
pub struct CustomPatternDetector {
    patterns: Vec<CompiledPattern>,
}

impl CustomPatternDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector preloaded with a built-in collection
    pub fn with_set(set: PatternSet) -> Result<Self> {
        let mut detector = Self::new();
        detector.add_set(set)?;
        Ok(detector)
    }

    /// Build from the `detection` configuration section
    pub fn from_config(config: &DetectionConfig) -> Result<Self> {
        let mut detector = Self::new();
        for set in &config.pattern_sets {
            detector.add_set(*set)?;
        }
        for p in &config.patterns {
            let mut pattern = CustomPattern::new(&p.name, &p.pattern)
                .with_confidence(p.confidence)
                .with_description(&p.description);
            pattern.case_insensitive = p.case_insensitive;
            detector.add_pattern(pattern)?;
        }
        Ok(detector)
    }

    /// Register a pattern; re-registering a name replaces it in place
    pub fn add_pattern(&mut self, pattern: CustomPattern) -> Result<()> {
        let regex = pattern.compile()?;
        let compiled = CompiledPattern { pattern, regex };

        match self
            .patterns
            .iter_mut()
            .find(|p| p.pattern.name == compiled.pattern.name)
        {
            Some(existing) => {
                tracing::warn!("Overwriting existing custom pattern: {}", compiled.pattern.name);
                *existing = compiled;
            }
            None => {
                tracing::info!(
                    confidence = compiled.pattern.confidence,
                    "Added custom pattern: {}",
                    compiled.pattern.name
                );
                self.patterns.push(compiled);
            }
        }
        Ok(())
    }

    /// Register every pattern of a built-in collection
    pub fn add_set(&mut self, set: PatternSet) -> Result<()> {
        for pattern in predefined(set) {
            self.add_pattern(pattern)?;
        }
        Ok(())
    }

    /// Remove a pattern by name, returning whether it existed
    pub fn remove_pattern(&mut self, name: &str) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.pattern.name != name);
        let removed = self.patterns.len() != before;
        if removed {
            tracing::info!("Removed custom pattern: {}", name);
        }
        removed
    }

    pub fn get_pattern(&self, name: &str) -> Option<&CustomPattern> {
        self.patterns
            .iter()
            .find(|p| p.pattern.name == name)
            .map(|p| &p.pattern)
    }

    /// Registered pattern names in registration order
    pub fn list_patterns(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.pattern.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Built-in pattern collections
pub fn predefined(set: PatternSet) -> Vec<CustomPattern> {
    let exact = |name: &str, pattern: &str, confidence: f64, description: &str| {
        CustomPattern::new(name, pattern)
            .with_confidence(confidence)
            .with_description(description)
            .case_sensitive()
    };
    match set {
        PatternSet::InternalIds => vec![
            exact("EMPLOYEE_ID", r"\bEMP-\d{6,8}\b", 0.95, "Employee ID"),
            exact("PROJECT_CODE", r"\bPRJ-[A-Z]{3,5}-\d{4}\b", 0.95, "Project code"),
            exact("DOCUMENT_ID", r"\bDOC-\d{8,10}\b", 0.95, "Document ID"),
            exact("CONTRACT_ID", r"\bCTR-[A-Z]{2}\d{6}\b", 0.95, "Contract ID"),
        ],
        PatternSet::Compounds => vec![
            exact(
                "COMPOUND_ID",
                r"\bCompound-[A-Z]{3,5}-\d{3,6}\b",
                0.95,
                "Chemical compound identifier",
            ),
            exact("CAS_NUMBER", r"\b\d{2,7}-\d{2}-\d\b", 0.90, "CAS Registry Number"),
            exact("DRUG_CODE", r"\bDRG-[A-Z0-9]{4,8}\b", 0.95, "Drug code identifier"),
        ],
    }
}

impl Detector for CustomPatternDetector {
    fn id(&self) -> &str {
        "custom_patterns"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::CustomPattern
    }

    fn supported_languages(&self) -> &[&str] {
        &[]
    }

    fn entity_types(&self) -> Vec<String> {
        self.list_patterns()
    }

    fn detect(&self, text: &str, _language: &str) -> Result<Vec<DetectorVote>> {
        if text.is_empty() || self.patterns.is_empty() {
            return Ok(Vec::new());
        }

        let mut votes = Vec::new();
        for compiled in &self.patterns {
            for mat in compiled.regex.find_iter(text) {
                if mat.start() == mat.end() {
                    continue;
                }
                if let Some(validate) = &compiled.pattern.validator {
                    if !validate(mat.as_str()) {
                        tracing::debug!(
                            entity_type = %compiled.pattern.name,
                            start = mat.start(),
                            end = mat.end(),
                            "Match failed validation"
                        );
                        continue;
                    }
                }
                votes.push(DetectorVote::new(
                    compiled.pattern.name.clone(),
                    mat.start(),
                    mat.end(),
                    compiled.pattern.confidence,
                ));
            }
        }

        votes.sort_by_key(|v| v.start);
        tracing::debug!(
            patterns = self.patterns.len(),
            count = votes.len(),
            "Custom pattern detection finished"
        );
        Ok(votes)
    }
}
