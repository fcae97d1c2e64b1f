//! Anonymization modes
//!
//! A mode turns source text plus final detections into an
//! [`AnonymizedContent`]: the rewritten text and the list of replacements in
//! source offsets, which document reconstruction replays onto the original
//! structure. Modes are resolved once through [`ModeRegistry`].

pub mod redact;
pub mod substitute;
pub mod visual;

pub use redact::RedactStrategy;
pub use substitute::SubstituteStrategy;
pub use visual::VisualRedactStrategy;

use crate::config::AnonymizationConfig;
use crate::ensemble::Detection;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Output strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymizationMode {
    /// Replace each span with `[ENTITY_TYPE]`
    Redact,
    /// Replace each span with a synthetic value of the same type
    Substitute,
    /// Obscure spans on the page raster
    VisualRedact,
}

impl AnonymizationMode {
    pub const ALL: [AnonymizationMode; 3] = [
        AnonymizationMode::Redact,
        AnonymizationMode::Substitute,
        AnonymizationMode::VisualRedact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redact => "redact",
            Self::Substitute => "substitute",
            Self::VisualRedact => "visual_redact",
        }
    }
}

impl fmt::Display for AnonymizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnonymizationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "redact" => Ok(Self::Redact),
            "substitute" => Ok(Self::Substitute),
            "visual_redact" | "visual" => Ok(Self::VisualRedact),
            other => Err(Error::Config(format!("Unknown anonymization mode: {}", other))),
        }
    }
}

/// One rewritten span, in source offsets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replacement {
    pub start: usize,
    pub end: usize,
    pub entity_type: String,
    pub replacement: String,
}

/// Output of a mode
#[derive(Clone, Serialize)]
pub struct AnonymizedContent {
    pub mode: AnonymizationMode,
    /// Rewritten linear text
    pub text: String,
    /// Sorted by start, non-overlapping
    pub replacements: Vec<Replacement>,
    /// Reversal mapping `ENTITY_TYPE_n` → original value (reversible modes only)
    #[serde(skip)]
    pub mapping: Option<BTreeMap<String, String>>,
}

impl fmt::Debug for AnonymizedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnonymizedContent")
            .field("mode", &self.mode)
            .field("text_len", &self.text.len())
            .field("replacements", &self.replacements.len())
            .field(
                "mapping_keys",
                &self.mapping.as_ref().map(|m| m.keys().collect::<Vec<_>>()),
            )
            .finish()
    }
}

impl AnonymizedContent {
    /// Content that leaves `text` unchanged
    pub fn unchanged(mode: AnonymizationMode, text: &str) -> Self {
        Self {
            mode,
            text: text.to_string(),
            replacements: Vec::new(),
            mapping: None,
        }
    }

    /// Restore the original values of a reversible output
    pub fn reverse(&self) -> Option<String> {
        let mapping = self.mapping.as_ref()?;
        let mut restored = String::with_capacity(self.text.len());
        let mut cursor = 0;
        let mut out_cursor = 0;
        for (i, r) in self.replacements.iter().enumerate() {
            // position of this replacement in the rewritten text
            let out_start = out_cursor + (r.start - cursor);
            let out_end = out_start + r.replacement.len();
            restored.push_str(self.text.get(out_cursor..out_start)?);
            let key = format!("{}_{}", r.entity_type, i);
            restored.push_str(mapping.get(&key)?);
            cursor = r.end;
            out_cursor = out_end;
        }
        restored.push_str(self.text.get(out_cursor..)?);
        Some(restored)
    }
}

/// Mode contract. Implementations must be idempotent and accept an empty
/// detection list.
pub trait AnonymizationStrategy: Send + Sync {
    fn mode(&self) -> AnonymizationMode;

    fn is_reversible(&self) -> bool;

    fn anonymize(&self, text: &str, detections: &[Detection]) -> Result<AnonymizedContent>;
}

/// Reject detections that are out of range, split a character or overlap.
pub fn validate_detections(text: &str, detections: &[Detection]) -> Result<Vec<Detection>> {
    let mut sorted: Vec<Detection> = detections.to_vec();
    sorted.sort_by_key(|d| (d.start, d.end));

    for d in &sorted {
        if d.start >= d.end || d.end > text.len() {
            return Err(Error::Validation(format!(
                "Detection {} at {}..{} is out of range for text of length {}",
                d.entity_type,
                d.start,
                d.end,
                text.len()
            )));
        }
        if !text.is_char_boundary(d.start) || !text.is_char_boundary(d.end) {
            return Err(Error::Validation(format!(
                "Detection {} at {}..{} splits a character",
                d.entity_type, d.start, d.end
            )));
        }
    }
    for pair in sorted.windows(2) {
        if pair[0].end > pair[1].start {
            return Err(Error::Validation(format!(
                "Detections at {}..{} and {}..{} overlap",
                pair[0].start, pair[0].end, pair[1].start, pair[1].end
            )));
        }
    }
    Ok(sorted)
}

/// Apply sorted, non-overlapping replacements to `text`, last span first.
pub fn apply_replacements(text: &str, replacements: &[Replacement]) -> String {
    let mut result = text.to_string();
    for r in replacements.iter().rev() {
        result.replace_range(r.start..r.end, &r.replacement);
    }
    result
}

/// Resolves each [`AnonymizationMode`] to its strategy
pub struct ModeRegistry {
    strategies: BTreeMap<&'static str, Arc<dyn AnonymizationStrategy>>,
}

impl ModeRegistry {
    pub fn new(config: &AnonymizationConfig) -> Self {
        let mut registry = Self {
            strategies: BTreeMap::new(),
        };
        registry.register(Arc::new(RedactStrategy));
        registry.register(Arc::new(SubstituteStrategy::new(
            config.consistent_substitution,
            config.substitution_salt.clone(),
        )));
        registry.register(Arc::new(VisualRedactStrategy::default()));
        registry
    }

    /// Register or replace the strategy for its mode
    pub fn register(&mut self, strategy: Arc<dyn AnonymizationStrategy>) {
        self.strategies.insert(strategy.mode().as_str(), strategy);
    }

    pub fn get(&self, mode: AnonymizationMode) -> Result<Arc<dyn AnonymizationStrategy>> {
        self.strategies
            .get(mode.as_str())
            .cloned()
            .ok_or_else(|| Error::Config(format!("No strategy registered for mode {}", mode)))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::ensemble::Detection;

    /// Build a detection over `needle` in `text`
    pub fn detection(text: &str, needle: &str, entity_type: &str) -> Detection {
        let start = text.find(needle).unwrap();
        Detection {
            text: needle.to_string(),
            entity_type: entity_type.to_string(),
            start,
            end: start + needle.len(),
            confidence: 0.9,
            detectors: vec!["rule_based".to_string()],
            vote_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::detection;
    use super::*;

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!(
            "visual-redact".parse::<AnonymizationMode>().unwrap(),
            AnonymizationMode::VisualRedact
        );
        assert_eq!(AnonymizationMode::Substitute.to_string(), "substitute");
        assert!("shred".parse::<AnonymizationMode>().is_err());
        let json = serde_json::to_string(&AnonymizationMode::VisualRedact).unwrap();
        assert_eq!(json, "\"visual_redact\"");
    }

    #[test]
    fn test_validate_detections() {
        let text = "Mario Rossi, Roma";
        let ok = vec![detection(text, "Roma", "LOCATION"), detection(text, "Mario Rossi", "PERSON")];
        let sorted = validate_detections(text, &ok).unwrap();
        assert_eq!(sorted[0].entity_type, "PERSON");

        let mut overlapping = ok.clone();
        overlapping.push(detection(text, "Rossi", "PERSON"));
        assert!(matches!(
            validate_detections(text, &overlapping),
            Err(Error::Validation(_))
        ));

        let mut out_of_range = detection(text, "Roma", "LOCATION");
        out_of_range.end = 100;
        assert!(validate_detections(text, &[out_of_range]).is_err());
    }

    #[test]
    fn test_validate_rejects_split_characters() {
        let text = "città";
        let mut d = detection(text, "citt", "X");
        d.end = 5;
        assert!(validate_detections(text, &[d]).is_err());
    }

    #[test]
    fn test_registry_resolves_every_mode() {
        let registry = ModeRegistry::new(&AnonymizationConfig::default());
        for mode in AnonymizationMode::ALL {
            assert_eq!(registry.get(mode).unwrap().mode(), mode);
        }
        assert!(registry.get(AnonymizationMode::Substitute).unwrap().is_reversible());
        assert!(!registry.get(AnonymizationMode::Redact).unwrap().is_reversible());
    }

    #[test]
    fn test_apply_replacements() {
        let text = "ab cd ef";
        let replacements = vec![
            Replacement {
                start: 0,
                end: 2,
                entity_type: "X".into(),
                replacement: "[X]".into(),
            },
            Replacement {
                start: 6,
                end: 8,
                entity_type: "Y".into(),
                replacement: "".into(),
            },
        ];
        assert_eq!(apply_replacements(text, &replacements), "[X] cd ");
    }
}
