//! Label redaction: every span becomes `[ENTITY_TYPE]`

use super::{
    apply_replacements, validate_detections, AnonymizationMode, AnonymizationStrategy,
    AnonymizedContent, Replacement,
};
use crate::ensemble::Detection;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct RedactStrategy;

impl AnonymizationStrategy for RedactStrategy {
    fn mode(&self) -> AnonymizationMode {
        AnonymizationMode::Redact
    }

    fn is_reversible(&self) -> bool {
        false
    }

    fn anonymize(&self, text: &str, detections: &[Detection]) -> Result<AnonymizedContent> {
        let sorted = validate_detections(text, detections)?;
        let replacements: Vec<Replacement> = sorted
            .iter()
            .map(|d| Replacement {
                start: d.start,
                end: d.end,
                entity_type: d.entity_type.clone(),
                replacement: format!("[{}]", d.entity_type),
            })
            .collect();

        tracing::debug!(count = replacements.len(), "Redacted spans");
        Ok(AnonymizedContent {
            mode: AnonymizationMode::Redact,
            text: apply_replacements(text, &replacements),
            replacements,
            mapping: None,
        })
    }
}
