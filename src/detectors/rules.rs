//! Rule-based detector: regular expressions backed by structural validators

use super::validators;
use super::{resolve_overlaps, Detector, DetectorKind, DetectorVote};
use crate::error::{Error, Result};
use regex::Regex;

const LANGUAGES: &[&str] = &["it", "en"];

type Validator = fn(&str) -> bool;

struct Rule {
    entity_type: &'static str,
    pattern: Regex,
    confidence: f64,
    validator: Option<Validator>,
    /// Empty means every supported language
    languages: &'static [&'static str],
}

/// Regex + checksum detector for structured identifiers
pub struct RuleBasedDetector {
    rules: Vec<Rule>,
}

fn rule_specs() -> Vec<(
    &'static str,
    &'static str,
    f64,
    Option<Validator>,
    &'static [&'static str],
)> {
    vec![
        (
            "EMAIL",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            0.95,
            None,
            &[],
        ),
        (
            "PHONE",
            r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)[\s.-]?|\d{2,4}[\s.-])?\d{3,4}[\s.-]\d{4}\b",
            0.75,
            Some(phone_shape_valid),
            &[],
        ),
        (
            "CREDIT_CARD",
            r"\b(?:\d[ -]?){12,18}\d\b",
            0.90,
            Some(validators::luhn_valid),
            &[],
        ),
        (
            "IBAN",
            r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,3})?\b",
            0.95,
            Some(validators::iban_valid),
            &[],
        ),
        (
            "IP_ADDRESS",
            r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
            0.80,
            Some(validators::ipv4_valid),
            &[],
        ),
        (
            "DATE",
            r"\b(?:\d{1,2}[/.-]\d{1,2}[/.-]\d{4}|\d{4}-\d{2}-\d{2})\b",
            0.65,
            Some(validators::date_valid),
            &[],
        ),
        (
            "CODICE_FISCALE",
            r"(?i)\b[A-Z]{6}\d{2}[A-Z]\d{2}[A-Z]\d{3}[A-Z]\b",
            0.95,
            Some(validators::codice_fiscale_valid),
            &["it"],
        ),
        (
            "PARTITA_IVA",
            r"\b(?:IT)?\d{11}\b",
            0.85,
            Some(validators::partita_iva_valid),
            &["it"],
        ),
        (
            "US_SSN",
            r"\b\d{3}-\d{2}-\d{4}\b",
            0.85,
            Some(validators::us_ssn_valid),
            &["en"],
        ),
    ]
}

/// 7 to 15 digits in total
fn phone_shape_valid(value: &str) -> bool {
    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=15).contains(&digits)
}

impl RuleBasedDetector {
    /// Compile the built-in rule set
    pub fn new() -> Result<Self> {
        let rules = rule_specs()
            .into_iter()
            .map(|(entity_type, pattern, confidence, validator, languages)| {
                let pattern = Regex::new(pattern).map_err(|e| {
                    Error::Config(format!("Invalid built-in pattern for {}: {}", entity_type, e))
                })?;
                Ok(Rule {
                    entity_type,
                    pattern,
                    confidence,
                    validator,
                    languages,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }
}

/// Reject matches glued to a preceding word character, e.g. `ab555-0100`
fn glued_to_previous(text: &str, start: usize) -> bool {
    text[..start]
        .chars()
        .next_back()
        .map(|c| c.is_alphanumeric() || c == '_' || c == '+')
        .unwrap_or(false)
}

impl Detector for RuleBasedDetector {
    fn id(&self) -> &str {
        "rule_based"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::RuleBased
    }

    fn supported_languages(&self) -> &[&str] {
        LANGUAGES
    }

    fn entity_types(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.entity_type.to_string()).collect()
    }

    fn detect(&self, text: &str, language: &str) -> Result<Vec<DetectorVote>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut votes = Vec::new();
        for rule in &self.rules {
            if !rule.languages.is_empty() && !rule.languages.contains(&language) {
                continue;
            }
            for mat in rule.pattern.find_iter(text) {
                if rule.entity_type == "PHONE" && glued_to_previous(text, mat.start()) {
                    continue;
                }
                if let Some(validate) = rule.validator {
                    if !validate(mat.as_str()) {
                        tracing::trace!(
                            entity_type = rule.entity_type,
                            start = mat.start(),
                            end = mat.end(),
                            "Match rejected by validator"
                        );
                        continue;
                    }
                }
                votes.push(DetectorVote::new(
                    rule.entity_type,
                    mat.start(),
                    mat.end(),
                    rule.confidence,
                ));
            }
        }

        let votes = resolve_overlaps(votes);
        tracing::debug!(count = votes.len(), language, "Rule-based detection finished");
        Ok(votes)
    }
}
