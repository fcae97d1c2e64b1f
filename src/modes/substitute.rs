//! Synthetic substitution
//!
//! Each span is replaced with a generated value of the same entity type.
//! Generation is seeded from a SHA-256 digest of the entity type, the original
//! value and an optional salt, so the same input always yields the same
//! output. A generated value never equals the value it replaces.

use super::{
    apply_replacements, validate_detections, AnonymizationMode, AnonymizationStrategy,
    AnonymizedContent, Replacement,
};
use crate::detectors::validators::{codice_fiscale_check_char, partita_iva_check_digit};
use crate::ensemble::Detection;
use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

const MAX_ATTEMPTS: u32 = 16;

const FIRST_NAMES: &[&str] = &[
    "Luca", "Giulia", "Marco", "Chiara", "Paolo", "Elena", "Davide", "Sara", "Alessio", "Irene",
    "Oliver", "Grace", "Henry", "Chloe", "Samuel", "Ruby",
];
const LAST_NAMES: &[&str] = &[
    "Bianchi", "Ferrari", "Esposito", "Romano", "Colombo", "Ricci", "Marino", "Greco", "Conti",
    "Gallo", "Turner", "Hughes", "Parker", "Bennett", "Foster", "Hayes",
];
const CITIES: &[&str] = &[
    "Ancona", "Lecce", "Trento", "Perugia", "Cagliari", "Udine", "Pescara", "Siena", "Leeds",
    "Denver", "Porto", "Lyon",
];
const ORG_NAMES: &[&str] = &[
    "Aurora", "Delta", "Orion", "Vega", "Nordica", "Solaris", "Altair", "Meridiana",
];
const ORG_SUFFIXES: &[&str] = &["S.p.A.", "S.r.l.", "Ltd", "Inc."];
const EMAIL_DOMAINS: &[&str] = &["example.org", "example.net", "mail.test", "posta.test"];
const CF_MONTHS: &[u8] = b"ABCDEHLMPRST";

type Generator = fn(&mut StdRng, &str) -> String;

fn pick(rng: &mut StdRng, list: &[&'static str]) -> &'static str {
    list[rng.gen_range(0..list.len())]
}

fn random_digits(rng: &mut StdRng, n: usize) -> String {
    (0..n)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn random_letters(rng: &mut StdRng, n: usize) -> String {
    (0..n)
        .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
        .collect()
}

fn gen_person(rng: &mut StdRng, original: &str) -> String {
    let first = pick(rng, FIRST_NAMES);
    if original.split_whitespace().count() <= 1 {
        first.to_string()
    } else {
        format!("{} {}", first, pick(rng, LAST_NAMES))
    }
}

fn gen_email(rng: &mut StdRng, _original: &str) -> String {
    format!(
        "{}.{}{}@{}",
        pick(rng, FIRST_NAMES).to_lowercase(),
        pick(rng, LAST_NAMES).to_lowercase(),
        rng.gen_range(10..100),
        pick(rng, EMAIL_DOMAINS)
    )
}

/// Same layout as the original, every digit redrawn
fn gen_phone(rng: &mut StdRng, original: &str) -> String {
    original
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                char::from(b'0' + rng.gen_range(0..10u8))
            } else {
                c
            }
        })
        .collect()
}

fn gen_location(rng: &mut StdRng, _original: &str) -> String {
    pick(rng, CITIES).to_string()
}

fn gen_organization(rng: &mut StdRng, _original: &str) -> String {
    format!("{} {}", pick(rng, ORG_NAMES), pick(rng, ORG_SUFFIXES))
}

/// Luhn-valid number laid out like the original
fn gen_credit_card(rng: &mut StdRng, original: &str) -> String {
    let count = original.chars().filter(|c| c.is_ascii_digit()).count().max(13);
    let mut digits: Vec<u32> = vec![4];
    while digits.len() < count - 1 {
        digits.push(rng.gen_range(0..10));
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    digits.push((10 - sum % 10) % 10);

    let mut fresh = digits.into_iter();
    let mut out: String = original
        .chars()
        .filter_map(|c| {
            if c.is_ascii_digit() {
                fresh.next().and_then(|d| char::from_digit(d, 10))
            } else {
                Some(c)
            }
        })
        .collect();
    out.extend(fresh.filter_map(|d| char::from_digit(d, 10)));
    out
}

/// Valid IBAN with the original's country and length
fn gen_iban(rng: &mut StdRng, original: &str) -> String {
    let compact: String = original.chars().filter(|c| !c.is_whitespace()).collect();
    let country: String = compact
        .chars()
        .take(2)
        .filter(|c| c.is_ascii_uppercase())
        .collect();
    let country = if country.len() == 2 { country } else { "IT".to_string() };
    let bban_len = compact.len().saturating_sub(4).max(11);
    let bban = if country == "IT" {
        format!("{}{}", random_letters(rng, 1), random_digits(rng, bban_len - 1))
    } else {
        random_digits(rng, bban_len)
    };

    let rearranged = format!("{}{}00", bban, country);
    let mut remainder: u64 = 0;
    for c in rearranged.chars() {
        let value = match c.to_digit(36) {
            Some(v) => v as u64,
            None => 0,
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    format!("{}{:02}{}", country, 98 - remainder, bban)
}

fn gen_codice_fiscale(rng: &mut StdRng, _original: &str) -> String {
    let month = char::from(CF_MONTHS[rng.gen_range(0..CF_MONTHS.len())]);
    let day = rng.gen_range(1..=28) + if rng.gen_bool(0.5) { 40 } else { 0 };
    let body = format!(
        "{}{}{}{:02}{}{}",
        random_letters(rng, 6),
        random_digits(rng, 2),
        month,
        day,
        random_letters(rng, 1),
        random_digits(rng, 3)
    );
    match codice_fiscale_check_char(&body) {
        Some(check) => format!("{}{}", body, check),
        None => format!("{}X", body),
    }
}

fn gen_partita_iva(rng: &mut StdRng, original: &str) -> String {
    let body = format!("{}{}", rng.gen_range(1..10), random_digits(rng, 9));
    let check = partita_iva_check_digit(&body).unwrap_or(0);
    let prefix = if original.starts_with("IT") { "IT" } else { "" };
    format!("{}{}{}", prefix, body, check)
}

/// Address from the documentation ranges (RFC 5737)
fn gen_ip(rng: &mut StdRng, _original: &str) -> String {
    let nets = ["192.0.2", "198.51.100", "203.0.113"];
    format!("{}.{}", nets[rng.gen_range(0..nets.len())], rng.gen_range(1..255))
}

/// Random calendar date in the original's layout
fn gen_date(rng: &mut StdRng, original: &str) -> String {
    let year = rng.gen_range(1950..2020);
    let month = rng.gen_range(1..=12);
    let day = rng.gen_range(1..=28);
    let iso = original.len() == 10 && original.as_bytes().get(4) == Some(&b'-');
    if iso {
        format!("{:04}-{:02}-{:02}", year, month, day)
    } else {
        let sep = original
            .chars()
            .find(|c| matches!(c, '/' | '-' | '.'))
            .unwrap_or('/');
        format!("{:02}{sep}{:02}{sep}{:04}", day, month, year, sep = sep)
    }
}

fn gen_ssn(rng: &mut StdRng, _original: &str) -> String {
    let mut area = rng.gen_range(100..900);
    if area == 666 {
        area = 667;
    }
    format!(
        "{:03}-{:02}-{:04}",
        area,
        rng.gen_range(1..100),
        rng.gen_range(1..10000)
    )
}

fn generator_for(entity_type: &str) -> Option<Generator> {
    let generator: Generator = match entity_type {
        "PERSON" | "PER" => gen_person,
        "EMAIL" | "EMAIL_ADDRESS" => gen_email,
        "PHONE" | "PHONE_NUMBER" => gen_phone,
        "LOCATION" | "LOC" => gen_location,
        "ORGANIZATION" | "ORG" => gen_organization,
        "CREDIT_CARD" => gen_credit_card,
        "IBAN" | "IBAN_CODE" => gen_iban,
        "CODICE_FISCALE" => gen_codice_fiscale,
        "PARTITA_IVA" => gen_partita_iva,
        "IP_ADDRESS" => gen_ip,
        "DATE" | "DATE_TIME" => gen_date,
        "US_SSN" => gen_ssn,
        _ => return None,
    };
    Some(generator)
}

/// `EMPLOYEE_ID` → `[Employee Id]`
fn placeholder(entity_type: &str) -> String {
    let words: Vec<String> = entity_type
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let lower = w.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    format!("[{}]", words.join(" "))
}

/// Synthetic value substitution
#[derive(Debug, Clone)]
pub struct SubstituteStrategy {
    consistent: bool,
    salt: Option<String>,
}

impl Default for SubstituteStrategy {
    fn default() -> Self {
        Self::new(true, None)
    }
}

impl SubstituteStrategy {
    pub fn new(consistent: bool, salt: Option<String>) -> Self {
        Self { consistent, salt }
    }

    fn seed(&self, entity_type: &str, original: &str, occurrence: usize, attempt: u32) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(entity_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(original.as_bytes());
        hasher.update([0u8]);
        if let Some(salt) = &self.salt {
            hasher.update(salt.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update((occurrence as u64).to_le_bytes());
        hasher.update(attempt.to_le_bytes());
        hasher.finalize().into()
    }

    /// Generate a substitute for one value; never returns `original`
    pub fn substitute(&self, entity_type: &str, original: &str, occurrence: usize) -> String {
        let fallback = placeholder(entity_type);
        let Some(generate) = generator_for(entity_type) else {
            return fallback;
        };
        for attempt in 0..MAX_ATTEMPTS {
            let mut rng = StdRng::from_seed(self.seed(entity_type, original, occurrence, attempt));
            let candidate = generate(&mut rng, original);
            if !candidate.trim().eq_ignore_ascii_case(original.trim()) {
                return candidate;
            }
        }
        fallback
    }
}

impl AnonymizationStrategy for SubstituteStrategy {
    fn mode(&self) -> AnonymizationMode {
        AnonymizationMode::Substitute
    }

    fn is_reversible(&self) -> bool {
        true
    }

    fn anonymize(&self, text: &str, detections: &[Detection]) -> Result<AnonymizedContent> {
        let sorted = validate_detections(text, detections)?;

        let mut assigned: HashMap<(&str, &str), String> = HashMap::new();
        let mut mapping = BTreeMap::new();
        let mut replacements = Vec::with_capacity(sorted.len());

        for (i, d) in sorted.iter().enumerate() {
            let original = &text[d.start..d.end];
            let key = (d.entity_type.as_str(), original);
            let value = match assigned.get(&key) {
                Some(existing) if self.consistent => existing.clone(),
                _ => {
                    let occurrence = if self.consistent { 0 } else { i };
                    let value = self.substitute(&d.entity_type, original, occurrence);
                    assigned.insert(key, value.clone());
                    value
                }
            };
            mapping.insert(format!("{}_{}", d.entity_type, i), original.to_string());
            replacements.push(Replacement {
                start: d.start,
                end: d.end,
                entity_type: d.entity_type.clone(),
                replacement: value,
            });
        }

        tracing::debug!(
            count = replacements.len(),
            distinct = assigned.len(),
            "Substituted spans"
        );
        Ok(AnonymizedContent {
            mode: AnonymizationMode::Substitute,
            text: apply_replacements(text, &replacements),
            replacements,
            mapping: Some(mapping),
        })
    }
}
