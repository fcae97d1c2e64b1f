//! Statistical named-entity detector
//!
//! A linear token tagger: each token gets a probability per label,
//! `sigmoid(bias + Σ wᵢ·fᵢ)`, over a small set of binary features.
//! Accepted neighbouring tokens of one label merge into a single span whose
//! confidence is the mean token probability. Weights and lexicons live in a
//! JSON [`NerModel`]; a built-in model covers Italian and English.

use super::{Detector, DetectorKind, DetectorVote};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Binary token features
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Capitalized,
    AllCaps,
    FirstName,
    Location,
    OrgSuffix,
    NextOrgSuffix,
    TitlePrev,
    PrepositionPrev,
    /// Previous token was accepted with the same label, one space apart
    Continuation,
    SentenceStart,
    Stopword,
    HasDigit,
}

/// Bias and feature weights for one label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelWeights {
    pub bias: f64,
    pub features: BTreeMap<Feature, f64>,
}

/// Word lists consulted by the feature extractor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Lexicons {
    pub first_names: Vec<String>,
    pub locations: Vec<String>,
    pub org_suffixes: Vec<String>,
    pub titles: Vec<String>,
    pub prepositions: Vec<String>,
    pub stopwords: Vec<String>,
}

/// Serialized tagger model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NerModel {
    pub version: String,
    /// Minimum token probability to accept a label
    pub threshold: f64,
    pub labels: BTreeMap<String, LabelWeights>,
    pub lexicons: Lexicons,
}

fn words(list: &str) -> Vec<String> {
    list.split_whitespace().map(str::to_string).collect()
}

fn weights(bias: f64, features: &[(Feature, f64)]) -> LabelWeights {
    LabelWeights {
        bias,
        features: features.iter().copied().collect(),
    }
}

impl NerModel {
    /// Built-in Italian/English model
    pub fn builtin() -> Self {
        use Feature::*;

        let mut labels = BTreeMap::new();
        labels.insert(
            "PERSON".to_string(),
            weights(
                -3.0,
                &[
                    (Capitalized, 1.0),
                    (AllCaps, -1.0),
                    (FirstName, 3.5),
                    (TitlePrev, 3.0),
                    (Continuation, 3.2),
                    (SentenceStart, -1.0),
                    (Stopword, -4.0),
                    (HasDigit, -5.0),
                ],
            ),
        );
        labels.insert(
            "ORGANIZATION".to_string(),
            weights(
                -3.0,
                &[
                    (Capitalized, 1.0),
                    (AllCaps, 0.5),
                    (OrgSuffix, 4.5),
                    (NextOrgSuffix, 3.0),
                    (Continuation, 3.2),
                    (SentenceStart, -1.0),
                    (Stopword, -4.0),
                    (HasDigit, -2.0),
                ],
            ),
        );
        labels.insert(
            "LOCATION".to_string(),
            weights(
                -3.0,
                &[
                    (Capitalized, 1.0),
                    (AllCaps, -1.0),
                    (Location, 4.0),
                    (PrepositionPrev, 1.0),
                    (Continuation, 3.2),
                    (SentenceStart, -1.0),
                    (Stopword, -4.0),
                    (HasDigit, -5.0),
                ],
            ),
        );

        Self {
            version: "builtin-1".to_string(),
            threshold: 0.5,
            labels,
            lexicons: Lexicons {
                first_names: words(
                    "John Mary James Robert Michael William David Richard Thomas Daniel Peter \
                     Sarah Emma Linda Susan Jennifer Elizabeth Alice Laura Anna Maria Mario \
                     Giuseppe Giovanni Marco Luca Paolo Alessandro Andrea Matteo Stefano Roberto \
                     Antonio Francesco Luigi Franco Giulia Francesca Chiara Sara Elena Paola \
                     Lucia Valentina Federica Martina Simone Davide Giorgio Alberto Silvia",
                ),
                locations: words(
                    "Roma Rome Milano Milan Napoli Naples Torino Turin Firenze Florence Venezia \
                     Venice Bologna Genova Genoa Palermo Bari Verona Padova Trieste Italia Italy \
                     Londra London Parigi Paris Berlino Berlin Madrid Europa Europe America \
                     Boston Chicago California Texas Germany Germania France Francia Spain Spagna",
                ),
                org_suffixes: words("spa srl srls snc sas inc ltd llc gmbh corp plc ag"),
                titles: words("mr mrs ms dr prof sig sig.ra dott dott.ssa ing avv"),
                prepositions: words("a in da di at from to near of"),
                stopwords: words(
                    "the this that these those a an and or but dear hello hi please contact \
                     phone email il lo la i gli le un una uno e o ma caro cara gentile ciao \
                     monday tuesday wednesday thursday friday saturday sunday january february \
                     march april may june july august september october november december \
                     lunedì martedì mercoledì giovedì venerdì sabato domenica gennaio febbraio \
                     marzo aprile maggio giugno luglio agosto settembre ottobre novembre dicembre",
                ),
            },
        }
    }

    /// Load a model from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ModelLoading(format!("Cannot read NER model {}: {}", path.display(), e))
        })?;
        let model: NerModel = serde_json::from_str(&content).map_err(|e| {
            Error::ModelLoading(format!("Corrupt NER model {}: {}", path.display(), e))
        })?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(Error::ModelLoading("NER model has no labels".to_string()));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(Error::ModelLoading(format!(
                "NER model threshold must be within (0, 1), got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

enum ModelState {
    Ready(CompiledModel),
    Unavailable(String),
}

struct CompiledModel {
    model: NerModel,
    first_names: HashSet<String>,
    locations: HashSet<String>,
    org_suffixes: HashSet<String>,
    titles: HashSet<String>,
    prepositions: HashSet<String>,
    stopwords: HashSet<String>,
}

impl CompiledModel {
    fn new(model: NerModel) -> Self {
        let lower = |list: &[String]| -> HashSet<String> {
            list.iter().map(|w| w.to_lowercase()).collect()
        };
        let exact = |list: &[String]| -> HashSet<String> { list.iter().cloned().collect() };
        let lex = &model.lexicons;
        Self {
            first_names: exact(&lex.first_names),
            locations: exact(&lex.locations),
            org_suffixes: lower(&lex.org_suffixes),
            titles: lower(&lex.titles),
            prepositions: lower(&lex.prepositions),
            stopwords: lower(&lex.stopwords),
            model,
        }
    }
}

#[derive(Debug)]
struct Token<'a> {
    start: usize,
    end: usize,
    text: &'a str,
}

/// Sequence-tagging NER detector
pub struct NeuralNerDetector {
    state: ModelState,
}

const LANGUAGES: &[&str] = &["it", "en"];

impl NeuralNerDetector {
    /// Create a detector from an in-memory model
    pub fn new(model: NerModel) -> Self {
        let state = match model.validate() {
            Ok(()) => ModelState::Ready(CompiledModel::new(model)),
            Err(e) => ModelState::Unavailable(e.to_string()),
        };
        Self { state }
    }

    /// Create a detector from a model file.
    ///
    /// A missing or corrupt file does not fail construction: the detector is
    /// kept and every call reports a model loading error instead.
    pub fn from_path(path: &Path) -> Self {
        match NerModel::load(path) {
            Ok(model) => {
                tracing::info!(version = %model.version, "NER model loaded");
                Self::new(model)
            }
            Err(e) => {
                tracing::warn!("NER model unavailable, detector will contribute no votes: {}", e);
                Self {
                    state: ModelState::Unavailable(e.to_string()),
                }
            }
        }
    }

    /// Whether the model is available
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    fn tokenize<'a>(&self, text: &'a str) -> Vec<Token<'a>> {
        let mut tokens = Vec::new();
        let mut offset = 0;
        for chunk in text.split(char::is_whitespace) {
            let chunk_start = offset;
            offset += chunk.len() + next_char_len(text, chunk_start + chunk.len());
            // addresses and URLs belong to the rule-based detector
            if chunk.is_empty()
                || chunk.contains('@')
                || chunk.contains("://")
                || chunk.starts_with("www.")
            {
                continue;
            }
            let mut word_start: Option<usize> = None;
            for (i, c) in chunk.char_indices() {
                let in_word = match word_start {
                    None => c.is_alphabetic(),
                    Some(_) => c.is_alphanumeric() || matches!(c, '\'' | '’' | '-'),
                };
                match (in_word, word_start) {
                    (true, None) => word_start = Some(i),
                    (false, Some(ws)) => {
                        tokens.push(token(text, chunk_start + ws, chunk_start + i));
                        word_start = None;
                    }
                    _ => {}
                }
            }
            if let Some(ws) = word_start {
                tokens.push(token(text, chunk_start + ws, chunk_start + chunk.len()));
            }
        }
        tokens
    }

    fn features(
        &self,
        compiled: &CompiledModel,
        text: &str,
        tokens: &[Token<'_>],
        i: usize,
    ) -> Vec<Feature> {
        let token = &tokens[i];
        let word = token
            .text
            .trim_end_matches(|c: char| matches!(c, '\'' | '’' | '-'));
        let lower = word.to_lowercase();
        let mut out = Vec::new();

        let first_upper = word.chars().next().map(char::is_uppercase).unwrap_or(false);
        let letters: Vec<char> = word.chars().filter(|c| c.is_alphabetic()).collect();
        let all_caps = letters.len() > 1 && letters.iter().all(|c| c.is_uppercase());

        if first_upper {
            out.push(Feature::Capitalized);
        }
        if all_caps {
            out.push(Feature::AllCaps);
        }
        if first_upper && compiled.first_names.contains(word) {
            out.push(Feature::FirstName);
        }
        if first_upper && compiled.locations.contains(word) {
            out.push(Feature::Location);
        }
        if compiled.org_suffixes.contains(&lower) {
            out.push(Feature::OrgSuffix);
        }
        if compiled.stopwords.contains(&lower) {
            out.push(Feature::Stopword);
        }
        if word.chars().any(|c| c.is_numeric()) {
            out.push(Feature::HasDigit);
        }

        if let Some(next) = tokens.get(i + 1) {
            let gap = &text[token.end..next.start];
            let next_lower = next.text.to_lowercase();
            if gap.chars().all(|c| c.is_whitespace() || c == ',')
                && compiled.org_suffixes.contains(&next_lower)
            {
                out.push(Feature::NextOrgSuffix);
            }
        }

        let prev = i.checked_sub(1).map(|p| &tokens[p]);
        let mut after_title = false;
        if let Some(prev) = prev {
            let gap = &text[prev.end..token.start];
            let prev_lower = prev.text.to_lowercase();
            if compiled.titles.contains(&prev_lower)
                && gap.chars().all(|c| c.is_whitespace() || c == '.')
            {
                after_title = true;
                out.push(Feature::TitlePrev);
            }
            if compiled.prepositions.contains(&prev_lower) && gap.chars().all(char::is_whitespace)
            {
                out.push(Feature::PrepositionPrev);
            }
        }

        let before = &text[..token.start];
        let trimmed = before.trim_end();
        let line_start = before[trimmed.len()..].contains('\n');
        let sentence_start = trimmed.is_empty()
            || line_start
            || (!after_title && trimmed.ends_with(|c: char| matches!(c, '.' | '!' | '?' | ':')));
        if sentence_start {
            out.push(Feature::SentenceStart);
        }

        out
    }

    fn tag(&self, compiled: &CompiledModel, text: &str) -> Vec<DetectorVote> {
        let tokens = self.tokenize(text);
        let model = &compiled.model;

        // (label, probability) per accepted token
        let mut accepted: Vec<Option<(&str, f64)>> = Vec::with_capacity(tokens.len());

        for i in 0..tokens.len() {
            let base = self.features(compiled, text, &tokens, i);
            let prev_label = i
                .checked_sub(1)
                .and_then(|p| accepted[p].map(|(label, _)| (label, p)))
                .filter(|(_, p)| &text[tokens[*p].end..tokens[i].start] == " ")
                .map(|(label, _)| label);

            let mut best: Option<(&str, f64)> = None;
            for (label, lw) in &model.labels {
                let mut score = lw.bias;
                for feature in &base {
                    score += lw.features.get(feature).copied().unwrap_or(0.0);
                }
                if prev_label == Some(label.as_str()) {
                    score += lw
                        .features
                        .get(&Feature::Continuation)
                        .copied()
                        .unwrap_or(0.0);
                }
                let p = sigmoid(score);
                if best.map(|(_, bp)| p > bp).unwrap_or(true) {
                    best = Some((label.as_str(), p));
                }
            }

            accepted.push(best.filter(|(_, p)| *p >= model.threshold));
        }

        let mut votes: Vec<DetectorVote> = Vec::new();
        let mut current: Option<(&str, usize, usize, Vec<f64>)> = None;
        for (i, decision) in accepted.iter().enumerate() {
            let token = &tokens[i];
            let extends = match (decision, &current) {
                (Some((label, _)), Some((cur_label, _, end, _))) => {
                    cur_label == label && &text[*end..token.start] == " "
                }
                _ => false,
            };
            if extends {
                if let (Some((_, p)), Some(span)) = (decision, current.as_mut()) {
                    span.2 = token.end;
                    span.3.push(*p);
                }
                continue;
            }
            if let Some(done) = current.take() {
                votes.push(span_vote(done));
            }
            if let Some((label, p)) = decision {
                current = Some((*label, token.start, token.end, vec![*p]));
            }
        }
        if let Some(done) = current.take() {
            votes.push(span_vote(done));
        }
        votes
    }
}

fn token(text: &str, start: usize, end: usize) -> Token<'_> {
    Token {
        start,
        end,
        text: &text[start..end],
    }
}

/// Byte length of the separator char at `at`, or 0 at the end of text
fn next_char_len(text: &str, at: usize) -> usize {
    text[at..].chars().next().map(char::len_utf8).unwrap_or(0)
}

fn span_vote((label, start, end, probs): (&str, usize, usize, Vec<f64>)) -> DetectorVote {
    let mean = probs.iter().sum::<f64>() / probs.len().max(1) as f64;
    DetectorVote::new(label, start, end, mean)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Detector for NeuralNerDetector {
    fn id(&self) -> &str {
        "neural_ner"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::NeuralSequence
    }

    fn supported_languages(&self) -> &[&str] {
        LANGUAGES
    }

    fn entity_types(&self) -> Vec<String> {
        match &self.state {
            ModelState::Ready(compiled) => compiled.model.labels.keys().cloned().collect(),
            ModelState::Unavailable(_) => Vec::new(),
        }
    }

    fn version(&self) -> &str {
        match &self.state {
            ModelState::Ready(compiled) => &compiled.model.version,
            ModelState::Unavailable(_) => "unavailable",
        }
    }

    fn detect(&self, text: &str, language: &str) -> Result<Vec<DetectorVote>> {
        let compiled = match &self.state {
            ModelState::Ready(compiled) => compiled,
            ModelState::Unavailable(reason) => {
                return Err(Error::ModelLoading(reason.clone()));
            }
        };
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let votes = self.tag(compiled, text);
        tracing::debug!(count = votes.len(), language, "NER tagging finished");
        Ok(votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> NeuralNerDetector {
        NeuralNerDetector::new(NerModel::builtin())
    }

    fn spans<'a>(text: &'a str, votes: &[DetectorVote]) -> Vec<(&'a str, String)> {
        votes
            .iter()
            .map(|v| (&text[v.start..v.end], v.entity_type.clone()))
            .collect()
    }

    #[test]
    fn test_scenario_person() {
        let text = "Contact John Smith at john.smith@example.com, phone 555-0100.";
        let votes = detector().detect(text, "en").unwrap();
        assert_eq!(spans(text, &votes), vec![("John Smith", "PERSON".to_string())]);
        assert!(votes[0].confidence > 0.75 && votes[0].confidence < 0.85);
    }

    #[test]
    fn test_person_and_location_italian() {
        let text = "Maria Rossi vive a Roma da anni.";
        let votes = detector().detect(text, "it").unwrap();
        assert_eq!(
            spans(text, &votes),
            vec![
                ("Maria Rossi", "PERSON".to_string()),
                ("Roma", "LOCATION".to_string())
            ]
        );
    }

    #[test]
    fn test_organization_suffix() {
        let text = "Il contratto con Acme Srl scade domani.";
        let votes = detector().detect(text, "it").unwrap();
        assert_eq!(
            spans(text, &votes),
            vec![("Acme Srl", "ORGANIZATION".to_string())]
        );
    }

    #[test]
    fn test_title_introduces_person() {
        let text = "We met Dr. Bianchi yesterday.";
        let votes = detector().detect(text, "en").unwrap();
        assert_eq!(spans(text, &votes), vec![("Bianchi", "PERSON".to_string())]);
    }

    #[test]
    fn test_lowercase_text_has_no_entities() {
        let votes = detector()
            .detect("nothing to see here, john", "en")
            .unwrap();
        assert!(votes.is_empty());
    }

    #[test]
    fn test_empty_text() {
        assert!(detector().detect("", "en").unwrap().is_empty());
    }

    #[test]
    fn test_missing_model_reports_loading_error() {
        let detector = NeuralNerDetector::from_path(Path::new("/nonexistent/ner.json"));
        assert!(!detector.is_ready());
        assert!(matches!(
            detector.detect("John Smith", "en"),
            Err(Error::ModelLoading(_))
        ));
    }

    #[test]
    fn test_corrupt_model_reports_loading_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ner.json");
        std::fs::write(&path, "{ not json").unwrap();
        let detector = NeuralNerDetector::from_path(&path);
        assert!(matches!(
            detector.detect("John", "en"),
            Err(Error::ModelLoading(_))
        ));
    }

    #[test]
    fn test_model_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ner.json");
        let json = serde_json::to_string_pretty(&NerModel::builtin()).unwrap();
        std::fs::write(&path, json).unwrap();

        let detector = NeuralNerDetector::from_path(&path);
        assert!(detector.is_ready());
        assert_eq!(detector.version(), "builtin-1");
        let votes = detector.detect("Contact John Smith", "en").unwrap();
        assert_eq!(votes.len(), 1);
    }

    #[test]
    fn test_offsets_on_multibyte_text() {
        let text = "Caffè con Giulia è stato bello";
        let votes = detector().detect(text, "it").unwrap();
        assert_eq!(spans(text, &votes), vec![("Giulia", "PERSON".to_string())]);
    }
}
