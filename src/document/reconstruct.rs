//! Replaying replacements through the position index

use super::{ExtractedDocument, Location, PageRegion, UnitRef};
use crate::error::{Error, Result};
use crate::modes::{apply_replacements, AnonymizedContent, Replacement};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// New text of every structural unit touched by `replacements`.
///
/// A replacement spanning several units is written whole into the first
/// unit it touches; its remainder is cut from the following units.
/// Separators between units are never rewritten.
pub fn rewrite_units(
    doc: &ExtractedDocument,
    replacements: &[Replacement],
) -> BTreeMap<UnitRef, String> {
    let mut edits = BTreeMap::new();
    let mut emitted = vec![false; replacements.len()];

    for entry in doc.index.entries() {
        let Location::Unit(unit) = &entry.location else {
            continue;
        };
        let first = replacements.partition_point(|r| r.end <= entry.start);
        let overlapping = replacements[first..]
            .iter()
            .enumerate()
            .take_while(|(_, r)| r.start < entry.end);

        let original = doc.entry_text(entry);
        let mut rewritten = String::with_capacity(original.len());
        let mut cursor = 0;
        let mut touched = false;
        for (offset, r) in overlapping {
            touched = true;
            let local_start = r.start.max(entry.start) - entry.start;
            let local_end = r.end.min(entry.end) - entry.start;
            rewritten.push_str(&original[cursor..local_start]);
            if !emitted[first + offset] {
                rewritten.push_str(&r.replacement);
                emitted[first + offset] = true;
            }
            cursor = local_end;
        }
        if touched {
            rewritten.push_str(&original[cursor..]);
            edits.insert(unit.clone(), rewritten);
        }
    }

    for (r, done) in replacements.iter().zip(&emitted) {
        if !done && !doc.index.has_regions() {
            tracing::warn!(
                entity_type = %r.entity_type,
                start = r.start,
                end = r.end,
                "Replacement falls between structural units, not written"
            );
        }
    }

    edits
}

/// Page regions whose text intersects any replacement
pub fn touched_regions(doc: &ExtractedDocument, replacements: &[Replacement]) -> Vec<PageRegion> {
    replacements
        .iter()
        .flat_map(|r| doc.index.overlapping(r.start, r.end))
        .filter_map(|entry| match &entry.location {
            Location::Region(region) => Some(*region),
            Location::Unit(_) => None,
        })
        .collect()
}

/// Pattern matching the words of `snippet` separated by any whitespace
fn snippet_pattern(snippet: &str) -> Option<Regex> {
    let words: Vec<String> = snippet.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return None;
    }
    let mut pattern = words.join(r"\s+");
    if snippet.trim_start().starts_with(char::is_alphanumeric) {
        pattern.insert_str(0, r"\b");
    }
    if snippet.trim_end().ends_with(char::is_alphanumeric) {
        pattern.push_str(r"\b");
    }
    Regex::new(&pattern).ok()
}

/// Re-anchor the replacements of an OCR reading on the text layer it replaced.
///
/// Each replaced span is looked up in `layer` by its words, whatever the
/// whitespace between them, and every occurrence gets the same replacement.
pub fn carry_replacements(
    ocr: &ExtractedDocument,
    content: &AnonymizedContent,
    layer: &ExtractedDocument,
) -> AnonymizedContent {
    let mut carried = Vec::new();
    let mut missing = 0usize;
    for r in &content.replacements {
        let Some(pattern) = ocr.text.get(r.start..r.end).and_then(snippet_pattern) else {
            continue;
        };
        let before = carried.len();
        carried.extend(pattern.find_iter(&layer.text).map(|m| Replacement {
            start: m.start(),
            end: m.end(),
            entity_type: r.entity_type.clone(),
            replacement: r.replacement.clone(),
        }));
        if carried.len() == before {
            missing += 1;
        }
    }

    carried.sort_by_key(|r| (r.start, std::cmp::Reverse(r.end)));
    let mut replacements: Vec<Replacement> = Vec::with_capacity(carried.len());
    for r in carried {
        if replacements.last().map_or(true, |last| r.start >= last.end) {
            replacements.push(r);
        }
    }
    tracing::debug!(
        carried = replacements.len(),
        missing,
        "Carried replacements onto text layer"
    );

    AnonymizedContent {
        mode: content.mode,
        text: apply_replacements(&layer.text, &replacements),
        replacements,
        mapping: content.mapping.clone(),
    }
}

/// Rebuild the linear text from the index, with `edits` applied
pub fn splice_text(doc: &ExtractedDocument, edits: &BTreeMap<UnitRef, String>) -> String {
    let mut out = String::with_capacity(doc.text.len());
    let mut cursor = 0;
    for entry in doc.index.entries() {
        out.push_str(&doc.text[cursor..entry.start]);
        let edited = match &entry.location {
            Location::Unit(unit) => edits.get(unit),
            Location::Region(_) => None,
        };
        match edited {
            Some(text) => out.push_str(text),
            None => out.push_str(doc.entry_text(entry)),
        }
        cursor = entry.end;
    }
    out.push_str(&doc.text[cursor..]);
    out
}

/// Output path for an anonymized document, confined to `base_dir`.
///
/// `file_name` must be a plain relative name; absolute paths and parent
/// components are refused. The written file is `anonymized_<name>`.
pub fn resolve_output_path(base_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let requested = Path::new(file_name);
    if file_name.trim().is_empty() {
        return Err(Error::Security("Empty output file name".to_string()));
    }

    let mut relative = PathBuf::new();
    for component in requested.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::Security(format!(
                    "Output name {:?} contains a parent directory component",
                    file_name
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Security(format!(
                    "Output name {:?} is absolute",
                    file_name
                )))
            }
        }
    }

    let name = relative
        .file_name()
        .ok_or_else(|| Error::Security(format!("Output name {:?} has no file name", file_name)))?
        .to_string_lossy()
        .into_owned();
    relative.set_file_name(format!("anonymized_{}", name));

    let target = base_dir.join(&relative);
    if !target.starts_with(base_dir) {
        return Err(Error::Security(format!(
            "Output path escapes {}",
            base_dir.display()
        )));
    }

    if let Ok(canonical_base) = base_dir.canonicalize() {
        if let Some(parent) = target.parent().and_then(|p| p.canonicalize().ok()) {
            if !parent.starts_with(&canonical_base) {
                return Err(Error::Security(format!(
                    "Output path escapes {} through a link",
                    base_dir.display()
                )));
            }
        }
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PositionIndex, SourceDocument, SourceKind};

    fn doc(units: &[&str], separator: &str) -> ExtractedDocument {
        let mut text = String::new();
        let mut index = PositionIndex::new();
        for (i, u) in units.iter().enumerate() {
            if i > 0 {
                text.push_str(separator);
            }
            let start = text.len();
            text.push_str(u);
            if !u.is_empty() {
                index
                    .push(start, text.len(), Location::Unit(UnitRef::new("body", i)))
                    .unwrap();
            }
        }
        ExtractedDocument::new(&SourceDocument::default(), SourceKind::PlainText, text, index)
    }

    fn replacement(text: &str, needle: &str, with: &str) -> Replacement {
        let start = text.find(needle).unwrap();
        Replacement {
            start,
            end: start + needle.len(),
            entity_type: "X".to_string(),
            replacement: with.to_string(),
        }
    }

    #[test]
    fn test_rewrite_within_unit() {
        let d = doc(&["Call Mario now", "bye"], "\n");
        let edits = rewrite_units(&d, &[replacement(&d.text, "Mario", "[PERSON]")]);
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[&UnitRef::new("body", 0)], "Call [PERSON] now");
    }

    #[test]
    fn test_rewrite_across_units() {
        let d = doc(&["Mario Ros", "si lives here"], "");
        let edits = rewrite_units(&d, &[replacement(&d.text, "Mario Rossi", "[PERSON]")]);
        assert_eq!(edits[&UnitRef::new("body", 0)], "[PERSON]");
        assert_eq!(edits[&UnitRef::new("body", 1)], " lives here");
        assert_eq!(splice_text(&d, &edits), "[PERSON] lives here");
    }

    #[test]
    fn test_rewrite_across_separator() {
        let d = doc(&["Mario", "Rossi"], "\n");
        let edits = rewrite_units(&d, &[replacement(&d.text, "Mario\nRossi", "[PERSON]")]);
        assert_eq!(edits[&UnitRef::new("body", 0)], "[PERSON]");
        assert_eq!(edits[&UnitRef::new("body", 1)], "");
        assert_eq!(splice_text(&d, &edits), "[PERSON]\n");
    }

    #[test]
    fn test_several_replacements_in_one_unit() {
        let d = doc(&["a@b.it or c@d.it"], "\n");
        let edits = rewrite_units(
            &d,
            &[
                replacement(&d.text, "a@b.it", "[EMAIL]"),
                replacement(&d.text, "c@d.it", "[EMAIL]"),
            ],
        );
        assert_eq!(edits[&UnitRef::new("body", 0)], "[EMAIL] or [EMAIL]");
    }

    #[test]
    fn test_splice_without_edits_is_identity() {
        let d = doc(&["one", "", "three"], "\r\n");
        assert_eq!(splice_text(&d, &BTreeMap::new()), d.text);
    }

    #[test]
    fn test_carry_replacements_across_whitespace() {
        let ocr = doc(&["Referto di Mario", "Rossi, Roma"], "\n");
        let layer = doc(&["Mario  Rossi e Mario Rossini", "Mario\tRossi"], "\n");
        let content = AnonymizedContent {
            mode: crate::modes::AnonymizationMode::Substitute,
            text: String::new(),
            replacements: vec![replacement(&ocr.text, "Mario\nRossi", "PERSON_1")],
            mapping: None,
        };
        let carried = carry_replacements(&ocr, &content, &layer);
        assert_eq!(carried.replacements.len(), 2);
        assert_eq!(carried.text, "PERSON_1 e Mario Rossini\nPERSON_1");
        assert_eq!(carried.mode, crate::modes::AnonymizationMode::Substitute);
    }

    #[test]
    fn test_resolve_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_output_path(dir.path(), "report.docx").unwrap();
        assert_eq!(path, dir.path().join("anonymized_report.docx"));

        let nested = resolve_output_path(dir.path(), "./sub/report.txt").unwrap();
        assert_eq!(nested, dir.path().join("sub").join("anonymized_report.txt"));
    }

    #[test]
    fn test_resolve_output_path_refuses_escapes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["../etc/passwd", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(resolve_output_path(dir.path(), name), Err(Error::Security(_))),
                "{} accepted",
                name
            );
        }
    }
}
