//! Plain UTF-8 text: one unit per line, terminators kept as separators

use super::reconstruct::{rewrite_units, splice_text};
use super::{
    DocumentAdapter, ExtractedDocument, Extractor, Location, Reconstructor, RenderedDocument,
    SourceDocument, SourceKind, TextBuilder, UnitRef,
};
use crate::error::{Error, Result};
use crate::modes::AnonymizedContent;

const PART: &str = "text";

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextAdapter;

/// Split a line into its body and terminator (`\n`, `\r\n` or nothing)
fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

impl Extractor for PlainTextAdapter {
    fn extract(&self, source: &SourceDocument, _language: &str) -> Result<ExtractedDocument> {
        let content = std::str::from_utf8(&source.content).map_err(|e| {
            Error::DocumentProcessing(format!("Text document is not UTF-8: {}", e))
        })?;

        let mut builder = TextBuilder::new();
        let mut lines = 0usize;
        for (i, line) in content.split_inclusive('\n').enumerate() {
            let (body, terminator) = split_terminator(line);
            builder.push_unit(body, Location::Unit(UnitRef::new(PART, i)))?;
            builder.push_separator(terminator);
            lines += 1;
        }

        let (text, index) = builder.finish();
        let mut doc = ExtractedDocument::new(source, SourceKind::PlainText, text, index);
        doc.metadata.insert("lines".to_string(), lines.to_string());
        Ok(doc)
    }
}

impl Reconstructor for PlainTextAdapter {
    fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument> {
        let edits = rewrite_units(doc, &content.replacements);
        let text = splice_text(doc, &edits);
        tracing::debug!(lines = edits.len(), "Rebuilt plain text");
        Ok(RenderedDocument::with_content(doc, text.into_bytes()))
    }
}

impl DocumentAdapter for PlainTextAdapter {
    fn name(&self) -> &'static str {
        "plain_text"
    }
}
