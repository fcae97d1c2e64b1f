//! PowerPoint decks: `a:t` runs of every slide, in slide order

use super::ooxml::{extract_package, numbered_parts, open, rebuild_package};
use super::{
    DocumentAdapter, ExtractedDocument, Extractor, Reconstructor, RenderedDocument,
    SourceDocument, SourceKind,
};
use crate::error::{Error, Result};
use crate::modes::AnonymizedContent;

const SLIDE_PREFIX: &str = "ppt/slides/slide";
const NOTES_PREFIX: &str = "ppt/notesSlides/notesSlide";

fn slide_tags(_part: &str) -> (&'static str, &'static str) {
    ("a:t", "a:p")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PptxAdapter;

impl Extractor for PptxAdapter {
    fn extract(&self, source: &SourceDocument, _language: &str) -> Result<ExtractedDocument> {
        let archive = open(&source.content)?;
        let slides = numbered_parts(&archive, SLIDE_PREFIX, ".xml");
        if slides.is_empty() {
            return Err(Error::DocumentProcessing(
                "Presentation has no slides".to_string(),
            ));
        }
        let slide_count = slides.len();
        let mut parts = slides;
        parts.extend(numbered_parts(&archive, NOTES_PREFIX, ".xml"));

        let mut doc = extract_package(source, SourceKind::Pptx, &parts, slide_tags)?;
        doc.metadata
            .insert("slides".to_string(), slide_count.to_string());
        Ok(doc)
    }
}

impl Reconstructor for PptxAdapter {
    fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument> {
        rebuild_package(doc, content, slide_tags)
    }
}

impl DocumentAdapter for PptxAdapter {
    fn name(&self) -> &'static str {
        "pptx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ooxml::test_support::{entry, package};
    use crate::document::Location;
    use crate::modes::test_support::detection;
    use crate::modes::{AnonymizationStrategy, RedactStrategy};

    fn slide(lines: &[&str]) -> String {
        let paragraphs: String = lines
            .iter()
            .map(|l| format!("<a:p><a:r><a:rPr lang=\"it-IT\"/><a:t>{}</a:t></a:r></a:p>", l))
            .collect();
        format!(
            "<p:sld><p:cSld><p:spTree><p:sp><p:txBody>{}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
            paragraphs
        )
    }

    fn deck() -> SourceDocument {
        let s1 = slide(&["Quarterly review", "Owner: Mario Rossi"]);
        let s2 = slide(&["Contact mario.rossi@example.it"]);
        let s10 = slide(&["Thanks"]);
        SourceDocument::new(
            "deck.pptx",
            package(&[
                ("ppt/presentation.xml", "<p:presentation/>"),
                ("ppt/slides/slide10.xml", s10.as_str()),
                ("ppt/slides/slide1.xml", s1.as_str()),
                ("ppt/slides/slide2.xml", s2.as_str()),
            ]),
        )
    }

    #[test]
    fn test_extract_in_slide_order() {
        let doc = PptxAdapter.extract(&deck(), "it").unwrap();
        assert_eq!(
            doc.text,
            "Quarterly review\nOwner: Mario Rossi\n\nContact mario.rossi@example.it\n\nThanks"
        );
        assert_eq!(doc.metadata.get("slides").map(String::as_str), Some("3"));
        let last = doc.index.entries().last().unwrap();
        assert!(matches!(&last.location, Location::Unit(u) if u.part == "ppt/slides/slide10.xml"));
    }

    #[test]
    fn test_rebuild_keeps_slides() {
        let doc = PptxAdapter.extract(&deck(), "it").unwrap();
        let detections = vec![
            detection(&doc.text, "Mario Rossi", "PERSON"),
            detection(&doc.text, "mario.rossi@example.it", "EMAIL"),
        ];
        let content = RedactStrategy.anonymize(&doc.text, &detections).unwrap();
        let rendered = PptxAdapter.rebuild(&doc, &content).unwrap();

        let s1 = entry(&rendered.content, "ppt/slides/slide1.xml");
        assert!(s1.contains("<a:t>Owner: [PERSON]</a:t>"));
        assert!(s1.contains("<a:rPr lang=\"it-IT\"/>"));
        assert_eq!(
            entry(&rendered.content, "ppt/slides/slide10.xml"),
            slide(&["Thanks"])
        );

        let again = PptxAdapter
            .extract(&SourceDocument::new("out.pptx", rendered.content), "it")
            .unwrap();
        assert_eq!(again.text, content.text);
    }

    #[test]
    fn test_deck_without_slides() {
        let source = SourceDocument::new(
            "empty.pptx",
            package(&[("ppt/presentation.xml", "<p:presentation/>")]),
        );
        assert!(PptxAdapter.extract(&source, "it").is_err());
    }
}
