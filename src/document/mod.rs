//! Document extraction and reconstruction
//!
//! Every supported source is flattened into one linear text plus a
//! [`PositionIndex`] that maps byte ranges of that text back to where they
//! came from: a structural unit (a line, a run, a cell) or a box on a page
//! raster. Reconstruction walks the same index to write anonymized content
//! back into an output of the same shape.
//!
//! ```text
//! SourceDocument ──classify──► adapter.extract ──► ExtractedDocument
//!                                                   │ text ─► detection ─► AnonymizedContent
//!                                                   ▼
//!                               adapter.rebuild ◄───┘ ──► RenderedDocument
//! ```

pub mod email;
pub mod ocr;
pub mod ooxml;
pub mod pdf;
mod process;
pub mod reconstruct;
pub mod scanned;
pub mod slides;
pub mod sniff;
pub mod tabular;
pub mod text;
pub mod xml;

pub use ocr::{OcrEngine, OcrToken, TesseractOcr};
pub use pdf::{PdfTools, PopplerTools};
pub use reconstruct::{carry_replacements, resolve_output_path, rewrite_units};
pub use scanned::ScannedAdapter;
pub use sniff::{classify, sniff};

use crate::config::DocumentsConfig;
use crate::error::{Error, Result};
use crate::modes::{AnonymizationMode, AnonymizedContent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Closed classification of a source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    DigitalText,
    Scanned,
    Tabular,
    SlideBased,
    Unsupported,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DigitalText => "digital_text",
            Self::Scanned => "scanned",
            Self::Tabular => "tabular",
            Self::SlideBased => "slide_based",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete container detected by [`sniff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    PlainText,
    Docx,
    /// CSV or TSV
    Delimited { delimiter: u8 },
    Xlsx,
    Pptx,
    /// PDF, read through its text layer
    Pdf,
    /// RFC 822 message
    Eml,
    /// A single raster image
    Image,
    /// Rendered pages supplied without a readable container
    PageImages,
}

impl SourceKind {
    pub fn format(&self) -> DocumentFormat {
        match self {
            Self::PlainText | Self::Docx | Self::Pdf | Self::Eml => DocumentFormat::DigitalText,
            Self::Delimited { .. } | Self::Xlsx => DocumentFormat::Tabular,
            Self::Pptx => DocumentFormat::SlideBased,
            Self::Image | Self::PageImages => DocumentFormat::Scanned,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PlainText => "plain_text",
            Self::Docx => "docx",
            Self::Delimited { delimiter: b'\t' } => "tsv",
            Self::Delimited { .. } => "csv",
            Self::Xlsx => "xlsx",
            Self::Pptx => "pptx",
            Self::Pdf => "pdf",
            Self::Eml => "eml",
            Self::Image => "image",
            Self::PageImages => "page_images",
        }
    }
}

/// Input document
#[derive(Clone, Default)]
pub struct SourceDocument {
    pub file_name: String,
    pub content: Vec<u8>,
    /// Rendered page rasters supplied by the caller (encoded images)
    pub page_images: Vec<Vec<u8>>,
}

impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDocument")
            .field("file_name", &self.file_name)
            .field("content_len", &self.content.len())
            .field("page_images", &self.page_images.len())
            .finish()
    }
}

impl SourceDocument {
    pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content,
            page_images: Vec::new(),
        }
    }

    pub fn with_page_images(mut self, pages: Vec<Vec<u8>>) -> Self {
        self.page_images = pages;
        self
    }

    /// Lowercased file extension, if any
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name.rsplit(|c| c == '/' || c == '\\').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Pixel rectangle on a page raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.left < other.right()
            && other.left < self.right()
            && self.top < other.bottom()
            && other.top < self.bottom()
    }
}

/// A box on one page (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRegion {
    pub page: usize,
    pub bbox: BoundingBox,
}

/// A structural unit: the `index`-th text unit of container part `part`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub part: String,
    pub index: usize,
}

impl UnitRef {
    pub fn new(part: impl Into<String>, index: usize) -> Self {
        Self {
            part: part.into(),
            index,
        }
    }
}

/// Where a range of the linear text came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Unit(UnitRef),
    Region(PageRegion),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub start: usize,
    pub end: usize,
    pub location: Location,
}

impl IndexEntry {
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Ordered, non-overlapping map from linear-text ranges to locations.
///
/// Text between entries (separators) belongs to no entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionIndex {
    entries: Vec<IndexEntry>,
}

impl PositionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Empty ranges and ranges that go backwards are refused.
    pub fn push(&mut self, start: usize, end: usize, location: Location) -> Result<()> {
        if start >= end {
            return Err(Error::DocumentProcessing(format!(
                "Empty index range {}..{}",
                start, end
            )));
        }
        if let Some(last) = self.entries.last() {
            if start < last.end {
                return Err(Error::DocumentProcessing(format!(
                    "Index range {}..{} overlaps previous entry ending at {}",
                    start, end, last.end
                )));
            }
        }
        self.entries.push(IndexEntry {
            start,
            end,
            location,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry containing byte `offset`
    pub fn locate(&self, offset: usize) -> Option<&IndexEntry> {
        let i = self.entries.partition_point(|e| e.end <= offset);
        self.entries.get(i).filter(|e| e.start <= offset)
    }

    /// Entries intersecting `start..end`
    pub fn overlapping(&self, start: usize, end: usize) -> &[IndexEntry] {
        let first = self.entries.partition_point(|e| e.end <= start);
        let last = self.entries.partition_point(|e| e.start < end);
        if first >= last {
            return &[];
        }
        &self.entries[first..last]
    }

    /// Whether any entry maps to a page region
    pub fn has_regions(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.location, Location::Region(_)))
    }
}

/// Builds linear text and its index together
#[derive(Debug, Default)]
pub(crate) struct TextBuilder {
    text: String,
    index: PositionIndex,
}

impl TextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn push_separator(&mut self, separator: &str) {
        self.text.push_str(separator);
    }

    /// Append a unit's text. Empty units get no index entry.
    pub fn push_unit(&mut self, text: &str, location: Location) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let start = self.text.len();
        self.text.push_str(text);
        self.index.push(start, self.text.len(), location)
    }

    pub fn finish(self) -> (String, PositionIndex) {
        (self.text, self.index)
    }
}

/// Output of extraction, owned by one pipeline run
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub index: PositionIndex,
    pub format: DocumentFormat,
    pub kind: SourceKind,
    pub metadata: BTreeMap<String, String>,
    /// Non-fatal per-unit failures
    pub warnings: Vec<String>,
    pub source: SourceDocument,
    /// Digital text layer replaced by an OCR reading
    pub text_layer: Option<Box<ExtractedDocument>>,
}

impl ExtractedDocument {
    pub fn new(
        source: &SourceDocument,
        kind: SourceKind,
        text: String,
        index: PositionIndex,
    ) -> Self {
        Self {
            text,
            index,
            format: kind.format(),
            kind,
            metadata: BTreeMap::new(),
            warnings: Vec::new(),
            source: source.clone(),
            text_layer: None,
        }
    }

    /// Original text of an index entry
    pub fn entry_text(&self, entry: &IndexEntry) -> &str {
        self.text.get(entry.start..entry.end).unwrap_or_default()
    }

    /// Record a non-fatal failure
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(kind = self.kind.name(), warning = %message, "Skipped unreadable unit");
        self.warnings.push(message);
    }

    /// Non-whitespace characters per page: the container's own page count
    /// when the adapter knows it, else the number of supplied rasters
    pub fn chars_per_page(&self) -> usize {
        let pages = self
            .metadata
            .get("pages")
            .and_then(|p| p.parse::<usize>().ok())
            .unwrap_or(self.source.page_images.len())
            .max(1);
        self.text.chars().filter(|c| !c.is_whitespace()).count() / pages
    }
}

/// Output of reconstruction
#[derive(Clone)]
pub struct RenderedDocument {
    pub format: DocumentFormat,
    pub file_name: String,
    pub content: Vec<u8>,
    pub page_images: Vec<Vec<u8>>,
}

impl fmt::Debug for RenderedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedDocument")
            .field("format", &self.format)
            .field("file_name", &self.file_name)
            .field("content_len", &self.content.len())
            .field("page_images", &self.page_images.len())
            .finish()
    }
}

impl RenderedDocument {
    /// Rebuilt container; supplied page rasters were not rewritten and are dropped
    pub(crate) fn with_content(doc: &ExtractedDocument, content: Vec<u8>) -> Self {
        Self {
            format: doc.format,
            file_name: doc.source.file_name.clone(),
            content,
            page_images: Vec::new(),
        }
    }
}

/// Produces linear text plus its position index
pub trait Extractor: Send + Sync {
    fn extract(&self, source: &SourceDocument, language: &str) -> Result<ExtractedDocument>;
}

/// Writes anonymized content back through the position index
pub trait Reconstructor: Send + Sync {
    fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument>;
}

/// One format's extractor and reconstructor
pub trait DocumentAdapter: Extractor + Reconstructor {
    fn name(&self) -> &'static str;
}

/// Resolves a source to its adapter, applying the OCR density fallback
pub struct AdapterRegistry {
    plain: text::PlainTextAdapter,
    docx: ooxml::DocxAdapter,
    delimited: tabular::DelimitedAdapter,
    xlsx: tabular::XlsxAdapter,
    pptx: slides::PptxAdapter,
    pdf: pdf::PdfAdapter,
    eml: email::EmailAdapter,
    scanned: ScannedAdapter,
    min_chars_per_page: usize,
    max_document_bytes: usize,
}

impl AdapterRegistry {
    pub fn new(
        config: &DocumentsConfig,
        ocr: Arc<dyn OcrEngine>,
        pdf_tools: Arc<dyn PdfTools>,
    ) -> Self {
        Self {
            plain: text::PlainTextAdapter,
            docx: ooxml::DocxAdapter,
            delimited: tabular::DelimitedAdapter,
            xlsx: tabular::XlsxAdapter,
            pptx: slides::PptxAdapter,
            pdf: pdf::PdfAdapter::new(pdf_tools),
            eml: email::EmailAdapter,
            scanned: ScannedAdapter::new(ocr, config.redaction_padding),
            min_chars_per_page: config.min_chars_per_page,
            max_document_bytes: config.max_document_bytes,
        }
    }

    fn adapter_for(&self, kind: SourceKind) -> &dyn DocumentAdapter {
        match kind {
            SourceKind::PlainText => &self.plain,
            SourceKind::Docx => &self.docx,
            SourceKind::Delimited { .. } => &self.delimited,
            SourceKind::Xlsx => &self.xlsx,
            SourceKind::Pptx => &self.pptx,
            SourceKind::Pdf => &self.pdf,
            SourceKind::Eml => &self.eml,
            SourceKind::Image | SourceKind::PageImages => &self.scanned,
        }
    }

    /// Classify and extract `source`
    pub fn extract(&self, source: &SourceDocument, language: &str) -> Result<ExtractedDocument> {
        if source.content.len() > self.max_document_bytes {
            return Err(Error::DocumentProcessing(format!(
                "Document is {} bytes, limit is {}",
                source.content.len(),
                self.max_document_bytes
            )));
        }

        let kind = sniff(source).ok_or_else(|| {
            Error::DocumentProcessing(format!(
                "Unsupported document format: {}",
                source.file_name
            ))
        })?;
        let adapter = self.adapter_for(kind);
        tracing::debug!(kind = kind.name(), adapter = adapter.name(), "Extracting document");

        let mut doc = adapter.extract(source, language)?;
        if doc.format == DocumentFormat::Scanned {
            return Ok(doc);
        }

        let density = doc.chars_per_page();
        if density >= self.min_chars_per_page {
            return Ok(doc);
        }

        let rendered;
        let pages = if !source.page_images.is_empty() {
            source
        } else if kind == SourceKind::Pdf {
            match self.pdf.render_pages(source) {
                Ok(images) => {
                    rendered = source.clone().with_page_images(images);
                    &rendered
                }
                Err(e) => {
                    doc.warn(format!("Sparse text layer kept, pages not rendered: {}", e));
                    return Ok(doc);
                }
            }
        } else {
            return Ok(doc);
        };

        tracing::info!(
            kind = kind.name(),
            chars_per_page = density,
            min_chars_per_page = self.min_chars_per_page,
            pages = pages.page_images.len(),
            "Text layer too sparse, falling back to OCR"
        );
        let mut scanned = self.scanned.extract(pages, language)?;
        scanned.kind = kind;
        scanned
            .metadata
            .insert("ocr_fallback".to_string(), "true".to_string());
        scanned.text_layer = Some(Box::new(doc));
        Ok(scanned)
    }

    /// Rebuild `doc` with `content`
    pub fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument> {
        if content.mode == AnonymizationMode::VisualRedact && !doc.index.has_regions() {
            return Err(Error::Config(format!(
                "Visual redaction needs page rasters with bounding boxes; {} document has none",
                doc.kind.name()
            )));
        }

        if doc.format != DocumentFormat::Scanned {
            return self.adapter_for(doc.kind).rebuild(doc, content);
        }

        let mut rendered = self.scanned.rebuild(doc, content)?;
        if let Some(layer) = doc.text_layer.as_deref() {
            if content.mode != AnonymizationMode::VisualRedact {
                let carried = carry_replacements(doc, content, layer);
                let text = self.adapter_for(layer.kind).rebuild(layer, &carried)?;
                tracing::debug!(
                    kind = layer.kind.name(),
                    replacements = carried.replacements.len(),
                    "Rewrote text layer under OCR reading"
                );
                rendered.content = text.content;
                rendered.file_name = text.file_name;
            }
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::pdf::test_support::{StubPdf, PDF_HEADER};
    use super::scanned::test_support::{page_png, word_box, ScriptedOcr};
    use super::*;
    use crate::modes::test_support::detection;
    use crate::modes::{AnonymizationStrategy, RedactStrategy, SubstituteStrategy};
    use image::Rgba;

    fn unit(i: usize) -> Location {
        Location::Unit(UnitRef::new("body", i))
    }

    #[test]
    fn test_position_index_lookup() {
        let mut index = PositionIndex::new();
        index.push(0, 5, unit(0)).unwrap();
        index.push(6, 10, unit(1)).unwrap();
        index.push(12, 20, unit(2)).unwrap();

        assert_eq!(index.locate(0).unwrap().location, unit(0));
        assert_eq!(index.locate(4).unwrap().location, unit(0));
        assert!(index.locate(5).is_none());
        assert_eq!(index.locate(6).unwrap().location, unit(1));
        assert!(index.locate(25).is_none());

        assert_eq!(index.overlapping(3, 7).len(), 2);
        assert_eq!(index.overlapping(10, 12).len(), 0);
        assert_eq!(index.overlapping(0, 100).len(), 3);
        assert!(!index.has_regions());
    }

    #[test]
    fn test_position_index_refuses_bad_ranges() {
        let mut index = PositionIndex::new();
        assert!(index.push(3, 3, unit(0)).is_err());
        index.push(0, 5, unit(0)).unwrap();
        assert!(index.push(4, 8, unit(1)).is_err());
    }

    #[test]
    fn test_text_builder() {
        let mut builder = TextBuilder::new();
        builder.push_unit("Hello", unit(0)).unwrap();
        builder.push_separator("\n");
        builder.push_unit("", unit(1)).unwrap();
        builder.push_separator("\n");
        builder.push_unit("World", unit(2)).unwrap();
        let (text, index) = builder.finish();
        assert_eq!(text, "Hello\n\nWorld");
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[1].start, 7);
    }

    #[test]
    fn test_bounding_box_intersects() {
        let a = BoundingBox {
            left: 0,
            top: 0,
            width: 10,
            height: 10,
        };
        let b = BoundingBox {
            left: 9,
            top: 9,
            width: 5,
            height: 5,
        };
        let c = BoundingBox {
            left: 10,
            top: 0,
            width: 5,
            height: 5,
        };
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_extension() {
        assert_eq!(
            SourceDocument::new("dir/Report.DOCX", vec![]).extension(),
            Some("docx".to_string())
        );
        assert_eq!(SourceDocument::new(".bashrc", vec![]).extension(), None);
        assert_eq!(SourceDocument::new("README", vec![]).extension(), None);
    }

    fn registry_with(pdf: StubPdf) -> AdapterRegistry {
        AdapterRegistry::new(
            &DocumentsConfig::default(),
            Arc::new(ScriptedOcr {
                pages: vec![vec!["Referto di Mario Rossi", "nato a Roma nel 1980"]],
            }),
            Arc::new(pdf),
        )
    }

    fn registry() -> AdapterRegistry {
        registry_with(StubPdf {
            pages: vec![],
            rasters: vec![],
        })
    }

    /// Every pixel inside `boxes` is the fill colour
    fn assert_painted(page: &[u8], boxes: &[BoundingBox]) {
        let image = image::load_from_memory(page).unwrap().to_rgba8();
        for b in boxes {
            for y in b.top..b.bottom() {
                for x in b.left..b.right() {
                    assert_eq!(*image.get_pixel(x, y), Rgba([0, 0, 0, 255]));
                }
            }
        }
    }

    #[test]
    fn test_registry_dispatches_plain_text() {
        let source = SourceDocument::new("note.txt", b"Ciao Mario".to_vec());
        let doc = registry().extract(&source, "it").unwrap();
        assert_eq!(doc.format, DocumentFormat::DigitalText);
        assert_eq!(doc.text, "Ciao Mario");
    }

    #[test]
    fn test_registry_rejects_unsupported() {
        let source = SourceDocument::new("blob.bin", vec![0x00, 0xff, 0xfe, 0x80]);
        assert!(matches!(
            registry().extract(&source, "it"),
            Err(Error::DocumentProcessing(_))
        ));
    }

    #[test]
    fn test_registry_enforces_size_limit() {
        let config = DocumentsConfig {
            max_document_bytes: 4,
            ..DocumentsConfig::default()
        };
        let registry = AdapterRegistry::new(
            &config,
            Arc::new(ScriptedOcr { pages: vec![] }),
            Arc::new(StubPdf {
                pages: vec![],
                rasters: vec![],
            }),
        );
        let source = SourceDocument::new("note.txt", b"too long".to_vec());
        assert!(registry.extract(&source, "it").is_err());
    }

    #[test]
    fn test_sparse_text_falls_back_to_ocr() {
        let source = SourceDocument::new("scan.txt", b"p. 1".to_vec())
            .with_page_images(vec![page_png(0, &["Referto di Mario Rossi"])]);
        let doc = registry().extract(&source, "it").unwrap();
        assert_eq!(doc.format, DocumentFormat::Scanned);
        assert_eq!(doc.kind, SourceKind::PlainText);
        assert_eq!(doc.metadata.get("ocr_fallback").map(String::as_str), Some("true"));
        assert!(doc.text.starts_with("Referto di Mario Rossi"));
        let layer = doc.text_layer.as_deref().unwrap();
        assert_eq!(layer.text, "p. 1");
    }

    #[test]
    fn test_ocr_fallback_redact_rewrites_text_layer() {
        let source = SourceDocument::new("note.txt", b"Mario Rossi".to_vec())
            .with_page_images(vec![page_png(0, &["Referto di Mario Rossi"])]);
        let registry = registry();
        let doc = registry.extract(&source, "it").unwrap();
        assert_eq!(doc.metadata.get("ocr_fallback").map(String::as_str), Some("true"));

        let content = RedactStrategy
            .anonymize(&doc.text, &[detection(&doc.text, "Mario Rossi", "PERSON")])
            .unwrap();
        let rendered = registry.rebuild(&doc, &content).unwrap();

        let text = String::from_utf8(rendered.content).unwrap();
        assert!(!text.contains("Mario Rossi"));
        assert_eq!(text, "[PERSON]");
        assert_eq!(rendered.file_name, "note.txt");
        assert_eq!(rendered.page_images.len(), 1);
        assert_painted(&rendered.page_images[0], &[word_box(0, 2), word_box(0, 3)]);
    }

    #[test]
    fn test_ocr_fallback_substitute_rewrites_text_layer() {
        let source = SourceDocument::new("note.txt", b"Paziente: Mario\nRossi".to_vec())
            .with_page_images(vec![page_png(0, &["Referto di Mario Rossi"])]);
        let registry = registry();
        let doc = registry.extract(&source, "it").unwrap();
        let content = SubstituteStrategy::default()
            .anonymize(&doc.text, &[detection(&doc.text, "Mario Rossi", "PERSON")])
            .unwrap();
        let rendered = registry.rebuild(&doc, &content).unwrap();

        let text = String::from_utf8(rendered.content).unwrap();
        assert!(!text.contains("Mario"));
        assert!(!text.contains("Rossi"));
        assert!(text.starts_with("Paziente: "));
        assert_painted(&rendered.page_images[0], &[word_box(0, 2), word_box(0, 3)]);
    }

    #[test]
    fn test_pdf_dense_text_layer() {
        let body = "Referto clinico del paziente Mario Rossi, nato a Roma nel 1980.";
        let registry = registry_with(StubPdf {
            pages: vec![body],
            rasters: vec![],
        });
        let source = SourceDocument::new("referto.pdf", PDF_HEADER.to_vec());
        let doc = registry.extract(&source, "it").unwrap();
        assert_eq!(doc.kind, SourceKind::Pdf);
        assert_eq!(doc.format, DocumentFormat::DigitalText);
        assert_eq!(doc.text, body);

        let content = RedactStrategy
            .anonymize(&doc.text, &[detection(&doc.text, "Mario Rossi", "PERSON")])
            .unwrap();
        let rendered = registry.rebuild(&doc, &content).unwrap();
        assert_eq!(rendered.file_name, "referto.txt");
        assert!(!String::from_utf8(rendered.content).unwrap().contains("Mario Rossi"));
    }

    #[test]
    fn test_sparse_pdf_is_rendered_and_ocrd() {
        let registry = registry_with(StubPdf {
            pages: vec!["Mario Rossi"],
            rasters: vec![page_png(0, &["Referto di Mario Rossi"])],
        });
        let source = SourceDocument::new("referto.pdf", PDF_HEADER.to_vec());
        let doc = registry.extract(&source, "it").unwrap();
        assert_eq!(doc.format, DocumentFormat::Scanned);
        assert_eq!(doc.kind, SourceKind::Pdf);
        assert_eq!(doc.source.page_images.len(), 1);

        let content = RedactStrategy
            .anonymize(&doc.text, &[detection(&doc.text, "Mario Rossi", "PERSON")])
            .unwrap();
        let rendered = registry.rebuild(&doc, &content).unwrap();
        assert_eq!(rendered.file_name, "referto.txt");
        assert_eq!(String::from_utf8(rendered.content).unwrap(), "[PERSON]");
        assert_painted(&rendered.page_images[0], &[word_box(0, 2), word_box(0, 3)]);
    }

    #[test]
    fn test_sparse_pdf_without_renderer_keeps_text_layer() {
        let registry = registry_with(StubPdf {
            pages: vec!["Mario Rossi"],
            rasters: vec![],
        });
        let source = SourceDocument::new("referto.pdf", PDF_HEADER.to_vec());
        let doc = registry.extract(&source, "it").unwrap();
        assert_eq!(doc.format, DocumentFormat::DigitalText);
        assert_eq!(doc.warnings.len(), 1);
    }

    #[test]
    fn test_registry_dispatches_email() {
        let source = SourceDocument::new(
            "referto.eml",
            b"From: Mario Rossi <m@example.it>\r\nSubject: Referto\r\n\r\nCiao\r\n".to_vec(),
        );
        let doc = registry().extract(&source, "it").unwrap();
        assert_eq!(doc.kind, SourceKind::Eml);
        assert!(doc.text.contains("Mario Rossi"));
    }

    #[test]
    fn test_dense_text_keeps_text_layer() {
        let body = "Referto clinico ".repeat(10);
        let source = SourceDocument::new("report.txt", body.clone().into_bytes())
            .with_page_images(vec![page_png(0, &["ignored"])]);
        let doc = registry().extract(&source, "it").unwrap();
        assert_eq!(doc.format, DocumentFormat::DigitalText);
        assert_eq!(doc.text, body);
    }

    #[test]
    fn test_visual_redact_needs_boxes() {
        let source = SourceDocument::new("note.txt", b"Ciao Mario".to_vec());
        let registry = registry();
        let doc = registry.extract(&source, "it").unwrap();
        let content = AnonymizedContent::unchanged(AnonymizationMode::VisualRedact, &doc.text);
        assert!(matches!(
            registry.rebuild(&doc, &content),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_kind_format() {
        assert_eq!(SourceKind::Xlsx.format(), DocumentFormat::Tabular);
        assert_eq!(SourceKind::Pptx.format(), DocumentFormat::SlideBased);
        assert_eq!(SourceKind::Image.format(), DocumentFormat::Scanned);
        assert_eq!(SourceKind::Delimited { delimiter: b'\t' }.name(), "tsv");
        assert_eq!(SourceKind::Pdf.format(), DocumentFormat::DigitalText);
        assert_eq!(SourceKind::Eml.name(), "eml");
    }
}
