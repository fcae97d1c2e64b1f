//! PDF documents
//!
//! The text layer is read page by page with `pdftotext`; each page is one
//! structural unit. A PDF cannot be rewritten in place, so rebuilding emits
//! the anonymized text layer as UTF-8 text next to the original name.
//! Pages whose text layer is too sparse are rendered with `pdftoppm` and
//! handed to OCR by the [`AdapterRegistry`](super::AdapterRegistry).

use super::process::Tool;
use super::reconstruct::{rewrite_units, splice_text};
use super::{
    DocumentAdapter, ExtractedDocument, Extractor, Location, Reconstructor, RenderedDocument,
    SourceDocument, SourceKind, TextBuilder, UnitRef,
};
use crate::config::PdfConfig;
use crate::error::{Error, Result};
use crate::modes::AnonymizedContent;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const PART: &str = "page";
const PAGE_SEPARATOR: &str = "\n\n";

/// Text layer and page rasters of a PDF
pub trait PdfTools: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Text layer of every page, in page order
    fn page_texts(&self, pdf: &[u8]) -> Result<Vec<String>>;

    /// Encoded rasters of every page, in page order
    fn render_pages(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>>;
}

/// Page count from `pdfinfo` output
pub fn parse_page_count(info: &str) -> Option<usize> {
    info.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// `pdfinfo`, `pdftotext` and `pdftoppm` from poppler-utils
#[derive(Debug, Clone)]
pub struct PopplerTools {
    dpi: u32,
    timeout: Duration,
}

impl Default for PopplerTools {
    fn default() -> Self {
        Self::from_config(&PdfConfig::default())
    }
}

impl PopplerTools {
    pub fn from_config(config: &PdfConfig) -> Self {
        Self {
            dpi: config.dpi,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn tool(binary: &str) -> Tool<'_> {
        Tool {
            binary,
            package: "poppler-utils",
        }
    }

    /// Copy `pdf` into a fresh directory for the tools to read
    fn stage(pdf: &[u8]) -> Result<(TempDir, PathBuf)> {
        let dir = TempDir::new()?;
        let input = dir.path().join("input.pdf");
        std::fs::write(&input, pdf)?;
        Ok((dir, input))
    }

    fn page_count(&self, dir: &Path, input: &Path) -> Result<usize> {
        let out = dir.join("info.txt");
        let mut command = Command::new("pdfinfo");
        command
            .arg(input)
            .stdout(Stdio::from(File::create(&out)?))
            .stderr(Stdio::null());
        Self::tool("pdfinfo").run(&mut command, self.timeout, "extraction")?;
        let info = std::fs::read(&out)?;
        Ok(parse_page_count(&String::from_utf8_lossy(&info)).unwrap_or(1))
    }
}

impl PdfTools for PopplerTools {
    fn name(&self) -> &str {
        "poppler"
    }

    fn is_available(&self) -> bool {
        Self::tool("pdftotext").is_installed("-v")
    }

    fn page_texts(&self, pdf: &[u8]) -> Result<Vec<String>> {
        let (dir, input) = Self::stage(pdf)?;
        let pages = self.page_count(dir.path(), &input)?;

        let mut texts = Vec::with_capacity(pages);
        for page in 1..=pages {
            let page_str = page.to_string();
            let out = dir.path().join(format!("page-{}.txt", page));
            let mut command = Command::new("pdftotext");
            command
                .args(["-layout", "-enc", "UTF-8", "-f", &page_str, "-l", &page_str])
                .arg(&input)
                .arg(&out)
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            Self::tool("pdftotext").run(&mut command, self.timeout, "extraction")?;

            let text = String::from_utf8_lossy(&std::fs::read(&out)?).into_owned();
            // pdftotext ends every page with a form feed
            texts.push(text.trim_end_matches('\x0c').to_string());
        }
        tracing::debug!(pages, "Read PDF text layer");
        Ok(texts)
    }

    fn render_pages(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>> {
        let (dir, input) = Self::stage(pdf)?;
        let dpi = self.dpi.to_string();
        let mut command = Command::new("pdftoppm");
        command
            .args(["-png", "-r", &dpi])
            .arg(&input)
            .arg(dir.path().join("page"))
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        Self::tool("pdftoppm").run(&mut command, self.timeout, "extraction")?;

        // page-1.png, page-01.png, ...: one width per run, so names sort in page order
        let mut images: Vec<PathBuf> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        images.sort();

        if images.is_empty() {
            return Err(Error::DocumentProcessing(
                "No page rasters rendered from PDF".to_string(),
            ));
        }
        tracing::debug!(pages = images.len(), dpi = self.dpi, "Rendered PDF pages");
        images
            .iter()
            .map(|path| std::fs::read(path).map_err(Error::from))
            .collect()
    }
}

/// Name of the text rendering of `file_name`
fn text_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .with_extension("txt")
        .to_string_lossy()
        .into_owned()
}

pub struct PdfAdapter {
    tools: Arc<dyn PdfTools>,
}

impl PdfAdapter {
    pub fn new(tools: Arc<dyn PdfTools>) -> Self {
        Self { tools }
    }

    /// Page rasters for OCR when the caller supplied none
    pub fn render_pages(&self, source: &SourceDocument) -> Result<Vec<Vec<u8>>> {
        self.tools.render_pages(&source.content)
    }
}

impl Extractor for PdfAdapter {
    fn extract(&self, source: &SourceDocument, _language: &str) -> Result<ExtractedDocument> {
        let pages = self.tools.page_texts(&source.content)?;

        let mut builder = TextBuilder::new();
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                builder.push_separator(PAGE_SEPARATOR);
            }
            builder.push_unit(page, Location::Unit(UnitRef::new(PART, i)))?;
        }

        let (text, index) = builder.finish();
        let mut doc = ExtractedDocument::new(source, SourceKind::Pdf, text, index);
        doc.metadata.insert("pages".to_string(), pages.len().to_string());
        doc.metadata
            .insert("pdf_tools".to_string(), self.tools.name().to_string());
        Ok(doc)
    }
}

impl Reconstructor for PdfAdapter {
    fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument> {
        let edits = rewrite_units(doc, &content.replacements);
        let text = splice_text(doc, &edits);
        tracing::debug!(pages = edits.len(), "Rebuilt PDF text layer");
        Ok(RenderedDocument {
            format: doc.format,
            file_name: text_file_name(&doc.source.file_name),
            content: text.into_bytes(),
            page_images: Vec::new(),
        })
    }
}

impl DocumentAdapter for PdfAdapter {
    fn name(&self) -> &'static str {
        "pdf"
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{StubPdf, PDF_HEADER};
    use super::*;
    use crate::document::DocumentFormat;
    use crate::modes::test_support::detection;
    use crate::modes::{AnonymizationStrategy, RedactStrategy};

    fn adapter() -> PdfAdapter {
        PdfAdapter::new(Arc::new(StubPdf {
            pages: vec!["Referto di Mario Rossi\nnato a Roma", "Pagina due"],
            rasters: Vec::new(),
        }))
    }

    #[test]
    fn test_parse_page_count() {
        let info = "Title:          Referto\nProducer:       LibreOffice\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_page_count(info), Some(12));
        assert_eq!(parse_page_count("Title: x\n"), None);
    }

    #[test]
    fn test_text_file_name() {
        assert_eq!(text_file_name("referto.pdf"), "referto.txt");
        assert_eq!(text_file_name("referto"), "referto.txt");
    }

    #[test]
    fn test_extract_one_unit_per_page() {
        let source = SourceDocument::new("referto.pdf", PDF_HEADER.to_vec());
        let doc = adapter().extract(&source, "it").unwrap();
        assert_eq!(doc.text, "Referto di Mario Rossi\nnato a Roma\n\nPagina due");
        assert_eq!(doc.kind, SourceKind::Pdf);
        assert_eq!(doc.format, DocumentFormat::DigitalText);
        assert_eq!(doc.index.len(), 2);
        assert_eq!(doc.metadata.get("pages").map(String::as_str), Some("2"));
        assert_eq!(doc.chars_per_page(), 18);
    }

    #[test]
    fn test_rebuild_writes_text_layer() {
        let source = SourceDocument::new("referto.pdf", PDF_HEADER.to_vec());
        let doc = adapter().extract(&source, "it").unwrap();
        let content = RedactStrategy
            .anonymize(&doc.text, &[detection(&doc.text, "Mario Rossi", "PERSON")])
            .unwrap();
        let rendered = adapter().rebuild(&doc, &content).unwrap();

        assert_eq!(rendered.file_name, "referto.txt");
        assert_eq!(
            String::from_utf8(rendered.content).unwrap(),
            "Referto di [PERSON]\nnato a Roma\n\nPagina due"
        );
        assert!(rendered.page_images.is_empty());
    }

    #[test]
    fn test_render_failure_surfaces() {
        let source = SourceDocument::new("referto.pdf", PDF_HEADER.to_vec());
        assert!(matches!(
            adapter().render_pages(&source),
            Err(Error::DocumentProcessing(_))
        ));
    }
}
