//! Format sniffing
//!
//! Pure functions from bytes and file name to a [`SourceKind`] /
//! [`DocumentFormat`]. Magic bytes come first; the extension only marks
//! `.eml` messages and decides between text flavours.

use super::{DocumentFormat, SourceDocument, SourceKind};
use std::io::Cursor;
use zip::ZipArchive;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Classify a document. Never fails; unknown input is `Unsupported`.
pub fn classify(source: &SourceDocument) -> DocumentFormat {
    sniff(source)
        .map(|kind| kind.format())
        .unwrap_or(DocumentFormat::Unsupported)
}

/// Detect the concrete container of a document
pub fn sniff(source: &SourceDocument) -> Option<SourceKind> {
    let content = &source.content;

    if content.is_empty() {
        return (!source.page_images.is_empty()).then_some(SourceKind::PageImages);
    }

    if content.starts_with(ZIP_MAGIC) {
        return container_kind(content);
    }

    if source.extension().as_deref() == Some("eml") {
        return Some(SourceKind::Eml);
    }

    if let Some(kind) = infer::get(content) {
        let mime = kind.mime_type();
        if mime.starts_with("image/") {
            return Some(SourceKind::Image);
        }
        if mime == "application/pdf" {
            return Some(SourceKind::Pdf);
        }
        if !mime.starts_with("text/") {
            tracing::debug!(mime, "No adapter for detected MIME type");
            return None;
        }
    }

    if std::str::from_utf8(content).is_err() {
        return None;
    }

    match source.extension().as_deref() {
        Some("csv") => Some(SourceKind::Delimited { delimiter: b',' }),
        Some("tsv") | Some("tab") => Some(SourceKind::Delimited { delimiter: b'\t' }),
        _ => Some(SourceKind::PlainText),
    }
}

/// Office Open XML flavour, decided by the parts the package carries
fn container_kind(content: &[u8]) -> Option<SourceKind> {
    let archive = ZipArchive::new(Cursor::new(content)).ok()?;
    let mut kind = None;
    for name in archive.file_names() {
        if name == "word/document.xml" {
            kind = Some(SourceKind::Docx);
        } else if name == "xl/workbook.xml" || name == "xl/sharedStrings.xml" {
            kind = Some(SourceKind::Xlsx);
        } else if name.starts_with("ppt/slides/") {
            kind = Some(SourceKind::Pptx);
        }
        if kind.is_some() {
            break;
        }
    }
    kind
}
