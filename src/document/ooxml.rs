//! Office Open XML packages
//!
//! Shared zip plumbing for DOCX, XLSX and PPTX plus the DOCX adapter.
//! Each text element of a part becomes one structural unit; rebuilding
//! rewrites only the parts that contain edited units and copies every other
//! entry of the package verbatim.

use super::reconstruct::rewrite_units;
use super::xml::{replace_text_nodes, text_nodes};
use super::{
    DocumentAdapter, ExtractedDocument, Extractor, Location, Reconstructor, RenderedDocument,
    SourceDocument, SourceKind, TextBuilder, UnitRef,
};
use crate::error::{Error, Result};
use crate::modes::AnonymizedContent;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Separator between parts (body, headers, slides)
pub(crate) const PART_SEPARATOR: &str = "\n\n";
/// Separator between groups (paragraphs, shared strings)
pub(crate) const GROUP_SEPARATOR: &str = "\n";

/// Text element and grouping element of a part
pub(crate) type TagLookup = fn(&str) -> (&'static str, &'static str);

pub(crate) fn open(content: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>> {
    Ok(ZipArchive::new(Cursor::new(content))?)
}

pub(crate) fn read_part(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String> {
    let mut file = archive.by_name(name)?;
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(xml)
}

/// Parts named `<prefix><n><suffix>`, sorted by `n`
pub(crate) fn numbered_parts(
    archive: &ZipArchive<Cursor<&[u8]>>,
    prefix: &str,
    suffix: &str,
) -> Vec<String> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
            Some((n.parse().ok()?, name.to_string()))
        })
        .collect();
    parts.sort();
    parts.into_iter().map(|(_, name)| name).collect()
}

/// Flatten the text elements of `parts`, in order, into one document
pub(crate) fn extract_package(
    source: &SourceDocument,
    kind: SourceKind,
    parts: &[String],
    tags: TagLookup,
) -> Result<ExtractedDocument> {
    let mut archive = open(&source.content)?;
    let mut builder = TextBuilder::new();
    let mut warnings = Vec::new();
    let mut read_parts = 0usize;
    let mut units = 0usize;

    for part in parts {
        let (tag, group) = tags(part);
        let nodes = match read_part(&mut archive, part).and_then(|xml| text_nodes(&xml, tag, group)) {
            Ok(nodes) => nodes,
            Err(e) => {
                warnings.push(format!("{}: {}", part, e));
                continue;
            }
        };
        read_parts += 1;

        if !builder.is_empty() && nodes.iter().any(|n| !n.text.is_empty()) {
            builder.push_separator(PART_SEPARATOR);
        }
        let mut current_group = nodes.first().map(|n| n.group);
        for (i, node) in nodes.iter().enumerate() {
            if Some(node.group) != current_group {
                builder.push_separator(GROUP_SEPARATOR);
                current_group = Some(node.group);
            }
            if !node.text.is_empty() {
                units += 1;
            }
            builder.push_unit(&node.text, Location::Unit(UnitRef::new(part.as_str(), i)))?;
        }
    }

    if read_parts == 0 {
        return Err(Error::DocumentProcessing(format!(
            "No readable text parts in {} package",
            kind.name()
        )));
    }

    let (text, index) = builder.finish();
    let mut doc = ExtractedDocument::new(source, kind, text, index);
    for warning in warnings {
        doc.warn(warning);
    }
    doc.metadata.insert("parts".to_string(), read_parts.to_string());
    doc.metadata.insert("units".to_string(), units.to_string());
    tracing::debug!(kind = kind.name(), parts = read_parts, units, "Extracted package text");
    Ok(doc)
}

/// Write `content` back into the package of `doc`
pub(crate) fn rebuild_package(
    doc: &ExtractedDocument,
    content: &AnonymizedContent,
    tags: TagLookup,
) -> Result<RenderedDocument> {
    let edits = rewrite_units(doc, &content.replacements);
    let mut by_part: BTreeMap<&str, BTreeMap<usize, String>> = BTreeMap::new();
    for (unit, text) in &edits {
        by_part
            .entry(unit.part.as_str())
            .or_default()
            .insert(unit.index, text.clone());
    }

    let mut archive = open(&doc.source.content)?;
    let mut rewritten: BTreeMap<String, String> = BTreeMap::new();
    for (part, replacements) in by_part {
        let (tag, group) = tags(part);
        let xml = read_part(&mut archive, part)?;
        let nodes = text_nodes(&xml, tag, group)?;
        rewritten.insert(part.to_string(), replace_text_nodes(&xml, &nodes, &replacements));
    }

    let bytes = rewrite_package(&doc.source.content, &rewritten)?;
    tracing::debug!(
        kind = doc.kind.name(),
        parts = rewritten.len(),
        units = edits.len(),
        "Rebuilt package"
    );
    Ok(RenderedDocument::with_content(doc, bytes))
}

/// Copy a package, replacing the named parts
pub(crate) fn rewrite_package(content: &[u8], parts: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let mut archive = open(content)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        match parts.get(file.name()) {
            Some(xml) => {
                let name = file.name().to_string();
                drop(file);
                writer.start_file(name, options)?;
                writer.write_all(xml.as_bytes())?;
            }
            None => writer.raw_copy_file(file)?,
        }
    }

    Ok(writer.finish()?.into_inner())
}

fn docx_tags(_part: &str) -> (&'static str, &'static str) {
    ("w:t", "w:p")
}

/// Word documents: body, then headers, then footers
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxAdapter;

impl Extractor for DocxAdapter {
    fn extract(&self, source: &SourceDocument, _language: &str) -> Result<ExtractedDocument> {
        let archive = open(&source.content)?;
        let mut parts = vec!["word/document.xml".to_string()];
        parts.extend(numbered_parts(&archive, "word/header", ".xml"));
        parts.extend(numbered_parts(&archive, "word/footer", ".xml"));
        extract_package(source, SourceKind::Docx, &parts, docx_tags)
    }
}

impl Reconstructor for DocxAdapter {
    fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument> {
        rebuild_package(doc, content, docx_tags)
    }
}

impl DocumentAdapter for DocxAdapter {
    fn name(&self) -> &'static str {
        "docx"
    }
}
