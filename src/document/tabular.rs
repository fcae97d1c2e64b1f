//! Tabular sources: CSV/TSV and XLSX workbooks
//!
//! Delimited files become one unit per cell, cells joined by `\t` and rows
//! by `\n` in the linear text. Rebuilding writes the same grid back with the
//! original delimiter and line ending, quoting cells where needed.

use super::ooxml::{extract_package, numbered_parts, open, rebuild_package};
use super::reconstruct::rewrite_units;
use super::{
    DocumentAdapter, ExtractedDocument, Extractor, Location, Reconstructor, RenderedDocument,
    SourceDocument, SourceKind, TextBuilder, UnitRef,
};
use crate::error::{Error, Result};
use crate::modes::AnonymizedContent;

const CELLS: &str = "cells";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";

/// Parsed delimited file
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
    pub line_ending: &'static str,
    pub trailing_newline: bool,
}

/// Parse RFC 4180 style delimited text
pub fn parse_delimited(content: &str, delimiter: char) -> Result<Table> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut crlf = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' if field.is_empty() && !quoted => {
                in_quotes = true;
                quoted = true;
            }
            c if c == delimiter => {
                row.push(std::mem::take(&mut field));
                quoted = false;
            }
            '\r' if chars.peek() == Some(&'\n') => crlf = true,
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
                quoted = false;
            }
            c => field.push(c),
        }
    }

    if in_quotes {
        return Err(Error::DocumentProcessing(format!(
            "Unterminated quoted field on row {}",
            rows.len() + 1
        )));
    }
    if !field.is_empty() || !row.is_empty() || quoted {
        row.push(field);
        rows.push(row);
    }

    Ok(Table {
        rows,
        line_ending: if crlf { "\r\n" } else { "\n" },
        trailing_newline: content.ends_with('\n'),
    })
}

fn quote(cell: &str, delimiter: char) -> String {
    if cell.contains(|c: char| c == delimiter || matches!(c, '"' | '\n' | '\r')) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Serialize a table with the given delimiter
pub fn write_delimited(table: &Table, delimiter: char) -> String {
    let separator = delimiter.to_string();
    let mut out = String::new();
    for (i, row) in table.rows.iter().enumerate() {
        if i > 0 {
            out.push_str(table.line_ending);
        }
        let cells: Vec<String> = row.iter().map(|c| quote(c, delimiter)).collect();
        out.push_str(&cells.join(&separator));
    }
    if table.trailing_newline && !table.rows.is_empty() {
        out.push_str(table.line_ending);
    }
    out
}

fn delimiter_of(kind: SourceKind) -> char {
    match kind {
        SourceKind::Delimited { delimiter } => delimiter as char,
        _ => ',',
    }
}

fn parse_source(source: &SourceDocument, delimiter: char) -> Result<Table> {
    let content = std::str::from_utf8(&source.content)
        .map_err(|e| Error::DocumentProcessing(format!("Delimited file is not UTF-8: {}", e)))?;
    parse_delimited(content, delimiter)
}

/// CSV and TSV files
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedAdapter;

impl Extractor for DelimitedAdapter {
    fn extract(&self, source: &SourceDocument, _language: &str) -> Result<ExtractedDocument> {
        let kind = match super::sniff(source) {
            Some(kind @ SourceKind::Delimited { .. }) => kind,
            _ => SourceKind::Delimited { delimiter: b',' },
        };
        let table = parse_source(source, delimiter_of(kind))?;

        let mut builder = TextBuilder::new();
        let mut ordinal = 0usize;
        for (r, row) in table.rows.iter().enumerate() {
            if r > 0 {
                builder.push_separator("\n");
            }
            for (c, cell) in row.iter().enumerate() {
                if c > 0 {
                    builder.push_separator("\t");
                }
                builder.push_unit(cell, Location::Unit(UnitRef::new(CELLS, ordinal)))?;
                ordinal += 1;
            }
        }

        let (text, index) = builder.finish();
        let mut doc = ExtractedDocument::new(source, kind, text, index);
        doc.metadata
            .insert("rows".to_string(), table.rows.len().to_string());
        doc.metadata.insert("cells".to_string(), ordinal.to_string());
        Ok(doc)
    }
}

impl Reconstructor for DelimitedAdapter {
    fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument> {
        let delimiter = delimiter_of(doc.kind);
        let mut table = parse_source(&doc.source, delimiter)?;
        let edits = rewrite_units(doc, &content.replacements);

        let mut ordinal = 0usize;
        for row in table.rows.iter_mut() {
            for cell in row.iter_mut() {
                if let Some(text) = edits.get(&UnitRef::new(CELLS, ordinal)) {
                    *cell = text.clone();
                }
                ordinal += 1;
            }
        }

        tracing::debug!(cells = edits.len(), "Rebuilt delimited file");
        Ok(RenderedDocument::with_content(
            doc,
            write_delimited(&table, delimiter).into_bytes(),
        ))
    }
}

impl DocumentAdapter for DelimitedAdapter {
    fn name(&self) -> &'static str {
        "delimited"
    }
}

fn workbook_tags(part: &str) -> (&'static str, &'static str) {
    if part == SHARED_STRINGS {
        ("t", "si")
    } else {
        ("t", "is")
    }
}

/// Excel workbooks: the shared string table, then inline strings per sheet
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxAdapter;

impl Extractor for XlsxAdapter {
    fn extract(&self, source: &SourceDocument, _language: &str) -> Result<ExtractedDocument> {
        let archive = open(&source.content)?;
        let mut parts = Vec::new();
        if archive.file_names().any(|name| name == SHARED_STRINGS) {
            parts.push(SHARED_STRINGS.to_string());
        }
        let sheets = numbered_parts(&archive, "xl/worksheets/sheet", ".xml");
        let sheet_count = sheets.len();
        parts.extend(sheets);

        let mut doc = extract_package(source, SourceKind::Xlsx, &parts, workbook_tags)?;
        doc.metadata
            .insert("sheets".to_string(), sheet_count.to_string());
        Ok(doc)
    }
}

impl Reconstructor for XlsxAdapter {
    fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument> {
        rebuild_package(doc, content, workbook_tags)
    }
}

impl DocumentAdapter for XlsxAdapter {
    fn name(&self) -> &'static str {
        "xlsx"
    }
}
