//! RFC 822 email (`.eml`)
//!
//! Units are the address and subject header values of the top-level message
//! and the bodies of its text and HTML parts. Rebuilding splices rewritten
//! units into the raw message, so untouched headers, boundaries and
//! attachments stay byte-identical. A rewritten body that was
//! quoted-printable or base64 is written back as 8bit.

use super::reconstruct::rewrite_units;
use super::{
    DocumentAdapter, ExtractedDocument, Extractor, Location, Reconstructor, RenderedDocument,
    SourceDocument, SourceKind, TextBuilder, UnitRef,
};
use crate::error::{Error, Result};
use crate::modes::AnonymizedContent;
use mail_parser::{Encoding, Header, HeaderName, HeaderValue, MessageParser, PartType};
use std::ops::Range;

const HEADER_PART: &str = "header";
const BODY_PART: &str = "body";

/// A rewritable span of the raw message
struct MailUnit {
    unit: UnitRef,
    text: String,
    span: Range<usize>,
    /// `text` is a decoding of the span, not the span itself
    decoded: bool,
    /// Value of the part's Content-Transfer-Encoding header
    transfer_encoding: Option<Range<usize>>,
}

fn is_personal_header(name: &HeaderName<'_>) -> bool {
    matches!(
        name,
        HeaderName::Subject
            | HeaderName::From
            | HeaderName::To
            | HeaderName::Cc
            | HeaderName::Bcc
            | HeaderName::ReplyTo
            | HeaderName::Sender
            | HeaderName::Comments
    )
}

/// Trimmed raw value of a header and its byte range
fn value_span<'a>(raw: &'a [u8], header: &Header<'_>) -> Option<(Range<usize>, &'a str)> {
    let start = header.offset_start as usize;
    let end = header.offset_end as usize;
    let value = std::str::from_utf8(raw.get(start..end)?).ok()?;
    let lead = value.len() - value.trim_start().len();
    let trimmed = value.trim();
    Some((start + lead..start + lead + trimmed.len(), trimmed))
}

fn parse_units(raw: &[u8]) -> Result<(Vec<MailUnit>, Vec<String>)> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::DocumentProcessing("Unparseable email message".to_string()))?;
    let mut units = Vec::new();
    let mut warnings = Vec::new();

    if let Some(root) = message.parts.first() {
        for (i, header) in root.headers.iter().enumerate() {
            if !is_personal_header(&header.name) {
                continue;
            }
            let Some((span, raw_value)) = value_span(raw, header) else {
                warnings.push(format!("header {}: value is not UTF-8", i));
                continue;
            };
            let (text, decoded) = match &header.value {
                HeaderValue::Text(value) if raw_value.contains("=?") => (value.to_string(), true),
                _ => (raw_value.to_string(), false),
            };
            units.push(MailUnit {
                unit: UnitRef::new(HEADER_PART, i),
                text,
                span,
                decoded,
                transfer_encoding: None,
            });
        }
    }

    for (id, part) in message.parts.iter().enumerate() {
        let decoded_body = match &part.body {
            PartType::Text(text) | PartType::Html(text) => text,
            _ => continue,
        };
        let span = part.offset_body as usize..part.offset_end as usize;
        let Some(raw_body) = raw.get(span.clone()) else {
            warnings.push(format!("part {}: body offsets out of range", id));
            continue;
        };

        let transfer_encoding = if matches!(part.encoding, Encoding::None) {
            None
        } else {
            part.headers
                .iter()
                .find(|h| matches!(h.name, HeaderName::ContentTransferEncoding))
                .and_then(|h| value_span(raw, h))
                .map(|(span, _)| span)
        };
        let (text, decoded) = match std::str::from_utf8(raw_body) {
            Ok(body) if transfer_encoding.is_none() => (body.to_string(), false),
            _ => (decoded_body.to_string(), true),
        };
        units.push(MailUnit {
            unit: UnitRef::new(BODY_PART, id),
            text,
            span,
            decoded,
            transfer_encoding,
        });
    }

    Ok((units, warnings))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmailAdapter;

impl Extractor for EmailAdapter {
    fn extract(&self, source: &SourceDocument, _language: &str) -> Result<ExtractedDocument> {
        let (units, warnings) = parse_units(&source.content)?;

        let mut builder = TextBuilder::new();
        let mut headers = 0usize;
        for (n, unit) in units.iter().enumerate() {
            let is_body = unit.unit.part == BODY_PART;
            if n > 0 {
                builder.push_separator(if is_body { "\n\n" } else { "\n" });
            }
            if !is_body {
                headers += 1;
            }
            builder.push_unit(&unit.text, Location::Unit(unit.unit.clone()))?;
        }

        let (text, index) = builder.finish();
        let mut doc = ExtractedDocument::new(source, SourceKind::Eml, text, index);
        for warning in warnings {
            doc.warn(warning);
        }
        doc.metadata.insert("headers".to_string(), headers.to_string());
        doc.metadata
            .insert("body_parts".to_string(), (units.len() - headers).to_string());
        Ok(doc)
    }
}

impl Reconstructor for EmailAdapter {
    fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument> {
        let raw = &doc.source.content;
        let edits = rewrite_units(doc, &content.replacements);
        if edits.is_empty() {
            return Ok(RenderedDocument::with_content(doc, raw.clone()));
        }

        let (units, _) = parse_units(raw)?;
        let mut splices: Vec<(Range<usize>, Vec<u8>)> = Vec::new();
        for unit in &units {
            let Some(text) = edits.get(&unit.unit) else {
                continue;
            };
            let mut bytes = text.clone().into_bytes();
            if unit.decoded && raw[unit.span.clone()].ends_with(b"\n") && !bytes.ends_with(b"\n")
            {
                bytes.extend_from_slice(b"\r\n");
            }
            if let Some(cte) = &unit.transfer_encoding {
                splices.push((cte.clone(), b"8bit".to_vec()));
            }
            splices.push((unit.span.clone(), bytes));
        }
        splices.sort_by_key(|(span, _)| span.start);

        let mut out = Vec::with_capacity(raw.len());
        let mut cursor = 0;
        for (span, bytes) in splices {
            if span.start < cursor {
                continue;
            }
            out.extend_from_slice(&raw[cursor..span.start]);
            out.extend_from_slice(&bytes);
            cursor = span.end;
        }
        out.extend_from_slice(&raw[cursor..]);

        tracing::debug!(units = edits.len(), "Rebuilt email message");
        Ok(RenderedDocument::with_content(doc, out))
    }
}

impl DocumentAdapter for EmailAdapter {
    fn name(&self) -> &'static str {
        "eml"
    }
}
