//! Minimal XML text-node scanner for OOXML parts
//!
//! Locates the character content of elements with an exact qualified name
//! (`w:t`, `a:t`, `t`) and rewrites it in place, leaving every other byte of
//! the part untouched.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Content of one text element
#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    /// Byte range of the opening tag, `<` through `>`
    pub open_tag: (usize, usize),
    /// Byte range of the raw (escaped) content
    pub content: (usize, usize),
    /// Unescaped text
    pub text: String,
    /// Ordinal of the enclosing group element (paragraph, string item)
    pub group: usize,
}

struct Tag<'a> {
    name: &'a str,
    closing: bool,
    self_closing: bool,
    start: usize,
    end: usize,
}

/// Find the end of a markup construct starting at `start` (`<`), returning
/// the index just past it.
fn skip_special(xml: &str, start: usize) -> Option<usize> {
    let rest = &xml[start..];
    let terminator = if rest.starts_with("<!--") {
        "-->"
    } else if rest.starts_with("<![CDATA[") {
        "]]>"
    } else if rest.starts_with("<?") {
        "?>"
    } else {
        ">"
    };
    rest.find(terminator).map(|i| start + i + terminator.len())
}

fn parse_tag(xml: &str, start: usize) -> Option<Tag<'_>> {
    let bytes = xml.as_bytes();
    let mut i = start + 1;
    let closing = bytes.get(i) == Some(&b'/');
    if closing {
        i += 1;
    }
    let name_start = i;
    while i < bytes.len() && !matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n' | b'/' | b'>') {
        i += 1;
    }
    let name = &xml[name_start..i];

    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(bytes[i]),
            (None, b'>') => {
                let self_closing = i > start && bytes[i - 1] == b'/';
                return Some(Tag {
                    name,
                    closing,
                    self_closing,
                    start,
                    end: i + 1,
                });
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Collect every `tag` element's content, numbering enclosing `group` elements.
pub fn text_nodes(xml: &str, tag: &str, group: &str) -> Result<Vec<TextNode>> {
    let mut nodes = Vec::new();
    let mut group_ordinal = 0usize;
    let mut seen_group = false;
    let mut pos = 0;

    while let Some(offset) = xml[pos..].find('<') {
        let start = pos + offset;
        let rest = &xml[start..];
        if rest.starts_with("<!") || rest.starts_with("<?") {
            pos = skip_special(xml, start)
                .ok_or_else(|| Error::DocumentProcessing("Unterminated XML markup".to_string()))?;
            continue;
        }

        let parsed = parse_tag(xml, start)
            .ok_or_else(|| Error::DocumentProcessing("Unterminated XML tag".to_string()))?;

        if !parsed.closing && parsed.name == group {
            if seen_group {
                group_ordinal += 1;
            }
            seen_group = true;
        }

        if !parsed.closing && !parsed.self_closing && parsed.name == tag {
            let close = format!("</{}>", tag);
            let content_start = parsed.end;
            let content_len = xml[content_start..].find(&close).ok_or_else(|| {
                Error::DocumentProcessing(format!("Missing closing tag for <{}>", tag))
            })?;
            let content_end = content_start + content_len;
            let raw = &xml[content_start..content_end];
            nodes.push(TextNode {
                open_tag: (parsed.start, parsed.end),
                content: (content_start, content_end),
                text: unescape(raw)?,
                group: group_ordinal,
            });
            pos = content_end + close.len();
            continue;
        }

        pos = parsed.end;
    }

    Ok(nodes)
}

/// Rewrite the content of selected nodes (`index → new text`).
///
/// Nodes whose new text has leading or trailing whitespace get
/// `xml:space="preserve"` on a `w:`-namespaced tag that lacks it.
pub fn replace_text_nodes(
    xml: &str,
    nodes: &[TextNode],
    replacements: &BTreeMap<usize, String>,
) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0;
    for (i, node) in nodes.iter().enumerate() {
        let Some(new_text) = replacements.get(&i) else {
            continue;
        };
        let (tag_start, tag_end) = node.open_tag;
        let open = &xml[tag_start..tag_end];
        let needs_preserve = new_text.starts_with(char::is_whitespace)
            || new_text.ends_with(char::is_whitespace);

        out.push_str(&xml[cursor..tag_start]);
        if needs_preserve && open.starts_with("<w:") && !open.contains("xml:space") {
            let insert_at = open.len() - if open.ends_with("/>") { 2 } else { 1 };
            out.push_str(&open[..insert_at]);
            out.push_str(" xml:space=\"preserve\"");
            out.push_str(&open[insert_at..]);
        } else {
            out.push_str(open);
        }
        out.push_str(&escape(new_text));
        cursor = node.content.1;
    }
    out.push_str(&xml[cursor..]);
    out
}

/// Escape text content
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolve the predefined and numeric character references
pub fn unescape(raw: &str) -> Result<String> {
    if let Some(inner) = raw
        .strip_prefix("<![CDATA[")
        .and_then(|r| r.strip_suffix("]]>"))
    {
        return Ok(inner.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let offset = raw.len() - rest.len() + amp;
        let after = &rest[amp + 1..];
        let semi = after.find(';').ok_or_else(|| {
            Error::DocumentProcessing(format!("Unterminated XML entity at byte {}", offset))
        })?;
        let entity = &after[..semi];
        let resolved = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32).ok_or_else(|| {
                    Error::DocumentProcessing(format!("Unknown XML entity at byte {}", offset))
                })?
            }
        };
        out.push(resolved);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document><w:body>
<w:p><w:r><w:t>Hello </w:t></w:r><w:r><w:t xml:space="preserve">John &amp; Co</w:t></w:r><w:tab/></w:p>
<!-- <w:t>ignored</w:t> -->
<w:p><w:r><w:t/></w:r><w:r><w:t>Second</w:t></w:r></w:p>
</w:body></w:document>"#;

    #[test]
    fn test_text_nodes() {
        let nodes = text_nodes(DOC, "w:t", "w:p").unwrap();
        let texts: Vec<&str> = nodes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello ", "John & Co", "Second"]);
        assert_eq!(nodes[0].group, 0);
        assert_eq!(nodes[1].group, 0);
        assert_eq!(nodes[2].group, 1);
    }

    #[test]
    fn test_tag_prefix_is_exact() {
        let xml = "<w:p><w:tbl><w:tc><w:t>cell</w:t></w:tc></w:tbl></w:p>";
        let nodes = text_nodes(xml, "w:t", "w:p").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text, "cell");
    }

    #[test]
    fn test_replace_text_nodes() {
        let nodes = text_nodes(DOC, "w:t", "w:p").unwrap();
        let mut replacements = BTreeMap::new();
        replacements.insert(1, "[PERSON] <x>".to_string());
        replacements.insert(0, "Ciao ".to_string());
        let out = replace_text_nodes(DOC, &nodes, &replacements);
        assert!(out.contains(r#"<w:t xml:space="preserve">[PERSON] &lt;x&gt;</w:t>"#));
        assert!(out.contains(r#"<w:t xml:space="preserve">Ciao </w:t>"#));
        assert!(out.contains("<w:t>Second</w:t>"));

        let again = text_nodes(&out, "w:t", "w:p").unwrap();
        assert_eq!(again[1].text, "[PERSON] <x>");
    }

    #[test]
    fn test_no_replacements_is_identity() {
        let nodes = text_nodes(DOC, "w:t", "w:p").unwrap();
        assert_eq!(replace_text_nodes(DOC, &nodes, &BTreeMap::new()), DOC);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a &lt;b&gt; &#233;&#x41;").unwrap(), "a <b> éA");
        assert!(unescape("broken &amp").is_err());
        assert_eq!(unescape("<![CDATA[x < y]]>").unwrap(), "x < y");
    }

    #[test]
    fn test_bad_entity_error_has_offset_only() {
        let err = unescape("Mario &Rossi; abc").unwrap_err().to_string();
        assert!(err.contains("byte 6"), "{}", err);
        assert!(!err.contains("Rossi"), "{}", err);

        let err = unescape("ok &Mario Rossi").unwrap_err().to_string();
        assert!(err.contains("byte 3"), "{}", err);
        assert!(!err.contains("Mario"), "{}", err);
    }

    #[test]
    fn test_unterminated_tag() {
        assert!(text_nodes("<w:p><w:t", "w:t", "w:p").is_err());
    }
}
