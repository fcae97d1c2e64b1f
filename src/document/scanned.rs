//! Scanned documents
//!
//! Pages are recognized word by word; every word becomes an index entry
//! pointing at its box on the page. Rebuilding never touches a text layer:
//! it paints opaque rectangles over the boxes of replaced words and
//! re-encodes each page in its original image format.

use super::ocr::OcrEngine;
use super::reconstruct::touched_regions;
use super::{
    BoundingBox, DocumentAdapter, DocumentFormat, ExtractedDocument, Extractor, Location,
    PageRegion, Reconstructor, RenderedDocument, SourceDocument, SourceKind, TextBuilder,
};
use crate::error::{Error, Result};
use crate::modes::visual::{overlay_boxes, DEFAULT_FILL};
use crate::modes::AnonymizedContent;
use image::{ColorType, DynamicImage, ImageFormat, RgbaImage};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

const PAGE_SEPARATOR: &str = "\n\n";

/// OCR-backed adapter for images and rendered pages
pub struct ScannedAdapter {
    ocr: Arc<dyn OcrEngine>,
    padding: u32,
}

impl ScannedAdapter {
    pub fn new(ocr: Arc<dyn OcrEngine>, padding: u32) -> Self {
        Self { ocr, padding }
    }

    /// Page rasters of a source: the supplied renderings, or the content
    /// itself when it is an image.
    fn pages(source: &SourceDocument) -> Vec<&[u8]> {
        if source.page_images.is_empty() {
            vec![source.content.as_slice()]
        } else {
            source.page_images.iter().map(Vec::as_slice).collect()
        }
    }

    fn redact_page(&self, bytes: &[u8], boxes: &[BoundingBox]) -> Result<Vec<u8>> {
        let format = image::guess_format(bytes).unwrap_or(ImageFormat::Png);
        let decoded = image::load_from_memory_with_format(bytes, format)?;
        let color = decoded.color();
        let mut canvas = decoded.to_rgba8();
        let painted = overlay_boxes(&mut canvas, boxes, self.padding, DEFAULT_FILL);
        tracing::debug!(boxes = boxes.len(), pixels = painted, "Painted redaction boxes");

        let mut out = Cursor::new(Vec::new());
        restore_color(canvas, color, format).write_to(&mut out, format)?;
        Ok(out.into_inner())
    }
}

/// Convert a painted canvas back to a color type the format can encode
fn restore_color(canvas: RgbaImage, original: ColorType, format: ImageFormat) -> DynamicImage {
    let rgba = DynamicImage::ImageRgba8(canvas);
    match (original, format) {
        (ColorType::L8, _) => DynamicImage::ImageLuma8(rgba.to_luma8()),
        (ColorType::La8, ImageFormat::Jpeg) => DynamicImage::ImageLuma8(rgba.to_luma8()),
        (ColorType::La8, _) => DynamicImage::ImageLumaA8(rgba.to_luma_alpha8()),
        (ColorType::Rgb8, _) | (_, ImageFormat::Jpeg) => DynamicImage::ImageRgb8(rgba.to_rgb8()),
        _ => rgba,
    }
}

impl Extractor for ScannedAdapter {
    fn extract(&self, source: &SourceDocument, language: &str) -> Result<ExtractedDocument> {
        let pages = Self::pages(source);
        let mut builder = TextBuilder::new();
        let mut warnings = Vec::new();
        let mut read_pages = 0usize;
        let mut token_count = 0usize;

        for (page, bytes) in pages.iter().enumerate() {
            let tokens = image::load_from_memory(bytes)
                .map_err(Error::from)
                .and_then(|raster| self.ocr.recognize(&raster, language));
            let mut tokens = match tokens {
                Ok(tokens) => tokens,
                Err(e) => {
                    warnings.push(format!("page {}: {}", page + 1, e));
                    continue;
                }
            };
            read_pages += 1;
            tokens.sort_by_key(|t| t.order_key());

            if !builder.is_empty() && !tokens.is_empty() {
                builder.push_separator(PAGE_SEPARATOR);
            }
            for (i, token) in tokens.iter().enumerate() {
                if i > 0 {
                    let separator = if tokens[i - 1].same_line(token) { " " } else { "\n" };
                    builder.push_separator(separator);
                }
                builder.push_unit(
                    &token.text,
                    Location::Region(PageRegion {
                        page,
                        bbox: token.bbox,
                    }),
                )?;
            }
            token_count += tokens.len();
        }

        if read_pages == 0 {
            return Err(Error::DocumentProcessing(format!(
                "No page of {} could be read: {}",
                source.file_name,
                warnings.join("; ")
            )));
        }

        let kind = super::sniff(source).unwrap_or(SourceKind::Image);
        let (text, index) = builder.finish();
        let mut doc = ExtractedDocument::new(source, kind, text, index);
        doc.format = DocumentFormat::Scanned;
        for warning in warnings {
            doc.warn(warning);
        }
        doc.metadata.insert("pages".to_string(), pages.len().to_string());
        doc.metadata.insert("tokens".to_string(), token_count.to_string());
        doc.metadata
            .insert("ocr_engine".to_string(), self.ocr.name().to_string());
        tracing::info!(pages = pages.len(), tokens = token_count, "OCR extraction complete");
        Ok(doc)
    }
}

impl Reconstructor for ScannedAdapter {
    fn rebuild(
        &self,
        doc: &ExtractedDocument,
        content: &AnonymizedContent,
    ) -> Result<RenderedDocument> {
        let mut boxes: BTreeMap<usize, Vec<BoundingBox>> = BTreeMap::new();
        for region in touched_regions(doc, &content.replacements) {
            boxes.entry(region.page).or_default().push(region.bbox);
        }

        let pages = Self::pages(&doc.source);
        let mut rendered = Vec::with_capacity(pages.len());
        for (page, bytes) in pages.iter().enumerate() {
            match boxes.get(&page) {
                Some(page_boxes) => rendered.push(self.redact_page(bytes, page_boxes)?),
                None => rendered.push(bytes.to_vec()),
            }
        }

        tracing::info!(
            pages = pages.len(),
            redacted_pages = boxes.len(),
            boxes = boxes.values().map(Vec::len).sum::<usize>(),
            "Rebuilt scanned pages"
        );

        let (content, page_images) = if doc.source.page_images.is_empty() {
            (rendered.pop().unwrap_or_default(), Vec::new())
        } else {
            (doc.source.content.clone(), rendered)
        };
        Ok(RenderedDocument {
            format: DocumentFormat::Scanned,
            file_name: doc.source.file_name.clone(),
            content,
            page_images,
        })
    }
}

impl DocumentAdapter for ScannedAdapter {
    fn name(&self) -> &'static str {
        "scanned"
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::super::ocr::{OcrEngine, OcrToken};
    use super::super::BoundingBox;
    use crate::error::Result;
    use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

    pub const WORD_WIDTH: u32 = 40;
    pub const WORD_HEIGHT: u32 = 12;
    pub const PAGE_WIDTH: u32 = 400;

    /// Box of the `n`-th word on `line`
    pub fn word_box(line: u32, n: u32) -> BoundingBox {
        BoundingBox {
            left: 10 + n * (WORD_WIDTH + 10),
            top: 10 + line * (WORD_HEIGHT + 8),
            width: WORD_WIDTH,
            height: WORD_HEIGHT,
        }
    }

    /// White page with a grey block under each word box; the page number is
    /// encoded in the red channel of pixel (0, 0).
    pub fn page_png(page: u8, lines: &[&str]) -> Vec<u8> {
        let height = 20 + lines.len() as u32 * (WORD_HEIGHT + 8);
        let mut image = RgbaImage::from_pixel(PAGE_WIDTH, height, Rgba([255, 255, 255, 255]));
        image.put_pixel(0, 0, Rgba([page, 255, 255, 255]));
        for (l, line) in lines.iter().enumerate() {
            for (n, _) in line.split_whitespace().enumerate() {
                let b = word_box(l as u32, n as u32);
                for y in b.top..b.top + b.height {
                    for x in b.left..b.left + b.width {
                        image.put_pixel(x, y, Rgba([128, 128, 128, 255]));
                    }
                }
            }
        }
        let mut out = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    /// OCR stub that "reads" a fixed transcript per page, keyed by the red
    /// channel of pixel (0, 0).
    pub struct ScriptedOcr {
        pub pages: Vec<Vec<&'static str>>,
    }

    impl OcrEngine for ScriptedOcr {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn recognize(&self, page: &DynamicImage, _language: &str) -> Result<Vec<OcrToken>> {
            let index = page.get_pixel(0, 0)[0] as usize;
            let lines = self.pages.get(index).cloned().unwrap_or_default();
            let mut tokens = Vec::new();
            for (l, line) in lines.iter().enumerate() {
                for (n, word) in line.split_whitespace().enumerate() {
                    tokens.push(OcrToken {
                        text: word.to_string(),
                        bbox: word_box(l as u32, n as u32),
                        block: 1,
                        paragraph: 1,
                        line: l as u32 + 1,
                        word: n as u32 + 1,
                        confidence: 95.0,
                    });
                }
            }
            // engines do not promise reading order
            tokens.reverse();
            Ok(tokens)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{page_png, word_box, ScriptedOcr};
    use super::*;
    use crate::modes::test_support::detection;
    use crate::modes::{AnonymizationStrategy, VisualRedactStrategy};
    use image::Rgba;

    fn adapter() -> ScannedAdapter {
        ScannedAdapter::new(
            Arc::new(ScriptedOcr {
                pages: vec![
                    vec!["Patient Mario Rossi", "born 1980"],
                    vec!["Second page"],
                ],
            }),
            0,
        )
    }

    fn two_pages() -> SourceDocument {
        SourceDocument::new("scan", Vec::new()).with_page_images(vec![
            page_png(0, &["Patient Mario Rossi", "born 1980"]),
            page_png(1, &["Second page"]),
        ])
    }

    #[test]
    fn test_extract_reading_order() {
        let doc = adapter().extract(&two_pages(), "it").unwrap();
        assert_eq!(doc.text, "Patient Mario Rossi\nborn 1980\n\nSecond page");
        assert_eq!(doc.format, DocumentFormat::Scanned);
        assert!(doc.index.has_regions());
        let entry = doc.index.locate(doc.text.find("Mario").unwrap()).unwrap();
        assert_eq!(
            entry.location,
            Location::Region(PageRegion {
                page: 0,
                bbox: word_box(0, 1)
            })
        );
    }

    #[test]
    fn test_rebuild_paints_only_replaced_words() {
        let source = two_pages();
        let doc = adapter().extract(&source, "it").unwrap();
        let content = VisualRedactStrategy::default()
            .anonymize(&doc.text, &[detection(&doc.text, "Mario Rossi", "PERSON")])
            .unwrap();
        let rendered = adapter().rebuild(&doc, &content).unwrap();

        assert!(rendered.content.is_empty());
        assert_eq!(rendered.page_images.len(), 2);
        assert_eq!(rendered.page_images[1], source.page_images[1]);

        let before = image::load_from_memory(&source.page_images[0]).unwrap().to_rgba8();
        let after = image::load_from_memory(&rendered.page_images[0]).unwrap().to_rgba8();
        let covered = [word_box(0, 1), word_box(0, 2)];
        for (x, y, pixel) in after.enumerate_pixels() {
            let inside = covered.iter().any(|b| {
                x >= b.left && x < b.right() && y >= b.top && y < b.bottom()
            });
            if inside {
                assert_eq!(*pixel, Rgba([0, 0, 0, 255]));
            } else {
                assert_eq!(pixel, before.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_single_image_source() {
        let png = page_png(0, &["Patient Mario Rossi"]);
        let source = SourceDocument::new("scan.png", png.clone());
        let doc = adapter().extract(&source, "it").unwrap();
        assert_eq!(doc.kind, SourceKind::Image);

        let content = VisualRedactStrategy::default()
            .anonymize(&doc.text, &[detection(&doc.text, "Rossi", "PERSON")])
            .unwrap();
        let rendered = adapter().rebuild(&doc, &content).unwrap();
        assert!(rendered.page_images.is_empty());
        assert_ne!(rendered.content, png);
        assert_eq!(image::guess_format(&rendered.content).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_unreadable_page_is_skipped() {
        let mut source = two_pages();
        source.page_images.insert(1, b"not an image".to_vec());
        let doc = adapter().extract(&source, "it").unwrap();
        assert_eq!(doc.warnings.len(), 1);
        assert!(doc.text.ends_with("Second page"));
    }

    #[test]
    fn test_no_readable_page_fails() {
        let source = SourceDocument::new("scan", Vec::new())
            .with_page_images(vec![b"garbage".to_vec()]);
        assert!(matches!(
            adapter().extract(&source, "it"),
            Err(Error::DocumentProcessing(_))
        ));
    }
}
