//! Visual redaction
//!
//! The text artifact masks every detected character with `█`, keeping the
//! character count. The real output of this mode is raster-level: document
//! reconstruction paints opaque boxes over the page images through
//! [`overlay_boxes`] and leaves any text layer alone.

use super::{
    apply_replacements, validate_detections, AnonymizationMode, AnonymizationStrategy,
    AnonymizedContent, Replacement,
};
use crate::document::BoundingBox;
use crate::ensemble::Detection;
use crate::error::Result;
use image::{Rgba, RgbaImage};

pub const MASK_CHAR: char = '█';

/// Opaque black
pub const DEFAULT_FILL: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, Clone)]
pub struct VisualRedactStrategy {
    pub fill: Rgba<u8>,
}

impl Default for VisualRedactStrategy {
    fn default() -> Self {
        Self { fill: DEFAULT_FILL }
    }
}

impl AnonymizationStrategy for VisualRedactStrategy {
    fn mode(&self) -> AnonymizationMode {
        AnonymizationMode::VisualRedact
    }

    fn is_reversible(&self) -> bool {
        false
    }

    fn anonymize(&self, text: &str, detections: &[Detection]) -> Result<AnonymizedContent> {
        let sorted = validate_detections(text, detections)?;
        let replacements: Vec<Replacement> = sorted
            .iter()
            .map(|d| Replacement {
                start: d.start,
                end: d.end,
                entity_type: d.entity_type.clone(),
                replacement: std::iter::repeat(MASK_CHAR)
                    .take(text[d.start..d.end].chars().count())
                    .collect(),
            })
            .collect();

        Ok(AnonymizedContent {
            mode: AnonymizationMode::VisualRedact,
            text: apply_replacements(text, &replacements),
            replacements,
            mapping: None,
        })
    }
}

/// Paint every box (grown by `padding`, clipped to the image) with `fill`.
///
/// Returns the number of pixels painted.
pub fn overlay_boxes(
    image: &mut RgbaImage,
    boxes: &[BoundingBox],
    padding: u32,
    fill: Rgba<u8>,
) -> u64 {
    let (width, height) = image.dimensions();
    let mut painted = 0u64;
    for b in boxes {
        let x0 = b.left.saturating_sub(padding).min(width);
        let y0 = b.top.saturating_sub(padding).min(height);
        let x1 = b.left.saturating_add(b.width).saturating_add(padding).min(width);
        let y1 = b.top.saturating_add(b.height).saturating_add(padding).min(height);
        for y in y0..y1 {
            for x in x0..x1 {
                image.put_pixel(x, y, fill);
                painted += 1;
            }
        }
    }
    painted
}
