//! OCR engines
//!
//! An [`OcrEngine`] turns one page raster into word tokens with pixel
//! boxes. [`TesseractOcr`] drives the `tesseract` binary in TSV mode.

use super::process::Tool;
use super::BoundingBox;
use crate::config::OcrConfig;
use crate::error::{Error, Result};
use image::{DynamicImage, ImageFormat};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;

/// One recognized word
#[derive(Debug, Clone, PartialEq)]
pub struct OcrToken {
    pub text: String,
    pub bbox: BoundingBox,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
    pub word: u32,
    /// 0-100, as reported by the engine
    pub confidence: f32,
}

impl OcrToken {
    /// Reading-order key: block, paragraph, line, word
    pub fn order_key(&self) -> (u32, u32, u32, u32) {
        (self.block, self.paragraph, self.line, self.word)
    }

    /// Whether `other` sits on the same text line
    pub fn same_line(&self, other: &OcrToken) -> bool {
        (self.block, self.paragraph, self.line) == (other.block, other.paragraph, other.line)
    }
}

/// Page recognizer
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Recognize the words of one page
    fn recognize(&self, page: &DynamicImage, language: &str) -> Result<Vec<OcrToken>>;
}

/// Map an ISO 639-1 code to a tesseract traineddata name
pub fn tesseract_language(language: &str) -> &str {
    match language {
        "it" => "ita",
        "en" => "eng",
        "de" => "deu",
        "fr" => "fra",
        "es" => "spa",
        other => other,
    }
}

/// Parse tesseract `tsv` output into word tokens
pub fn parse_tsv(tsv: &str) -> Result<Vec<OcrToken>> {
    let mut tokens = Vec::new();
    for (n, line) in tsv.lines().enumerate() {
        if n == 0 && line.starts_with("level") {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let text = fields[11..].join("\t");
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let number = |i: usize| -> Result<u32> {
            fields[i].trim().parse().map_err(|_| {
                Error::DocumentProcessing(format!("Bad OCR field {} on row {}", i, n + 1))
            })
        };
        tokens.push(OcrToken {
            text: text.to_string(),
            block: number(2)?,
            paragraph: number(3)?,
            line: number(4)?,
            word: number(5)?,
            bbox: BoundingBox {
                left: number(6)?,
                top: number(7)?,
                width: number(8)?,
                height: number(9)?,
            },
            confidence: fields[10].trim().parse().unwrap_or(-1.0),
        });
    }
    Ok(tokens)
}

/// Tesseract command-line engine
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
    timeout: Duration,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::from_config(&OcrConfig::default())
    }
}

impl TesseractOcr {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn tool(&self) -> Tool<'_> {
        Tool {
            binary: &self.binary,
            package: "tesseract-ocr",
        }
    }

    fn run(&self, image_path: &Path, output_base: &Path, language: &str) -> Result<()> {
        let mut command = Command::new(&self.binary);
        command
            .arg(image_path)
            .arg(output_base)
            .args(["-l", tesseract_language(language), "tsv"])
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        self.tool().run(&mut command, self.timeout, "ocr")
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        self.tool().is_installed("--version")
    }

    fn recognize(&self, page: &DynamicImage, language: &str) -> Result<Vec<OcrToken>> {
        let temp_dir = TempDir::new()?;
        let image_path = temp_dir.path().join("page.png");
        page.save_with_format(&image_path, ImageFormat::Png)?;

        let output_base = temp_dir.path().join("page");
        self.run(&image_path, &output_base, language)?;

        let tsv = std::fs::read_to_string(output_base.with_extension("tsv"))?;
        let tokens = parse_tsv(&tsv)?;
        tracing::debug!(
            engine = "tesseract",
            width = page.width(),
            height = page.height(),
            tokens = tokens.len(),
            "Recognized page"
        );
        Ok(tokens)
    }
}
