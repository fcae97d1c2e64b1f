//! Anonyma - ensemble PII detection and document anonymization
//!
//! Anonyma finds personally identifiable information with several
//! independent detectors, merges their votes into one set of typed spans,
//! and rewrites the source document in place while keeping its structure.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Pipeline                              │
//! │                                                                  │
//! │  SourceDocument ──► AdapterRegistry::extract ──► linear text +   │
//! │                     (txt, csv, docx, xlsx, pptx,  PositionIndex  │
//! │                      pdf, eml, images / OCR)           │         │
//! │                                                        ▼         │
//! │  ┌────────────────────────── Ensemble ─────────────────────────┐ │
//! │  │  rule_based │ neural_ner │ custom_patterns │ external ...   │ │
//! │  │        └───────── weighted voting + WeightTracker ─┘        │ │
//! │  └─────────────────────────────┬───────────────────────────────┘ │
//! │                                ▼                                 │
//! │                 ModeRegistry (redact / substitute /              │
//! │                               visual_redact)                     │
//! │                                ▼                                 │
//! │  RenderedDocument ◄── AdapterRegistry::rebuild                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`detectors`]: rule-based, NER and custom-pattern detectors
//! - [`ensemble`]: concurrent voting and adaptive weights
//! - [`modes`]: redaction, substitution and visual redaction
//! - [`document`]: format sniffing, extraction and reconstruction
//! - [`pipeline`]: job orchestration, timeouts and cancellation
//! - [`config`]: configuration management
//!
//! ## Example
//!
//! ```no_run
//! use anonyma::{AnonymaConfig, AnonymizationMode, Pipeline};
//!
//! # async fn run() -> anonyma::Result<()> {
//! let pipeline = Pipeline::builder(AnonymaConfig::default()).build()?;
//! let out = pipeline
//!     .anonymize_text("Mail john@example.com", AnonymizationMode::Redact, "en")
//!     .await?;
//! assert_eq!(out.content.text, "Mail [EMAIL]");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod detectors;
pub mod document;
pub mod ensemble;
pub mod error;
pub mod modes;
pub mod pipeline;

pub use config::AnonymaConfig;
pub use detectors::{CustomPattern, Detector, DetectorInfo, DetectorKind, DetectorVote};
pub use document::{DocumentFormat, RenderedDocument, SourceDocument};
pub use ensemble::{Detection, DetectorFailure, Ensemble, VotingStrategy, WeightTracker};
pub use error::{Error, ErrorKind, Result};
pub use modes::{AnonymizationMode, AnonymizedContent, Replacement};
pub use pipeline::{JobContext, JobStatus, Pipeline, PipelineBuilder, ProcessingJob};
