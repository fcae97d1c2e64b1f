//! Pipeline orchestration
//!
//! A [`Pipeline`] resolves detectors, the weight tracker, mode strategies and
//! document adapters once, then drives each [`ProcessingJob`] through
//! `Queued → Extracting → Detecting → Anonymizing → Reconstructing →
//! Completed`. Any fatal error ends the job in `Failed` (or `Cancelled`)
//! and no artifact is returned.

pub mod job;

pub use job::{JobContext, JobStatus, JobSummary, ProcessingJob, ProgressFn};

use crate::config::{AnonymaConfig, DetectionConfig};
use crate::detectors::{build_detectors, CustomPattern, CustomPatternDetector, Detector, DetectorInfo};
use crate::document::{
    AdapterRegistry, OcrEngine, PdfTools, PopplerTools, RenderedDocument, SourceDocument,
    TesseractOcr,
};
use crate::ensemble::{AggregationResult, DetectorFailure, Ensemble, EnsembleOutcome};
use crate::ensemble::weights::{PerformanceStats, WeightTracker};
use crate::ensemble::Detection;
use crate::error::{Error, Result};
use crate::modes::{AnonymizationMode, AnonymizationStrategy, AnonymizedContent, ModeRegistry};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress reported after each phase
const PROGRESS_EXTRACTED: f64 = 0.2;
const PROGRESS_DETECTED: f64 = 0.5;
const PROGRESS_ANONYMIZED: f64 = 0.7;

/// Result of the text-only entry point
#[derive(Debug, Clone)]
pub struct TextAnonymization {
    pub content: AnonymizedContent,
    pub detections: AggregationResult,
    pub failures: Vec<DetectorFailure>,
}

/// Builds a [`Pipeline`]; external detectors, custom patterns and engines are
/// registered here, before any job runs.
pub struct PipelineBuilder {
    config: AnonymaConfig,
    detectors: Vec<Arc<dyn Detector>>,
    custom_patterns: Vec<CustomPattern>,
    strategies: Vec<Arc<dyn AnonymizationStrategy>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    pdf_tools: Option<Arc<dyn PdfTools>>,
    weights: Option<WeightTracker>,
}

impl PipelineBuilder {
    pub fn new(config: AnonymaConfig) -> Self {
        Self {
            config,
            detectors: Vec::new(),
            custom_patterns: Vec::new(),
            strategies: Vec::new(),
            ocr: None,
            pdf_tools: None,
            weights: None,
        }
    }

    /// Add a detector next to the configured ones
    pub fn detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Register a custom pattern; enables the custom-pattern detector
    pub fn custom_pattern(mut self, pattern: CustomPattern) -> Self {
        self.custom_patterns.push(pattern);
        self
    }

    /// Replace the strategy registered for its mode
    pub fn strategy(mut self, strategy: Arc<dyn AnonymizationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    /// Replace the poppler tools used for PDF text layers and page rasters
    pub fn pdf_tools(mut self, tools: Arc<dyn PdfTools>) -> Self {
        self.pdf_tools = Some(tools);
        self
    }

    /// Share a weight tracker with other pipelines
    pub fn weight_tracker(mut self, tracker: WeightTracker) -> Self {
        self.weights = Some(tracker);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let detection = &self.config.detection;

        let builtin = DetectionConfig {
            custom_patterns: false,
            ..detection.clone()
        };
        let mut detectors = if builtin.rule_based || builtin.neural_ner {
            build_detectors(&builtin)?
        } else {
            Vec::new()
        };

        if detection.custom_patterns || !self.custom_patterns.is_empty() {
            let mut custom = CustomPatternDetector::from_config(detection)?;
            for pattern in self.custom_patterns {
                custom.add_pattern(pattern)?;
            }
            tracing::info!(patterns = custom.len(), "Custom patterns registered");
            detectors.push(Arc::new(custom));
        }
        detectors.extend(self.detectors);

        let weights = self
            .weights
            .unwrap_or_else(|| WeightTracker::from_config(&self.config));
        let ensemble = Ensemble::new(detectors, weights, detection)?;

        let mut modes = ModeRegistry::new(&self.config.anonymization);
        for strategy in self.strategies {
            modes.register(strategy);
        }

        let ocr = self
            .ocr
            .unwrap_or_else(|| Arc::new(TesseractOcr::from_config(&self.config.documents.ocr)));
        let pdf_tools = self
            .pdf_tools
            .unwrap_or_else(|| Arc::new(PopplerTools::from_config(&self.config.documents.pdf)));
        let adapters = Arc::new(AdapterRegistry::new(
            &self.config.documents,
            ocr,
            pdf_tools,
        ));

        tracing::info!(
            detectors = ensemble.detectors().len(),
            strategy = %detection.voting_strategy,
            min_confidence = detection.min_confidence,
            "Pipeline ready"
        );

        Ok(Pipeline {
            config: self.config,
            ensemble,
            modes,
            adapters,
        })
    }
}

/// Detection and anonymization pipeline
pub struct Pipeline {
    config: AnonymaConfig,
    ensemble: Ensemble,
    modes: ModeRegistry,
    adapters: Arc<AdapterRegistry>,
}

impl Pipeline {
    pub fn builder(config: AnonymaConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &AnonymaConfig {
        &self.config
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn detector_info(&self) -> Vec<DetectorInfo> {
        self.ensemble.detectors().iter().map(|d| d.info()).collect()
    }

    fn check_language(&self, language: &str) -> Result<()> {
        if self
            .config
            .detection
            .supported_languages
            .iter()
            .any(|l| l == language)
        {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "Unsupported language '{}' (supported: {})",
                language,
                self.config.detection.supported_languages.join(", ")
            )))
        }
    }

    fn check_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::Validation("Text is empty".to_string()));
        }
        let max = self.config.pipeline.max_text_length;
        if text.len() > max {
            return Err(Error::Validation(format!(
                "Text is {} bytes, limit is {}",
                text.len(),
                max
            )));
        }
        Ok(())
    }

    /// Run `fut` under the phase timeout, aborting early on cancellation
    async fn bounded<T, F>(&self, phase: JobStatus, ctx: &JobContext, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let secs = self.config.pipeline.phase_timeout_secs;
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(Duration::from_secs(secs), fut) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    phase: phase.to_string(),
                    secs,
                }),
            },
        }
    }

    fn advance(&self, job: &mut ProcessingJob, next: JobStatus, ctx: &JobContext) -> Result<()> {
        ctx.check_cancelled()?;
        job.transition(next)
    }

    /// Detect entities without anonymizing. Empty text yields no detections.
    pub async fn detect(&self, text: &str, language: &str) -> Result<EnsembleOutcome> {
        self.check_language(language)?;
        if text.len() > self.config.pipeline.max_text_length {
            return Err(Error::Validation(format!(
                "Text is {} bytes, limit is {}",
                text.len(),
                self.config.pipeline.max_text_length
            )));
        }
        self.ensemble.detect(text, language).await
    }

    /// Anonymize plain text
    pub async fn anonymize_text(
        &self,
        text: &str,
        mode: AnonymizationMode,
        language: &str,
    ) -> Result<TextAnonymization> {
        self.check_text(text)?;
        self.check_language(language)?;

        let outcome = self
            .bounded(
                JobStatus::Detecting,
                &JobContext::default(),
                self.ensemble.detect(text, language),
            )
            .await?;
        let content = self.modes.get(mode)?.anonymize(text, &outcome.detections)?;

        tracing::info!(
            mode = %mode,
            detections = outcome.detections.len(),
            failed_detectors = outcome.failures.len(),
            "Text anonymized"
        );
        Ok(TextAnonymization {
            content,
            detections: outcome.detections,
            failures: outcome.failures,
        })
    }

    /// Run a document job to completion.
    ///
    /// On success the job is `Completed` and the rebuilt document is
    /// returned; otherwise the job records the error and nothing is returned.
    pub async fn run(
        &self,
        job: &mut ProcessingJob,
        source: SourceDocument,
        ctx: &JobContext,
    ) -> Result<RenderedDocument> {
        let started = Instant::now();
        tracing::info!(job_id = %job.id, mode = %job.mode, language = %job.language, "Job started");

        let result = self.execute(job, source, ctx).await;
        job.elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(rendered) => {
                tracing::info!(
                    job_id = %job.id,
                    format = %rendered.format,
                    detections = job.detection_count,
                    elapsed_ms = job.elapsed_ms,
                    "Job completed"
                );
                Ok(rendered)
            }
            Err(e) => {
                job.fail(&e);
                match &e {
                    Error::Cancelled => {
                        tracing::warn!(job_id = %job.id, elapsed_ms = job.elapsed_ms, "Job cancelled")
                    }
                    _ => tracing::error!(
                        job_id = %job.id,
                        kind = ?e.kind(),
                        elapsed_ms = job.elapsed_ms,
                        "Job failed: {}",
                        e
                    ),
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job: &mut ProcessingJob,
        source: SourceDocument,
        ctx: &JobContext,
    ) -> Result<RenderedDocument> {
        self.check_language(&job.language)?;
        ctx.report(0.0);

        self.advance(job, JobStatus::Extracting, ctx)?;
        let extraction = {
            let adapters = Arc::clone(&self.adapters);
            let language = job.language.clone();
            tokio::task::spawn_blocking(move || adapters.extract(&source, &language))
        };
        let doc = self
            .bounded(JobStatus::Extracting, ctx, async {
                extraction
                    .await
                    .map_err(|e| Error::DocumentProcessing(format!("Extraction task failed: {}", e)))
                    .and_then(|extracted| extracted)
            })
            .await?;
        tracing::info!(
            job_id = %job.id,
            format = %doc.format,
            units = doc.index.len(),
            warnings = doc.warnings.len(),
            "Extracted document"
        );
        ctx.report(PROGRESS_EXTRACTED);

        self.advance(job, JobStatus::Detecting, ctx)?;
        if doc.text.len() > self.config.pipeline.max_text_length {
            return Err(Error::Validation(format!(
                "Extracted text is {} bytes, limit is {}",
                doc.text.len(),
                self.config.pipeline.max_text_length
            )));
        }
        let outcome = self
            .bounded(
                JobStatus::Detecting,
                ctx,
                self.ensemble.detect(&doc.text, &job.language),
            )
            .await?;
        job.detection_count = outcome.detections.len();
        ctx.report(PROGRESS_DETECTED);

        self.advance(job, JobStatus::Anonymizing, ctx)?;
        let content = self
            .modes
            .get(job.mode)?
            .anonymize(&doc.text, &outcome.detections)?;
        ctx.report(PROGRESS_ANONYMIZED);

        self.advance(job, JobStatus::Reconstructing, ctx)?;
        let summary = JobSummary {
            format: doc.format,
            detections: outcome.detections,
            active_detectors: outcome.active_detectors,
            failures: outcome.failures,
            warnings: doc.warnings.clone(),
            replacements: content.replacements.len(),
        };
        let rebuild = {
            let adapters = Arc::clone(&self.adapters);
            tokio::task::spawn_blocking(move || adapters.rebuild(&doc, &content))
        };
        let rendered = rebuild
            .await
            .map_err(|e| Error::DocumentProcessing(format!("Reconstruction task failed: {}", e)))??;
        // a late cancel discards the artifact
        ctx.check_cancelled()?;

        job.result = Some(summary);
        job.transition(JobStatus::Completed)?;
        ctx.report(1.0);
        Ok(rendered)
    }

    /// Feedback on a final detection
    pub async fn report_feedback(&self, detection: &Detection, is_correct: bool) -> Result<()> {
        self.ensemble.report_feedback(detection, is_correct).await
    }

    pub async fn performance_stats(&self) -> BTreeMap<String, PerformanceStats> {
        self.ensemble.weights().get_performance_stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{DetectorKind, DetectorVote};
    use crate::document::scanned::test_support::ScriptedOcr;
    use std::sync::Mutex;

    struct SlowDetector;

    impl Detector for SlowDetector {
        fn id(&self) -> &str {
            "slow"
        }

        fn kind(&self) -> DetectorKind {
            DetectorKind::CustomPattern
        }

        fn supported_languages(&self) -> &[&str] {
            &[]
        }

        fn entity_types(&self) -> Vec<String> {
            vec!["SLOW".to_string()]
        }

        fn detect(&self, _text: &str, _language: &str) -> Result<Vec<DetectorVote>> {
            std::thread::sleep(Duration::from_millis(1500));
            Ok(Vec::new())
        }
    }

    fn config() -> AnonymaConfig {
        let mut config = AnonymaConfig::default();
        config.detection.default_language = "en".to_string();
        config
    }

    fn pipeline() -> Pipeline {
        Pipeline::builder(config())
            .ocr_engine(Arc::new(ScriptedOcr { pages: vec![] }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_anonymize_text_scenario() {
        let out = pipeline()
            .anonymize_text(
                "Contact John Smith at john.smith@example.com, phone 555-0100.",
                AnonymizationMode::Redact,
                "en",
            )
            .await
            .unwrap();
        assert_eq!(out.content.text, "Contact [PERSON] at [EMAIL], phone [PHONE].");
        assert_eq!(out.detections.len(), 3);
    }

    #[tokio::test]
    async fn test_anonymize_text_validation() {
        let pipeline = pipeline();
        for (text, lang) in [("", "en"), ("   \n", "en"), ("ciao", "klingon")] {
            assert!(matches!(
                pipeline
                    .anonymize_text(text, AnonymizationMode::Redact, lang)
                    .await,
                Err(Error::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_text_length_limit() {
        let mut config = config();
        config.pipeline.max_text_length = 8;
        let pipeline = Pipeline::builder(config)
            .ocr_engine(Arc::new(ScriptedOcr { pages: vec![] }))
            .build()
            .unwrap();
        assert!(matches!(
            pipeline
                .anonymize_text("far too long", AnonymizationMode::Redact, "en")
                .await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_run_document_job_with_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctx = JobContext::new().with_progress(move |p| sink.lock().unwrap().push(p));

        let source = SourceDocument::new(
            "note.txt",
            b"Write to mario.rossi@example.it\nthanks".to_vec(),
        );
        let mut job = ProcessingJob::new("note.txt", AnonymizationMode::Redact, "it");
        let rendered = pipeline().run(&mut job, source, &ctx).await.unwrap();

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.detection_count, 1);
        assert_eq!(
            String::from_utf8(rendered.content).unwrap(),
            "Write to [EMAIL]\nthanks"
        );
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 0.2, 0.5, 0.7, 1.0]);
        assert_eq!(job.result.as_ref().unwrap().replacements, 1);
    }

    #[tokio::test]
    async fn test_unsupported_document_fails_job() {
        let mut job = ProcessingJob::new("blob.bin", AnonymizationMode::Redact, "en");
        let source = SourceDocument::new("blob.bin", vec![0x00, 0xff, 0xfe, 0x80]);
        let err = pipeline()
            .run(&mut job, source, &JobContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DocumentProcessing(_)));
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error.is_some());
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_visual_redact_on_text_fails() {
        let mut job = ProcessingJob::new("note.txt", AnonymizationMode::VisualRedact, "en");
        let source = SourceDocument::new("note.txt", b"mail a@b.com".to_vec());
        let err = pipeline()
            .run(&mut job, source, &JobContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_job_returns_nothing() {
        let ctx = JobContext::new();
        ctx.cancel.cancel();
        let mut job = ProcessingJob::new("note.txt", AnonymizationMode::Redact, "en");
        let source = SourceDocument::new("note.txt", b"mail a@b.com".to_vec());
        let err = pipeline().run(&mut job, source, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_detection_phase_timeout() {
        let mut config = config();
        config.detection.rule_based = false;
        config.detection.neural_ner = false;
        config.pipeline.phase_timeout_secs = 1;
        let pipeline = Pipeline::builder(config)
            .detector(Arc::new(SlowDetector))
            .ocr_engine(Arc::new(ScriptedOcr { pages: vec![] }))
            .build()
            .unwrap();

        let mut job = ProcessingJob::new("note.txt", AnonymizationMode::Redact, "en");
        let source = SourceDocument::new("note.txt", b"nothing to see".to_vec());
        let err = pipeline
            .run(&mut job, source, &JobContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_custom_pattern_registration() {
        let pipeline = Pipeline::builder(config())
            .custom_pattern(CustomPattern::new("TICKET", r"\bTCK-\d{5}\b").case_sensitive())
            .ocr_engine(Arc::new(ScriptedOcr { pages: vec![] }))
            .build()
            .unwrap();
        let ids: Vec<String> = pipeline.detector_info().into_iter().map(|i| i.id).collect();
        assert!(ids.contains(&"custom_patterns".to_string()));

        let out = pipeline
            .anonymize_text("Ticket TCK-12345 opened", AnonymizationMode::Redact, "en")
            .await
            .unwrap();
        assert_eq!(out.content.text, "Ticket [TICKET] opened");
    }

    #[tokio::test]
    async fn test_feedback_reaches_tracker() {
        let pipeline = pipeline();
        let out = pipeline
            .anonymize_text("mail a@b.com", AnonymizationMode::Redact, "en")
            .await
            .unwrap();
        pipeline
            .report_feedback(&out.detections[0], true)
            .await
            .unwrap();
        let stats = pipeline.performance_stats().await;
        assert_eq!(stats["rule_based"].hits, 1);
    }
}
