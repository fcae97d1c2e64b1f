//! Processing jobs and their state machine

use crate::document::DocumentFormat;
use crate::ensemble::{AggregationResult, DetectorFailure};
use crate::error::{Error, ErrorKind, Result};
use crate::modes::AnonymizationMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Extracting,
    Detecting,
    Anonymizing,
    Reconstructing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Extracting => "extracting",
            Self::Detecting => "detecting",
            Self::Anonymizing => "anonymizing",
            Self::Reconstructing => "reconstructing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Phases advance strictly in order; any live state may fail or be cancelled.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (*self, next) {
            (Queued, Extracting)
            | (Extracting, Detecting)
            | (Detecting, Anonymizing)
            | (Anonymizing, Reconstructing)
            | (Reconstructing, Completed) => true,
            (from, Failed) | (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a completed job
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub format: DocumentFormat,
    pub detections: AggregationResult,
    pub active_detectors: Vec<String>,
    pub failures: Vec<DetectorFailure>,
    /// Non-fatal extraction warnings
    pub warnings: Vec<String>,
    pub replacements: usize,
}

/// One document run through the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingJob {
    pub id: String,
    /// Document reference (file name)
    pub document: String,
    pub mode: AnonymizationMode,
    pub language: String,
    status: JobStatus,
    pub result: Option<JobSummary>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub detection_count: usize,
}

impl ProcessingJob {
    pub fn new(
        document: impl Into<String>,
        mode: AnonymizationMode,
        language: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            document: document.into(),
            mode,
            language: language.into(),
            status: JobStatus::Queued,
            result: None,
            error: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
            elapsed_ms: 0,
            detection_count: 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Move to `next`, refusing anything the state machine does not allow
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Validation(format!(
                "Illegal job transition {} -> {}",
                self.status, next
            )));
        }
        tracing::debug!(job_id = %self.id, from = %self.status, to = %next, "Job transition");
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a fatal error; cancellation ends in `Cancelled`, anything else in `Failed`
    pub fn fail(&mut self, error: &Error) {
        let target = match error {
            Error::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        };
        if self.status.can_transition_to(target) {
            self.status = target;
        }
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
        self.updated_at = Utc::now();
    }
}

/// Progress callback, fed values in `0.0..=1.0`
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Per-run controls supplied by the caller
#[derive(Clone, Default)]
pub struct JobContext {
    pub cancel: CancellationToken,
    pub progress: Option<ProgressFn>,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl JobContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub(crate) fn report(&self, fraction: f64) {
        if let Some(progress) = &self.progress {
            progress(fraction.clamp(0.0, 1.0));
        }
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_happy_path_transitions() {
        let mut job = ProcessingJob::new("a.txt", AnonymizationMode::Redact, "it");
        assert_eq!(job.status(), JobStatus::Queued);
        for next in [
            JobStatus::Extracting,
            JobStatus::Detecting,
            JobStatus::Anonymizing,
            JobStatus::Reconstructing,
            JobStatus::Completed,
        ] {
            job.transition(next).unwrap();
        }
        assert!(job.status().is_terminal());
        assert!(job.transition(JobStatus::Failed).is_err());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut job = ProcessingJob::new("a.txt", AnonymizationMode::Redact, "it");
        assert!(matches!(
            job.transition(JobStatus::Detecting),
            Err(Error::Validation(_))
        ));
        job.transition(JobStatus::Extracting).unwrap();
        assert!(job.transition(JobStatus::Queued).is_err());
        assert!(job.transition(JobStatus::Anonymizing).is_err());
    }

    #[test]
    fn test_fail_and_cancel() {
        let mut job = ProcessingJob::new("a.txt", AnonymizationMode::Redact, "it");
        job.transition(JobStatus::Extracting).unwrap();
        job.fail(&Error::DocumentProcessing("corrupt".into()));
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error_kind, Some(ErrorKind::DocumentProcessing));

        let mut job = ProcessingJob::new("a.txt", AnonymizationMode::Redact, "it");
        job.fail(&Error::Cancelled);
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[test]
    fn test_job_serializes_status() {
        let job = ProcessingJob::new("a.txt", AnonymizationMode::Substitute, "en");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["mode"], "substitute");
        assert_eq!(json["id"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn test_context_progress_and_cancel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctx = JobContext::new().with_progress(move |p| sink.lock().unwrap().push(p));
        ctx.report(0.5);
        ctx.report(3.0);
        assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0]);

        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(Error::Cancelled)));
    }
}
