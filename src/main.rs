//! Anonyma command line
//!
//! Detects PII in text and anonymizes documents while keeping their structure.

use anonyma::{
    config::AnonymaConfig,
    document::{resolve_output_path, OcrEngine, PdfTools, PopplerTools, TesseractOcr},
    AnonymizationMode, JobContext, Pipeline, ProcessingJob, SourceDocument,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "anonyma")]
#[command(version)]
#[command(about = "Ensemble PII detection and structure-preserving document anonymization")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ANONYMA_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Anonymize a document
    Anonymize {
        /// Input document
        input: PathBuf,

        /// redact, substitute or visual_redact
        #[arg(short, long, default_value = "redact")]
        mode: AnonymizationMode,

        /// Document language (defaults to the configured one)
        #[arg(short, long)]
        language: Option<String>,

        /// Directory receiving the anonymized output
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Rendered page image, in page order (repeatable); PDFs are rendered
        /// with pdftoppm when none are given
        #[arg(long = "page-image")]
        page_images: Vec<PathBuf>,
    },

    /// Print detections as JSON
    Detect {
        /// UTF-8 text file
        input: Option<PathBuf>,

        /// Inline text instead of a file
        #[arg(short, long, conflicts_with = "input")]
        text: Option<String>,

        /// Text language (defaults to the configured one)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Run diagnostics
    Doctor,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AnonymaConfig::load(path)?,
        None => AnonymaConfig::default().with_env_overrides()?,
    };

    let log_level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let json = config.logging.json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("anonyma={}", log_level).into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    match cli.command {
        Commands::Anonymize {
            input,
            mode,
            language,
            output_dir,
            page_images,
        } => {
            run_anonymize(config, &input, mode, language, &output_dir, &page_images).await?;
        }
        Commands::Detect {
            input,
            text,
            language,
        } => {
            run_detect(config, input, text, language).await?;
        }
        Commands::Doctor => {
            run_doctor(&config, cli.config.as_deref())?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

async fn run_anonymize(
    config: AnonymaConfig,
    input: &Path,
    mode: AnonymizationMode,
    language: Option<String>,
    output_dir: &Path,
    page_images: &[PathBuf],
) -> Result<()> {
    let language = language.unwrap_or_else(|| config.detection.default_language.clone());
    let content = tokio::fs::read(input)
        .await
        .with_context(|| format!("Cannot read {}", input.display()))?;
    let mut pages = Vec::with_capacity(page_images.len());
    for page in page_images {
        pages.push(
            tokio::fs::read(page)
                .await
                .with_context(|| format!("Cannot read page image {}", page.display()))?,
        );
    }

    let source = SourceDocument::new(file_name(input)?, content).with_page_images(pages);
    let pipeline = Pipeline::builder(config).build()?;
    let mut job = ProcessingJob::new(source.file_name.clone(), mode, language);

    let ctx = JobContext::new();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling job");
            cancel.cancel();
        }
    });

    let rendered = pipeline.run(&mut job, source, &ctx).await?;

    tokio::fs::create_dir_all(output_dir).await?;
    let target = resolve_output_path(output_dir, &rendered.file_name)?;
    tokio::fs::write(&target, &rendered.content).await?;
    println!("Wrote {}", target.display());

    let stem = Path::new(&rendered.file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    for (n, bytes) in rendered.page_images.iter().enumerate() {
        let name = match page_images.get(n) {
            Some(page) => file_name(page)?,
            None => format!("{}-page-{}.png", stem, n + 1),
        };
        let target = resolve_output_path(output_dir, &name)?;
        tokio::fs::write(&target, bytes).await?;
        println!("Wrote {}", target.display());
    }

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn run_detect(
    config: AnonymaConfig,
    input: Option<PathBuf>,
    text: Option<String>,
    language: Option<String>,
) -> Result<()> {
    let language = language.unwrap_or_else(|| config.detection.default_language.clone());
    let text = match (text, input) {
        (Some(text), _) => text,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?,
        (None, None) => anyhow::bail!("Pass an input file or --text"),
    };

    let pipeline = Pipeline::builder(config).build()?;
    let outcome = pipeline.detect(&text, &language).await?;

    let report = serde_json::json!({
        "language": language,
        "detections": outcome.detections,
        "active_detectors": outcome.active_detectors,
        "failures": outcome.failures,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_doctor(config: &AnonymaConfig, config_path: Option<&Path>) -> Result<()> {
    println!("Anonyma Doctor");
    println!();

    println!("Checking configuration...");
    match config_path {
        Some(path) => println!("  ✓ Configuration file: {}", path.display()),
        None => println!("  ℹ No configuration file (using defaults)"),
    }
    match config.validate() {
        Ok(()) => println!("  ✓ Configuration valid"),
        Err(e) => println!("  ✗ {}", e),
    }

    println!();
    println!("Checking OCR...");
    let ocr = TesseractOcr::from_config(&config.documents.ocr);
    if ocr.is_available() {
        println!("  ✓ {} found", ocr.binary());
    } else {
        println!(
            "  ✗ {} not found (install tesseract-ocr for scanned documents)",
            ocr.binary()
        );
    }

    println!();
    println!("Checking PDF tools...");
    let pdf = PopplerTools::from_config(&config.documents.pdf);
    if pdf.is_available() {
        println!("  ✓ pdftotext found");
    } else {
        println!("  ✗ pdftotext not found (install poppler-utils for PDF documents)");
    }

    println!();
    println!("Checking detectors...");
    match Pipeline::builder(config.clone()).build() {
        Ok(pipeline) => {
            for info in pipeline.detector_info() {
                println!(
                    "  ✓ {:<16} {} entity types, languages: {}",
                    info.id,
                    info.entity_types.len(),
                    if info.supported_languages.is_empty() {
                        "any".to_string()
                    } else {
                        info.supported_languages.join(", ")
                    }
                );
            }
        }
        Err(e) => println!("  ✗ {}", e),
    }

    println!();
    println!("Doctor check complete!");
    Ok(())
}

fn show_config(config: Option<&AnonymaConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
