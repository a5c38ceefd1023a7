use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use docsift::config::IngestConfig;
use docsift::pipeline::extraction::pdfium::PdfiumRenderer;
use docsift::pipeline::extraction::{build_ocr_engine, DocumentExtractor, PdfPageRenderer};
use docsift::pipeline::import::{
    IngestOutcome, IngestionOrchestrator, ProcessedLedger, WatchService, WatchSettings,
};
use docsift::pipeline::rag::{filter_with, ScoredResult};
use docsift::pipeline::storage::JsonlContentStore;

#[derive(Parser)]
#[command(name = "docsift")]
#[command(about = "Extract text, tables and image content from PDF and Word documents")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and ingest each new document once
    Watch {
        /// Directory to watch (overrides `watch_dir`)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Also ingest documents already in the directory
        #[arg(long)]
        scan_existing: bool,
    },
    /// Ingest a single document now
    Ingest {
        file: PathBuf,
    },
    /// Apply the quality filter to a JSON array of `{content, score}` results
    Filter {
        results: PathBuf,
        #[arg(long)]
        min_relevance: Option<f32>,
        #[arg(long)]
        min_length: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    docsift::init_tracing();

    let mut config = IngestConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch { dir, scan_existing } => {
            if let Some(dir) = dir {
                config.watch_dir = dir;
            }
            config.scan_existing |= scan_existing;
            watch(&config)
        }
        Commands::Ingest { file } => ingest(&config, &file),
        Commands::Filter {
            results,
            min_relevance,
            min_length,
        } => {
            if let Some(v) = min_relevance {
                config.quality.min_relevance = v;
            }
            if let Some(v) = min_length {
                config.quality.min_length = v;
            }
            filter(&config, &results)
        }
    }
}

fn build_orchestrator(config: &IngestConfig) -> Result<IngestionOrchestrator> {
    let renderer: Option<Box<dyn PdfPageRenderer>> = match PdfiumRenderer::locate(config.images.pdfium_library.as_deref()) {
        Ok(r) => Some(Box::new(r)),
        Err(e) => {
            tracing::warn!(error = %e, "PDFium unavailable, full-page images disabled");
            None
        }
    };
    let extractor = DocumentExtractor::from_config(config, build_ocr_engine(&config.ocr), renderer);

    let ledger = ProcessedLedger::load(&config.ledger_path)
        .with_context(|| format!("loading ledger {}", config.ledger_path.display()))?;
    let store = JsonlContentStore::with_window(
        &config.output_path,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    )?;

    Ok(IngestionOrchestrator::new(
        Arc::new(ledger),
        Arc::new(extractor),
        Arc::new(store),
        config.settle_delay(),
    ))
}

fn watch(config: &IngestConfig) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(config)?);
    let service = WatchService::start(
        orchestrator,
        WatchSettings {
            dir: config.watch_dir.clone(),
            workers: config.workers,
            scan_existing: config.scan_existing,
        },
    )
    .with_context(|| format!("watching {}", config.watch_dir.display()))?;

    service.wait();
    Ok(())
}

fn ingest(config: &IngestConfig, file: &Path) -> Result<()> {
    // One-shot runs skip the settle delay.
    let config = IngestConfig {
        settle_delay_ms: 0,
        ..config.clone()
    };
    let orchestrator = build_orchestrator(&config)?;

    match orchestrator.ingest_path(file) {
        IngestOutcome::Ingested { units, records } => {
            println!("{}: {units} units, {records} records", file.display());
            Ok(())
        }
        IngestOutcome::Skipped(reason) => {
            println!("{}: skipped ({reason:?})", file.display());
            Ok(())
        }
        other => bail!("{}: {other:?}", file.display()),
    }
}

fn filter(config: &IngestConfig, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let results: Vec<ScoredResult> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let kept = filter_with(results, &config.quality);
    println!("{}", serde_json::to_string_pretty(&kept)?);
    Ok(())
}
