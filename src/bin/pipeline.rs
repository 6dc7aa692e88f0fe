use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use periodex::config::Config;
use periodex::embedding::Embedder;
use periodex::index::IndexManager;
use periodex::logging;
use periodex::ocr::{DocumentIntelligenceClient, DocumentMeta, DocumentSource};
use periodex::processing::{
    BatchOptions, BatchRunner, BatchSettings, Pipeline, PipelineSettings, analyze_and_stage,
};
use periodex::search::{AzureSearchClient, SearchBackend};
use periodex::storage::{BlobStore, FsBlobStore};
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "periodex-pipeline",
    about = "Ingest OCR'd periodicals into the search index"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one document: a staged OCR `.json`, a document URL, or a local scan.
    Ingest {
        source: String,
        document_id: String,
        year: i32,
        month: u32,
        source_locator: String,
    },
    /// Process every pending staged blob (the default).
    Batch {
        /// Clear the index first unless the reset flag blob already exists.
        #[arg(long)]
        reset_once: bool,
        /// Worker count (defaults to MAX_WORKERS).
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Delete every document from the index.
    ResetIndex,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(error = %format!("{err:#}"), "Pipeline run failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;
    logging::init_tracing("periodex-pipeline");

    let backend: Arc<dyn SearchBackend> = Arc::new(
        AzureSearchClient::from_config(&config).context("Failed to configure search client")?,
    );
    let index = IndexManager::from_config(backend, &config);
    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.staging_root));

    match cli.command.unwrap_or(Command::Batch {
        reset_once: false,
        workers: None,
    }) {
        Command::Ingest {
            source,
            document_id,
            year,
            month,
            source_locator,
        } => {
            let pipeline = build_pipeline(&config, index)?;
            let meta = DocumentMeta {
                document_id,
                year,
                month,
                source_locator,
            };
            let document = load_document(&config, store.as_ref(), &source, &meta).await?;
            let outcome = pipeline
                .process_document(&document, &meta)
                .await
                .with_context(|| format!("Failed to ingest {}", meta.document_id))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Batch {
            reset_once,
            workers,
        } => {
            let pipeline = build_pipeline(&config, index)?;
            let runner = BatchRunner::new(pipeline, store, BatchSettings::from_config(&config));
            let report = runner
                .run(BatchOptions {
                    reset_once,
                    workers,
                })
                .await
                .context("Batch run failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::ResetIndex => {
            let removed = index.clear().await.context("Failed to clear index")?;
            tracing::info!(removed, index = %config.search_index_name, "Index cleared");
            println!("removed {removed} documents");
        }
    }
    Ok(())
}

fn build_pipeline(config: &Config, index: IndexManager) -> Result<Pipeline> {
    let embedder = Embedder::from_config(config).context("Failed to configure embedder")?;
    Ok(Pipeline::new(
        embedder,
        index,
        PipelineSettings::from_config(config),
    ))
}

/// Resolve `source` into an OCR result, running OCR and staging the output when needed.
async fn load_document(
    config: &Config,
    store: &dyn BlobStore,
    source: &str,
    meta: &DocumentMeta,
) -> Result<Value> {
    let is_url = source.starts_with("http://") || source.starts_with("https://");
    let path = PathBuf::from(source);
    if !is_url && is_json(&path) {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return serde_json::from_slice(&bytes)
            .with_context(|| format!("{} is not valid JSON", path.display()));
    }

    let document = if is_url {
        DocumentSource::Url(source.to_string())
    } else {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        DocumentSource::Bytes(bytes)
    };

    let ocr = DocumentIntelligenceClient::from_config(config)
        .context("OCR is required for non-JSON sources")?;
    let staging_key = format!("{}{}.json", config.staging_prefix, meta.document_id);
    analyze_and_stage(&ocr, store, &document, &staging_key)
        .await
        .with_context(|| format!("Failed to OCR {source}"))
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
}
