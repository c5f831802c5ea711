use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use knowledge_agent::config::{AppConfig, IndexMode};
use knowledge_agent::indexer::load_document;
use knowledge_agent::indexer::walker::walk_directory;
use knowledge_agent::rag::embeddings::build_embedder;
use knowledge_agent::rag::KnowledgeBase;

#[derive(Parser, Debug)]
#[command(name = "kb-indexer")]
#[command(about = "Build the knowledge base index from a directory of documents")]
struct Args {
    /// Directory to recursively index
    #[arg(short, long)]
    dir: PathBuf,

    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "KB_CONFIG")]
    config: Option<PathBuf>,

    /// Replace the existing index or append to it (defaults to the configured mode)
    #[arg(long, value_enum)]
    mode: Option<IndexMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !args.dir.is_dir() {
        anyhow::bail!("Directory does not exist: {}", args.dir.display());
    }

    println!("Initializing embedding model...");
    let embedder = build_embedder(&config, reqwest::Client::new())?;
    let mut knowledge_base = KnowledgeBase::new(&config, embedder)?;
    if let Some(mode) = args.mode {
        knowledge_base = knowledge_base.with_mode(mode);
    }

    println!("Scanning directory: {}", args.dir.display());
    let files = walk_directory(&args.dir);
    println!("Found {} supported files", files.len());

    if files.is_empty() {
        println!("No supported files found. Exiting.");
        return Ok(());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut documents = Vec::with_capacity(files.len());
    let mut failed_files: Vec<(PathBuf, String)> = Vec::new();

    for (path, _format) in &files {
        pb.set_message(path.file_name().unwrap_or_default().to_string_lossy().to_string());

        match load_document(path) {
            Ok(document) if document.content.trim().is_empty() => {
                failed_files.push((path.clone(), "no extractable text".to_string()));
            }
            Ok(document) => documents.push(document),
            Err(e) => {
                tracing::warn!("Failed to load {}: {:#}", path.display(), e);
                failed_files.push((path.clone(), format!("{:#}", e)));
            }
        }

        pb.inc(1);
    }
    pb.finish_with_message("loaded");

    if documents.is_empty() {
        anyhow::bail!("None of the {} files could be loaded", files.len());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("Embedding {} documents...", documents.len()));
    spinner.enable_steady_tick(Duration::from_millis(120));
    let report = knowledge_base.build_from_documents(documents).await;
    spinner.finish_and_clear();
    let report = report?;

    println!("\nIndexing complete!");
    println!("  Files indexed:   {}/{}", report.documents, files.len());
    println!("  Files failed:    {}", failed_files.len());
    println!("  New chunks:      {}", report.chunks);
    println!("  Total chunks:    {}", report.total_chunks);
    println!("  Mode:            {:?}", report.mode);
    println!("  Index:           {}", knowledge_base.index_dir().display());

    if !failed_files.is_empty() {
        println!("\nFailed files:");
        for (path, err) in &failed_files {
            println!("  {}: {}", path.display(), err);
        }
    }

    Ok(())
}
