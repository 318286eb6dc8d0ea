use anyhow::{Context, Result};
use log::{info, warn};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use image_retrieval::cli::{parse_args, Command};
use image_retrieval::config::AppConfig;
use image_retrieval::display::{display_results, export_record_image, RenderOptions};
use image_retrieval::error::error_chain;
use image_retrieval::ingestion::{run_ingestion, IngestOptions, IngestReport};
use image_retrieval::query::{query_collection, EXAMPLE_QUERIES};
use image_retrieval::search::{Dataset, Embedder, VectorStore};

#[cfg(feature = "clip")]
fn load_embedder() -> Result<Box<dyn Embedder>> {
    let engine = image_retrieval::search::ClipEmbeddingEngine::new()
        .context("Failed to initialize embedding engine")?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "clip"))]
fn load_embedder() -> Result<Box<dyn Embedder>> {
    anyhow::bail!("this binary was built without the `clip` feature; no embedding model is available")
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    info!("Loading dataset from {:?}...", path);
    let dataset = Dataset::load(path)
        .with_context(|| format!("Failed to load dataset from {:?}", path))?;
    info!("Dataset size: {} items", dataset.len());
    Ok(dataset)
}

fn open_store(config: &AppConfig) -> Result<VectorStore> {
    VectorStore::open(&config.store_path)
        .with_context(|| format!("Failed to open vector store at {:?}", config.store_path))
}

fn ingest_dataset(config: &AppConfig) -> Result<()> {
    let dataset = load_dataset(&config.dataset)?;
    let embedder = load_embedder()?;
    let store = open_store(config)?;

    info!("Processing dataset into collection '{}'...", config.collection);
    let options = IngestOptions {
        checkpoint_every: config.checkpoint_every,
    };
    match run_ingestion(&dataset, embedder.as_ref(), &store, &config.collection, &options) {
        Ok(report) => {
            println!("\nProcessing complete!");
            print_ingest_summary(&report);
            Ok(())
        }
        Err(e) => {
            if e.report.processed() > 0 {
                println!("\nProcessing stopped before the collection was saved.");
                print_ingest_summary(&e.report);
            }
            Err(e.into())
        }
    }
}

fn print_ingest_summary(report: &IngestReport) {
    println!("Successfully processed: {} items", report.success_count());
    println!(
        "Errors: {} (embedding: {}, store: {})",
        report.error_count(),
        report.embed_error_count(),
        report.store_error_count()
    );
    println!("Skipped: {}", report.skipped_count());
}

/// Loads the dataset for rendering; a missing dataset only disables images.
fn dataset_for_rendering(config: &AppConfig, enabled: bool) -> Option<Dataset> {
    if !enabled {
        return None;
    }
    match load_dataset(&config.dataset) {
        Ok(dataset) => Some(dataset),
        Err(e) => {
            warn!("Showing results without images: {:#}", e);
            None
        }
    }
}

fn run_queries(
    config: &AppConfig,
    queries: &[String],
    k: usize,
    preview_dir: Option<PathBuf>,
    with_images: bool,
    pause: bool,
) -> Result<()> {
    let store = open_store(config)?;
    // Fails fast when ingestion never ran for this collection.
    let collection = store.get_collection(&config.collection)?;
    let embedder = load_embedder()?;
    let dataset = dataset_for_rendering(config, with_images);

    let stdout = io::stdout();
    for (i, text) in queries.iter().enumerate() {
        println!("\n{}", "=".repeat(70));
        info!("Querying database with: '{}'", text);
        let results = query_collection(&collection, embedder.as_ref(), text, k)?;

        let options = RenderOptions {
            dataset: dataset.as_ref(),
            preview_dir: preview_dir.as_deref(),
            query_number: i + 1,
        };
        let summary = display_results(&mut stdout.lock(), &results, &options)?;
        if summary.skipped > 0 {
            warn!("{} of {} results could not be shown", summary.skipped, results.len());
        }

        if pause && i + 1 < queries.len() {
            wait_for_enter()?;
        }
    }
    Ok(())
}

fn wait_for_enter() -> Result<()> {
    print!("Press Enter to see the next query results...");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

fn inspect_dataset(config: &AppConfig, samples: usize) -> Result<()> {
    let dataset = load_dataset(&config.dataset)?;
    println!("Dataset size: {} items", dataset.len());
    println!("\nExamining sample items:");
    for record in dataset.iter().take(samples) {
        match record.decode_image() {
            Ok(image) => println!(
                "Item {}: {:?} ({}x{})",
                record.index,
                record.image_path,
                image.width(),
                image.height()
            ),
            Err(e) => println!("Item {}: {}", record.index, error_chain(&e, ": ")),
        }
    }
    Ok(())
}

fn show_item(config: &AppConfig, id: &str, out: &Path) -> Result<()> {
    let dataset = load_dataset(&config.dataset)?;
    let (width, height) = export_record_image(&dataset, id, out)?;
    println!("Wrote {} ({}x{}) to {}", id, width, height, out.display());
    Ok(())
}

fn list_collections(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let collections = store.list_collections()?;
    if collections.is_empty() {
        println!("No collections in {}", store.root().display());
    }
    for info in collections {
        println!("{}\t{} items\t{} dims", info.name, info.count, info.dimension);
    }
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = parse_args();
    let mut config = AppConfig::from_env()?;
    cli.global.apply(&mut config);

    match cli.command {
        Command::Ingest { checkpoint_every } => {
            if let Some(n) = checkpoint_every {
                config.checkpoint_every = n;
            }
            ingest_dataset(&config)
        }
        Command::Query {
            text,
            k,
            preview_dir,
            no_images,
        } => run_queries(&config, &[text.join(" ")], k, preview_dir, !no_images, false),
        Command::Demo {
            k,
            preview_dir,
            no_pause,
        } => {
            let queries: Vec<String> = EXAMPLE_QUERIES.iter().map(|q| q.to_string()).collect();
            let pause = !no_pause && io::stdin().is_terminal();
            run_queries(&config, &queries, k, preview_dir, true, pause)
        }
        Command::Inspect { samples } => inspect_dataset(&config, samples),
        Command::Show { id, out } => show_item(&config, &id, &out),
        Command::Collections => list_collections(&config),
    }
}
