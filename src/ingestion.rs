use log::{debug, info, warn};
use thiserror::Error;

use crate::error::{error_chain, DecodeError, EmbedError, StoreError};
use crate::search::data_loader::Record;
use crate::search::embedding_engine::Embedder;
use crate::search::vector_store::{Collection, Metadata, VectorStore};

pub const ID_PREFIX: &str = "image_";

// Only the first few skips and failures are logged loudly.
const LOUD_SKIP_LIMIT: usize = 10;
const DETAILED_FAILURE_LIMIT: usize = 5;

pub fn item_id(index: usize) -> String {
    format!("{}{}", ID_PREFIX, index)
}

/// Placeholder document; the store wants non-empty text per item.
pub fn item_document(index: usize) -> String {
    format!("Image {}", index)
}

/// Metadata persisted with every stored image vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    pub source_id: usize,
    pub width: u32,
    pub height: u32,
}

impl ImageMetadata {
    pub fn to_metadata(&self) -> Metadata {
        Metadata::from([
            ("source_id".to_string(), serde_json::json!(self.source_id)),
            ("width".to_string(), serde_json::json!(self.width)),
            ("height".to_string(), serde_json::json!(self.height)),
        ])
    }

    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        let field = |name: &str| metadata.get(name).and_then(|v| v.as_u64());
        Some(Self {
            source_id: usize::try_from(field("source_id")?).ok()?,
            width: u32::try_from(field("width")?).ok()?,
            height: u32::try_from(field("height")?).ok()?,
        })
    }
}

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("embedding failed")]
    Embed(#[from] EmbedError),

    #[error("upsert failed")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum ItemOutcome {
    Stored,
    Skipped(DecodeError),
    Failed(ItemError),
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Log progress and flush the collection after this many processed records
    pub checkpoint_every: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            checkpoint_every: crate::config::DEFAULT_CHECKPOINT_EVERY,
        }
    }
}

/// Per-index outcome of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub stored: Vec<usize>,
    pub skipped: Vec<(usize, DecodeError)>,
    pub failed: Vec<(usize, ItemError)>,
}

impl IngestReport {
    pub fn success_count(&self) -> usize {
        self.stored.len()
    }

    /// Embed and store failures together
    pub fn error_count(&self) -> usize {
        self.failed.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn embed_error_count(&self) -> usize {
        self.failed
            .iter()
            .filter(|(_, e)| matches!(e, ItemError::Embed(_)))
            .count()
    }

    pub fn store_error_count(&self) -> usize {
        self.failed
            .iter()
            .filter(|(_, e)| matches!(e, ItemError::Store(_)))
            .count()
    }

    pub fn processed(&self) -> usize {
        self.success_count() + self.error_count() + self.skipped_count()
    }

    fn record(&mut self, index: usize, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Stored => self.stored.push(index),
            ItemOutcome::Skipped(reason) => {
                let reason_text = error_chain(&reason, ": ");
                if self.skipped.len() < LOUD_SKIP_LIMIT {
                    info!("Skipping item {}: {}", index, reason_text);
                } else {
                    debug!("Skipping item {}: {}", index, reason_text);
                }
                self.skipped.push((index, reason));
            }
            ItemOutcome::Failed(e) => {
                if self.failed.len() < DETAILED_FAILURE_LIMIT {
                    warn!("Failed to process item {}: {}", index, error_chain(&e, "\n  caused by: "));
                } else {
                    warn!("Failed to process item {}: {}", index, error_chain(&e, ": "));
                }
                self.failed.push((index, e));
            }
        }
    }
}

/// The collection could not be saved. `report` holds everything processed
/// before that, including items that are still only in memory.
#[derive(Debug, Error)]
#[error("could not save the collection ({} records processed)", .report.processed())]
pub struct IngestError {
    pub report: IngestReport,
    #[source]
    pub source: StoreError,
}

impl From<StoreError> for IngestError {
    fn from(source: StoreError) -> Self {
        Self {
            report: IngestReport::default(),
            source,
        }
    }
}

/// Decode, embed and upsert a single record.
pub fn ingest_record(
    record: &Record,
    embedder: &dyn Embedder,
    collection: &mut Collection,
) -> ItemOutcome {
    let image = match record.decode_image() {
        Ok(image) => image,
        Err(reason) => return ItemOutcome::Skipped(reason),
    };

    let vector = match embedder.embed_image(&image) {
        Ok(vector) => vector,
        Err(e) => return ItemOutcome::Failed(e.into()),
    };

    let metadata = ImageMetadata {
        source_id: record.index,
        width: image.width(),
        height: image.height(),
    };
    match collection.upsert(
        &item_id(record.index),
        vector,
        metadata.to_metadata(),
        &item_document(record.index),
    ) {
        Ok(()) => ItemOutcome::Stored,
        Err(e) => ItemOutcome::Failed(e.into()),
    }
}

/// Folds the records, in order, into an [`IngestReport`].
///
/// Per-record problems are captured in the report and never abort the run.
/// A failed checkpoint is logged and retried at the next one; only the final
/// flush turns into an error, carrying the report built so far.
pub fn ingest<'a, I>(
    records: I,
    embedder: &dyn Embedder,
    collection: &mut Collection,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError>
where
    I: IntoIterator<Item = &'a Record>,
{
    let checkpoint_every = options.checkpoint_every.max(1);
    collection.set_model_id(embedder.model_id());

    let report = records
        .into_iter()
        .fold(IngestReport::default(), |mut report, record| {
            let outcome = ingest_record(record, embedder, collection);
            report.record(record.index, outcome);

            if report.processed() % checkpoint_every == 0 {
                if let Err(e) = collection.flush() {
                    warn!(
                        "Checkpoint at {} items could not be saved: {}",
                        report.processed(),
                        error_chain(&e, ": ")
                    );
                }
                info!(
                    "Processed {} items (successful: {}, errors: {}, skipped: {})",
                    report.processed(),
                    report.success_count(),
                    report.error_count(),
                    report.skipped_count()
                );
            }
            report
        });

    match collection.flush() {
        Ok(()) => Ok(report),
        Err(source) => Err(IngestError { report, source }),
    }
}

/// Opens (or creates) the collection, ingests every record and closes it.
pub fn run_ingestion<'a, I>(
    records: I,
    embedder: &dyn Embedder,
    store: &VectorStore,
    collection_name: &str,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut collection = store.get_or_create_collection(collection_name, embedder.dimension())?;
    if let Some(existing) = collection.model_id() {
        if existing != embedder.model_id() {
            warn!(
                "Collection '{}' holds vectors from model '{}', now ingesting with '{}'",
                collection_name,
                existing,
                embedder.model_id()
            );
        }
    }
    let report = ingest(records, embedder, &mut collection, options)?;
    if let Err(source) = collection.close() {
        return Err(IngestError { report, source });
    }

    info!(
        "Ingestion into '{}' finished: {} stored, {} errors, {} skipped",
        collection_name,
        report.success_count(),
        report.error_count(),
        report.skipped_count()
    );
    Ok(report)
}
