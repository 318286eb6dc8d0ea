use log::{info, warn};

use crate::error::PipelineError;
use crate::ingestion::{ImageMetadata, ID_PREFIX};
use crate::search::embedding_engine::Embedder;
use crate::search::vector_store::{Collection, Metadata, VectorStore};

/// The fixed list run by the `demo` command.
pub const EXAMPLE_QUERIES: [&str; 5] = [
    "a picture of a traditional cultural festival",
    "traditional clothing",
    "ancient architecture",
    "cultural food",
    "musical instruments",
];

pub const DEFAULT_NUM_RESULTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub id: String,
    pub distance: Option<f32>,
    pub metadata: Metadata,
}

impl QueryResult {
    /// `1 - distance`, or `None` when the store gave no distance
    pub fn similarity(&self) -> Option<f32> {
        self.distance.map(|d| 1.0 - d)
    }

    pub fn image_metadata(&self) -> Option<ImageMetadata> {
        ImageMetadata::from_metadata(&self.metadata)
    }

    /// Dataset index of the matched image. Prefers the stored `source_id`
    /// and only falls back to parsing the identifier.
    pub fn source_index(&self) -> Option<usize> {
        self.metadata
            .get("source_id")
            .and_then(|v| v.as_u64())
            .and_then(|v| usize::try_from(v).ok())
            .or_else(|| parse_item_id(&self.id))
    }
}

/// Parses `image_<n>` back into `n`.
pub fn parse_item_id(id: &str) -> Option<usize> {
    let digits = id.strip_prefix(ID_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Embeds `text` and returns the `k` nearest stored images, closest first.
pub fn query_collection(
    collection: &Collection,
    embedder: &dyn Embedder,
    text: &str,
    k: usize,
) -> Result<Vec<QueryResult>, PipelineError> {
    if let Some(stored_model) = collection.model_id() {
        if stored_model != embedder.model_id() {
            warn!(
                "Collection '{}' was built with '{}' but queried with '{}'; scores may be meaningless",
                collection.name(),
                stored_model,
                embedder.model_id()
            );
        }
    }

    let query_embedding = embedder.embed_text(text)?;
    let matches = collection.query(&query_embedding, k)?;
    Ok(matches
        .into_iter()
        .map(|m| QueryResult {
            id: m.id,
            distance: m.distance,
            metadata: m.metadata,
        })
        .collect())
}

/// Opens the collection and runs one query against it.
///
/// A collection that was never populated is a `StoreError::NotFound`, raised
/// before the model is invoked.
pub fn query_image_database(
    store: &VectorStore,
    collection_name: &str,
    embedder: &dyn Embedder,
    text: &str,
    k: usize,
) -> Result<Vec<QueryResult>, PipelineError> {
    info!("Querying database with: '{}'", text);
    let collection = store.get_collection(collection_name)?;
    query_collection(&collection, embedder, text, k)
}
