use log::{debug, error, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{error_chain, StoreError};
use crate::search::nano_vector_db::{Data as NanoDBData, NanoVectorDB};

const COLLECTION_EXT: &str = "json";
const MODEL_KEY: &str = "embedding_model";

pub type Metadata = HashMap<String, serde_json::Value>;

/// A raw nearest-neighbour match, ascending by distance
#[derive(Debug, Clone)]
pub struct Match {
    pub id: String,
    /// Cosine distance; `None` when the score could not be computed
    pub distance: Option<f32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    pub document: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub count: usize,
}

/// Persistent store: a directory holding one index file per collection.
pub struct VectorStore {
    root: PathBuf,
}

impl VectorStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!("Opened vector store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_collection_name(name)?;
        Ok(self.root.join(format!("{}.{}", name, COLLECTION_EXT)))
    }

    pub fn get_or_create_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<Collection, StoreError> {
        if dimension == 0 {
            return Err(StoreError::invalid("collection dimension must be positive"));
        }
        let path = self.collection_path(name)?;
        // The file only appears once the first vector is flushed.
        let db = NanoVectorDB::new(dimension, path)?;
        Ok(Collection {
            name: name.to_string(),
            db,
        })
    }

    /// Opens a populated collection; never creates one. A collection with
    /// no stored vectors is reported as not found.
    pub fn get_collection(&self, name: &str) -> Result<Collection, StoreError> {
        let path = self.collection_path(name)?;
        let not_found = || StoreError::NotFound {
            collection: name.to_string(),
        };
        if !path.is_file() {
            return Err(not_found());
        }
        let db = NanoVectorDB::load(path)?;
        if db.is_empty() {
            return Err(not_found());
        }
        Ok(Collection {
            name: name.to_string(),
            db,
        })
    }

    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        let mut infos = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(COLLECTION_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_collection_name(name).is_err() {
                continue;
            }
            match NanoVectorDB::load(&path) {
                Ok(db) => infos.push(CollectionInfo {
                    name: name.to_string(),
                    dimension: db.embedding_dim,
                    count: db.len(),
                }),
                Err(e) => warn!(
                    "Ignoring unreadable collection file {:?}: {}",
                    path,
                    error_chain(&e, ": ")
                ),
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

fn validate_collection_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::invalid(format!(
            "invalid collection name '{}': use ASCII letters, digits, '_' or '-'",
            name
        )))
    }
}

/// An open collection. Pending writes are flushed on `flush`, `close` or drop.
pub struct Collection {
    name: String,
    db: NanoVectorDB,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.db.embedding_dim
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Insert-or-overwrite keyed by `id`. Rejected input leaves the collection unchanged.
    pub fn upsert(
        &mut self,
        id: &str,
        vector: Vec<f32>,
        metadata: Metadata,
        document: &str,
    ) -> Result<(), StoreError> {
        self.db.upsert(vec![NanoDBData {
            id: id.to_string(),
            document: document.to_string(),
            vector,
            fields: metadata,
        }])?;
        Ok(())
    }

    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Match>, StoreError> {
        let hits = self.db.query(vector, k)?;
        Ok(hits
            .into_iter()
            .map(|hit| Match {
                id: hit.id,
                distance: hit
                    .similarity
                    .is_finite()
                    .then(|| 1.0 - hit.similarity),
                metadata: hit.fields,
            })
            .collect())
    }

    pub fn get(&self, id: &str) -> Option<StoredItem> {
        self.db
            .get(&[id.to_string()])
            .into_iter()
            .next()
            .map(|data| StoredItem {
                id: data.id.clone(),
                vector: data.vector.clone(),
                metadata: data.fields.clone(),
                document: data.document.clone(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<String> {
        self.db.ids().map(String::from).collect()
    }

    /// Model that produced the stored vectors, if recorded
    pub fn model_id(&self) -> Option<&str> {
        self.db.get_additional_data().get(MODEL_KEY)?.as_str()
    }

    pub fn set_model_id(&mut self, model_id: &str) {
        self.db
            .set_additional_data(MODEL_KEY, serde_json::Value::String(model_id.to_string()));
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.db.save()
    }

    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        if self.db.is_dirty() {
            if let Err(e) = self.db.save() {
                error!(
                    "Failed to flush collection '{}' to {:?}: {}",
                    self.name,
                    self.db.storage_file(),
                    error_chain(&e, ": ")
                );
            }
        }
    }
}
