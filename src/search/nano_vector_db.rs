//! A lightweight single-file vector index
#![forbid(unsafe_code)]

use base64::{engine::general_purpose, Engine as _};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

type Float = f32;

/// A single vector entry with metadata
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Data {
    /// Unique identifier for the vector
    #[serde(rename = "__id__")]
    pub id: String,
    /// Free text stored alongside the vector
    #[serde(rename = "__document__", default)]
    pub document: String,
    /// The vector data, kept in the matrix on disk
    #[serde(skip)]
    pub vector: Vec<Float>,
    /// Additional metadata fields stored with the vector
    #[serde(flatten, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DataBase {
    embedding_dim: usize,
    data: Vec<Data>,
    #[serde(with = "base64_bytes")]
    matrix: Vec<Float>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    additional_data: HashMap<String, serde_json::Value>,
}

mod base64_bytes {
    use super::*;
    use bytemuck::cast_slice;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(vec: &[Float], serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = cast_slice(vec);
        let b64 = general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&b64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Float>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(serde::de::Error::custom(format!(
                "matrix byte length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| Float::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

/// One nearest-neighbour match, most similar first
#[derive(Debug, Clone)]
pub struct Hit {
    pub id: String,
    /// Cosine similarity between the query and the stored vector
    pub similarity: Float,
    pub fields: HashMap<String, serde_json::Value>,
}

/// Main vector database struct
#[derive(Debug)]
pub struct NanoVectorDB {
    /// Dimensionality of stored vectors
    pub embedding_dim: usize,
    storage_file: PathBuf,
    storage: DataBase,
    dirty: bool,
}

#[derive(PartialEq)]
struct ScoredIndex {
    score: Float,
    index: usize,
}

impl Eq for ScoredIndex {}

impl PartialOrd for ScoredIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the lowest score first; NaN ranks
        // below every number. Ties keep the earlier insertion.
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or_else(|| {
                if self.score.is_nan() && !other.score.is_nan() {
                    Ordering::Greater
                } else if !self.score.is_nan() && other.score.is_nan() {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl NanoVectorDB {
    /// Opens the index stored at `storage_file`, or starts an empty one
    pub fn new(embedding_dim: usize, storage_file: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let storage_file = storage_file.into();
        if storage_file.exists() && storage_file.metadata()?.len() > 0 {
            let db = Self::load(storage_file)?;
            if db.embedding_dim != embedding_dim {
                return Err(StoreError::DimensionMismatch {
                    expected: db.embedding_dim,
                    got: embedding_dim,
                });
            }
            return Ok(db);
        }

        Ok(Self {
            embedding_dim,
            storage_file,
            storage: DataBase {
                embedding_dim,
                data: Vec::new(),
                matrix: Vec::new(),
                additional_data: HashMap::new(),
            },
            dirty: false,
        })
    }

    /// Loads an existing index, taking its dimension from the file
    pub fn load(storage_file: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let storage_file = storage_file.into();
        let contents = fs::read_to_string(&storage_file)?;
        let mut db: DataBase = serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
            path: storage_file.clone(),
            message: e.to_string(),
        })?;

        let expected_len = db.data.len() * db.embedding_dim;
        if db.matrix.len() != expected_len {
            return Err(StoreError::Corrupt {
                path: storage_file,
                message: format!(
                    "Matrix size mismatch: expected {}, got {}",
                    expected_len,
                    db.matrix.len()
                ),
            });
        }

        if db.embedding_dim > 0 {
            for (data, row) in db.data.iter_mut().zip(db.matrix.chunks_exact(db.embedding_dim)) {
                data.vector = row.to_vec();
            }
        }

        Ok(Self {
            embedding_dim: db.embedding_dim,
            storage_file,
            storage: db,
            dirty: false,
        })
    }

    pub fn storage_file(&self) -> &Path {
        &self.storage_file
    }

    /// Upserts vectors into the database, returning (updated ids, inserted ids)
    pub fn upsert(&mut self, datas: Vec<Data>) -> Result<(Vec<String>, Vec<String>), StoreError> {
        for data_item in &datas {
            self.validate(data_item)?;
        }

        let mut existing_ids_map: HashMap<String, usize> = self
            .storage
            .data
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();

        let mut updates = Vec::new();
        let mut inserts = Vec::new();

        for data_item in datas {
            let norm_vec = normalize(&data_item.vector);
            if let Some(&pos) = existing_ids_map.get(&data_item.id) {
                let start = pos * self.embedding_dim;
                let end = start + self.embedding_dim;
                self.storage.matrix[start..end].copy_from_slice(&norm_vec);
                let stored = &mut self.storage.data[pos];
                stored.vector = norm_vec;
                stored.fields = data_item.fields;
                stored.document = data_item.document;
                updates.push(data_item.id);
            } else {
                existing_ids_map.insert(data_item.id.clone(), self.storage.data.len());
                self.storage.matrix.extend_from_slice(&norm_vec);
                inserts.push(data_item.id.clone());
                self.storage.data.push(Data {
                    vector: norm_vec,
                    ..data_item
                });
            }
        }

        self.dirty = true;
        Ok((updates, inserts))
    }

    fn validate(&self, data: &Data) -> Result<(), StoreError> {
        if data.id.is_empty() {
            return Err(StoreError::invalid("item id must not be empty"));
        }
        if data.document.is_empty() {
            return Err(StoreError::invalid(format!(
                "item '{}' has an empty document",
                data.id
            )));
        }
        if data.vector.len() != self.embedding_dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.embedding_dim,
                got: data.vector.len(),
            });
        }
        if data.vector.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::invalid(format!(
                "item '{}' has a non-finite vector component",
                data.id
            )));
        }
        Ok(())
    }

    /// Queries the database for the `top_k` most similar vectors
    pub fn query(&self, query: &[Float], top_k: usize) -> Result<Vec<Hit>, StoreError> {
        if query.len() != self.embedding_dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.embedding_dim,
                got: query.len(),
            });
        }
        if top_k == 0 || self.storage.data.is_empty() {
            return Ok(Vec::new());
        }

        let top_k = top_k.min(self.storage.data.len());
        let query_norm = normalize(query);
        let scores: Vec<Float> = self
            .storage
            .matrix
            .par_chunks_exact(self.embedding_dim)
            .map(|row| simple_dot_product(row, &query_norm))
            .collect();

        let mut heap = BinaryHeap::with_capacity(top_k + 1);
        for (index, score) in scores.into_iter().enumerate() {
            heap.push(ScoredIndex { score, index });
            if heap.len() > top_k {
                heap.pop();
            }
        }

        // Ord is reversed, so ascending order here is highest score first.
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|si| {
                let data = &self.storage.data[si.index];
                Hit {
                    id: data.id.clone(),
                    similarity: si.score,
                    fields: data.fields.clone(),
                }
            })
            .collect())
    }

    /// Get vectors by their IDs
    pub fn get(&self, ids: &[String]) -> Vec<&Data> {
        let id_set: HashSet<_> = ids.iter().map(|s| s.as_str()).collect();
        self.storage
            .data
            .iter()
            .filter(|data| id_set.contains(data.id.as_str()))
            .collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.storage.data.iter().map(|d| d.id.as_str())
    }

    /// Saves the database to disk if anything changed since the last save.
    /// Nothing is written until the index holds at least one vector.
    pub fn save(&mut self) -> Result<(), StoreError> {
        if !self.dirty || (self.storage.data.is_empty() && !self.storage_file.exists()) {
            return Ok(());
        }
        let serialized = serde_json::to_string(&self.storage)?;
        // Write-then-rename so an interrupted save never truncates the previous file.
        let tmp = self.storage_file.with_extension("json.tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.storage_file)?;
        self.dirty = false;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Get additional metadata stored in the database
    pub fn get_additional_data(&self) -> &HashMap<String, serde_json::Value> {
        &self.storage.additional_data
    }

    /// Store one additional metadata entry in the database
    pub fn set_additional_data(&mut self, key: &str, value: serde_json::Value) {
        if self.storage.additional_data.get(key) != Some(&value) {
            self.storage.additional_data.insert(key.to_string(), value);
            self.dirty = true;
        }
    }

    /// Get the number of vectors in the database
    pub fn len(&self) -> usize {
        self.storage.data.len()
    }

    /// Check if database is empty
    pub fn is_empty(&self) -> bool {
        self.storage.data.is_empty()
    }
}

#[inline]
fn simple_dot_product(vec1: &[Float], vec2: &[Float]) -> Float {
    vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum()
}

/// Normalize a vector to unit length; a zero vector stays zero
pub fn normalize(vector: &[Float]) -> Vec<Float> {
    let norm_sq: Float = vector.iter().map(|&x| x * x).sum();
    if norm_sq == 0.0 {
        return vec![0.0; vector.len()];
    }
    let inv_norm = 1.0 / norm_sq.sqrt();
    vector.iter().map(|&x| x * inv_norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn item(id: &str, vector: Vec<Float>, color: &str) -> Data {
        Data {
            id: id.into(),
            document: format!("doc {}", id),
            vector,
            fields: [("color".into(), serde_json::json!(color))].into(),
        }
    }

    #[test]
    fn test_base64_deserialization_edge_cases() {
        let valid_db = DataBase {
            embedding_dim: 2,
            data: vec![item("test", vec![1.0, 2.0], "red")],
            matrix: vec![1.0, 2.0],
            additional_data: HashMap::new(),
        };
        let serialized = serde_json::to_string(&valid_db).unwrap();
        let deserialized: DataBase = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.matrix, vec![1.0, 2.0]);
        assert_eq!(deserialized.data[0].document, "doc test");
        assert_eq!(deserialized.data[0].fields["color"], "red");

        let invalid_json = r#"{
            "embedding_dim": 2,
            "data": [{"__id__": "test"}],
            "matrix": "INVALID_BASE64!!"
        }"#;
        let result: Result<DataBase, _> = serde_json::from_str(invalid_json);
        assert!(result.is_err());
    }

    #[test]
    fn test_matrix_size_validation_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.json");

        let corrupt_db_storage = DataBase {
            embedding_dim: 2,
            data: vec![item("entry1", vec![1.0, 2.0], "red")],
            matrix: vec![1.0],
            additional_data: HashMap::new(),
        };
        fs::write(&path, serde_json::to_string(&corrupt_db_storage).unwrap()).unwrap();

        let err = NanoVectorDB::new(2, &path).unwrap_err();
        let err_msg = err.to_string();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(err_msg.contains("Matrix size mismatch"), "Error message mismatch: {}", err_msg);
        assert!(err_msg.contains("expected 2"), "Error message mismatch: {}", err_msg);
        assert!(err_msg.contains("got 1"), "Error message mismatch: {}", err_msg);
    }

    #[test]
    fn test_embedding_dim_validation_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        let mut db = NanoVectorDB::new(2, &path).unwrap();
        db.upsert(vec![item("entry1", vec![1.0, 2.0], "red")]).unwrap();
        db.save().unwrap();

        let err = NanoVectorDB::new(3, &path).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { expected: 2, got: 3 }
        ));
    }

    #[test]
    fn test_scored_index_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(ScoredIndex { score: 0.8, index: 0 });
        heap.push(ScoredIndex { score: 0.9, index: 1 });
        heap.push(ScoredIndex { score: 0.7, index: 2 });
        heap.push(ScoredIndex { score: 1.0, index: 3 });

        while heap.len() > 2 {
            heap.pop();
        }
        let sorted_k = heap.into_sorted_vec();
        assert_eq!(sorted_k.len(), 2);
        assert_eq!(sorted_k[0].score, 1.0);
        assert_eq!(sorted_k[1].score, 0.9);

        // NaN is the first thing evicted.
        let nan_score = ScoredIndex { score: Float::NAN, index: 0 };
        let regular_score = ScoredIndex { score: 0.5, index: 1 };
        assert_eq!(nan_score.cmp(&regular_score), Ordering::Greater);
        assert_eq!(regular_score.cmp(&nan_score), Ordering::Less);
    }

    #[test]
    fn test_upsert_and_query() -> Result<(), StoreError> {
        let dir = TempDir::new()?;
        let mut db = NanoVectorDB::new(3, dir.path().join("db.json"))?;

        let (_, inserted1) = db.upsert(vec![
            item("vec1", vec![1.0, 2.0, 3.0], "red"),
            item("vec2", vec![-4.0, 5.0, 6.0], "blue"),
        ])?;
        assert_eq!(inserted1.len(), 2);
        db.save()?;

        let (updated2, inserted2) = db.upsert(vec![
            item("vec1", vec![1.1, 2.1, 3.1], "dark red"),
            item("vec3", vec![7.0, 8.0, -9.0], "green"),
        ])?;
        assert_eq!(updated2, vec!["vec1".to_string()]);
        assert_eq!(inserted2, vec!["vec3".to_string()]);
        assert_eq!(db.len(), 3);

        let results = db.query(&[1.0, 2.0, 3.0], 1)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "vec1");
        assert_eq!(results[0].fields["color"], "dark red");
        assert!(results[0].similarity > 0.95);

        let all = db.query(&[1.0, 2.0, 3.0], 10)?;
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        Ok(())
    }

    #[test]
    fn test_duplicate_ids_in_one_batch_collapse() -> Result<(), StoreError> {
        let dir = TempDir::new()?;
        let mut db = NanoVectorDB::new(2, dir.path().join("db.json"))?;
        let (updated, inserted) = db.upsert(vec![
            item("a", vec![1.0, 0.0], "first"),
            item("a", vec![0.0, 1.0], "second"),
        ])?;
        assert_eq!(inserted, vec!["a".to_string()]);
        assert_eq!(updated, vec!["a".to_string()]);
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(&["a".into()])[0].fields["color"], "second");
        Ok(())
    }

    #[test]
    fn test_invalid_items_leave_db_untouched() -> Result<(), StoreError> {
        let dir = TempDir::new()?;
        let mut db = NanoVectorDB::new(2, dir.path().join("db.json"))?;

        let mut no_doc = item("a", vec![1.0, 0.0], "red");
        no_doc.document.clear();
        assert!(matches!(db.upsert(vec![no_doc]), Err(StoreError::InvalidInput { .. })));

        assert!(matches!(
            db.upsert(vec![item("", vec![1.0, 0.0], "red")]),
            Err(StoreError::InvalidInput { .. })
        ));
        assert!(matches!(
            db.upsert(vec![item("b", vec![1.0, Float::NAN], "red")]),
            Err(StoreError::InvalidInput { .. })
        ));
        assert!(matches!(
            db.upsert(vec![item("ok", vec![1.0, 0.0], "red"), item("c", vec![1.0], "red")]),
            Err(StoreError::DimensionMismatch { expected: 2, got: 1 })
        ));
        assert!(db.is_empty());
        Ok(())
    }

    #[test]
    fn test_save_and_reload_restores_vectors() -> Result<(), StoreError> {
        let dir = TempDir::new()?;
        let path = dir.path().join("db.json");
        let mut db = NanoVectorDB::new(2, &path)?;
        db.upsert(vec![item("v1", vec![3.0, 4.0], "red")])?;
        db.set_additional_data("model", serde_json::json!("m"));
        db.save()?;
        assert!(!db.is_dirty());

        let reloaded = NanoVectorDB::load(&path)?;
        assert_eq!(reloaded.embedding_dim, 2);
        assert_eq!(reloaded.len(), 1);
        let stored = reloaded.get(&["v1".into()]);
        assert!((stored[0].vector[0] - 0.6).abs() < 1e-6);
        assert!((stored[0].vector[1] - 0.8).abs() < 1e-6);
        assert_eq!(reloaded.get_additional_data()["model"], "m");
        Ok(())
    }

    #[test]
    fn test_query_rejects_wrong_dimension() -> Result<(), StoreError> {
        let dir = TempDir::new()?;
        let db = NanoVectorDB::new(3, dir.path().join("db.json"))?;
        assert!(matches!(
            db.query(&[1.0, 0.0], 1),
            Err(StoreError::DimensionMismatch { expected: 3, got: 2 })
        ));
        assert!(db.query(&[1.0, 0.0, 0.0], 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_query_with_huge_k_returns_every_item() -> Result<(), StoreError> {
        let dir = TempDir::new()?;
        let mut db = NanoVectorDB::new(2, dir.path().join("db.json"))?;
        db.upsert(vec![item("only", vec![1.0, 0.0], "red")])?;
        assert_eq!(db.query(&[1.0, 0.0], usize::MAX)?.len(), 1);
        assert_eq!(db.query(&[1.0, 0.0], usize::MAX / 16)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_empty_index_is_not_written() -> Result<(), StoreError> {
        let dir = TempDir::new()?;
        let path = dir.path().join("db.json");
        let mut db = NanoVectorDB::new(2, &path)?;
        db.set_additional_data("model", serde_json::json!("m"));
        db.save()?;
        assert!(!path.exists());

        db.upsert(vec![item("v1", vec![1.0, 0.0], "red")])?;
        db.save()?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_normalize_zero_vector() {
        let zero_vec = vec![0.0, 0.0, 0.0];
        assert_eq!(normalize(&zero_vec), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_normalize_non_zero_vector() {
        let normalized = normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }
}
