pub mod data_loader;
pub mod embedding_engine;
pub mod nano_vector_db;
pub mod vector_store;

pub use data_loader::{Dataset, Record};
#[cfg(feature = "clip")]
pub use embedding_engine::ClipEmbeddingEngine;
pub use embedding_engine::{Embedder, EMBEDDING_DIMENSION};
pub use nano_vector_db::NanoVectorDB;
pub use vector_store::{Collection, Match, Metadata, StoredItem, VectorStore};
