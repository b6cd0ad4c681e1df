//! Retrieval-augmented generation core.
//!
//! Ingestion path: `chunker` → `embedder` → `store` (`memory` / `sqlite`).
//! Query path: `embedder` → `retriever` (+ `dedup`).

pub mod chunker;
pub mod dedup;
pub mod embedder;
pub mod hashing;
pub mod loader;
pub mod memory;
pub mod retriever;
pub mod sqlite;
pub mod store;
pub mod types;

pub use chunker::Chunker;
pub use embedder::{Embedder, EmbedderConfig, EmbeddingBackend, OversizePolicy};
pub use hashing::HashingEmbeddings;
pub use memory::MemoryIndex;
pub use retriever::{Retriever, RetrieverConfig};
pub use sqlite::SqliteIndex;
pub use store::{IndexFilter, ScoredEntry, VectorIndex};
pub use types::{Chunk, Document, EmbeddingVector, IndexEntry, RetrievalResult, SourceDocument};
