//! Reference memory stores for Taskweave.
//!
//! Implementations of the [`MemoryStore`](taskweave_core::MemoryStore)
//! contract: in-memory (testing and ephemeral operations), file-backed
//! (JSONL persistence), and no-op (memory disabled). The `vector` module
//! holds the similarity utilities behind semantic recall.

pub mod file_store;
pub mod in_memory;
pub mod noop;
pub mod vector;

pub use file_store::FileStore;
pub use in_memory::InMemoryStore;
pub use noop::NoopStore;
pub use vector::{cosine_similarity, keyword_score, vector_search, Embedder, SharedEmbedder};
