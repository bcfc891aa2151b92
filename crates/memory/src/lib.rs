//! Knowledge store implementations for Ragline.

pub mod chroma;
pub mod file_backend;
pub mod in_memory;
pub mod vector;

pub use chroma::ChromaStore;
pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
pub use vector::{cosine_similarity, nearest_texts, vector_search};
