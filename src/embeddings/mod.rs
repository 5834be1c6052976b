// Embeddings module
// Text chunking and the embedding service adapter

pub mod chunking;
pub mod ollama;

pub use chunking::chunk_text;
pub use ollama::OllamaClient;

use crate::Result;

pub const DEFAULT_BATCH_SIZE: usize = 16;

/// A fixed-dimension vector produced by the embedding model
pub type Embedding = Vec<f32>;

/// Turns text into embedding vectors.
///
/// Implementations are blocking; async callers move calls onto the blocking pool.
pub trait Embedder: Send + Sync {
    /// Name of the model producing the vectors
    fn model(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed several texts, returning vectors in input order
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Number of texts sent to the service per request
    fn batch_size(&self) -> usize {
        DEFAULT_BATCH_SIZE
    }
}
