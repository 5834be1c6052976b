//! Exact nearest-neighbour index over knowledge chunks.
//!
//! The index is persisted as a single JSON document holding only text and
//! float vectors. Nothing executable is ever deserialized, so an index file
//! from an untrusted source can at worst be rejected as corrupt.

pub mod cache;


use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embeddings::Embedding;
use crate::{RelayError, Result};

pub use cache::IndexCache;

const INDEX_FORMAT: &str = "rag-relay-index";
const INDEX_FORMAT_VERSION: u32 = 1;

/// A chunk of the knowledge source, identified by its position in source order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub position: usize,
    pub text: String,
}

impl Document {
    #[inline]
    pub fn new(position: usize, text: impl Into<String>) -> Self {
        Self {
            position,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry {
    #[serde(flatten)]
    document: Document,
    vector: Embedding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    model: String,
    dimension: usize,
    built_at: DateTime<Utc>,
    entries: Vec<Entry>,
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    format: &'a str,
    version: u32,
    #[serde(flatten)]
    index: &'a VectorIndex,
}

#[derive(Deserialize)]
struct IndexFile {
    format: String,
    version: u32,
    #[serde(flatten)]
    index: VectorIndex,
}

impl VectorIndex {
    /// Build an index from documents and their parallel embeddings.
    ///
    /// Every vector must share the dimension of the first one.
    #[inline]
    pub fn build(
        documents: Vec<Document>,
        embeddings: Vec<Embedding>,
        model: impl Into<String>,
    ) -> Result<Self> {
        if documents.is_empty() {
            return Err(RelayError::EmptyIndex);
        }

        if documents.len() != embeddings.len() {
            return Err(RelayError::EmbeddingCountMismatch {
                documents: documents.len(),
                embeddings: embeddings.len(),
            });
        }

        let dimension = embeddings[0].len();
        for (position, vector) in embeddings.iter().enumerate() {
            if vector.len() != dimension {
                return Err(RelayError::DimensionMismatch {
                    position,
                    expected: dimension,
                    found: vector.len(),
                });
            }
            if vector.iter().any(|value| !value.is_finite()) {
                return Err(RelayError::EmbeddingService(format!(
                    "embedding for document {position} contains a non-finite value"
                )));
            }
        }

        let entries = documents
            .into_iter()
            .zip(embeddings)
            .map(|(document, vector)| Entry { document, vector })
            .collect::<Vec<_>>();

        debug!(
            "Built index with {} documents of dimension {}",
            entries.len(),
            dimension
        );

        Ok(Self {
            model: model.into(),
            dimension,
            built_at: Utc::now(),
            entries,
        })
    }

    /// Write the index to `path`, replacing any previous file atomically.
    ///
    /// The data goes to a temporary file next to `path` which is then renamed
    /// over it, so a concurrent reader sees either the old or the new index.
    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut staging = tempfile::Builder::new()
            .prefix(".index-")
            .suffix(".tmp")
            .tempfile_in(parent)?;

        {
            let mut writer = BufWriter::new(staging.as_file_mut());
            let file = IndexFileRef {
                format: INDEX_FORMAT,
                version: INDEX_FORMAT_VERSION,
                index: self,
            };
            serde_json::to_writer(&mut writer, &file).map_err(std::io::Error::from)?;
            writer.flush()?;
        }
        staging.as_file().sync_all()?;

        staging.persist(path).map_err(|e| RelayError::Io(e.error))?;

        info!(
            "Saved index with {} documents to {}",
            self.len(),
            path.display()
        );
        Ok(())
    }

    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RelayError::IndexNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        Self::from_slice(&bytes, path)
    }

    /// Parse a serialized index; `path` is only used in error messages
    #[inline]
    pub fn from_slice(bytes: &[u8], path: &Path) -> Result<Self> {
        let corrupt = |reason: String| RelayError::CorruptIndex {
            path: PathBuf::from(path),
            reason,
        };

        let file: IndexFile =
            serde_json::from_slice(bytes).map_err(|e| corrupt(format!("unreadable: {e}")))?;

        if file.format != INDEX_FORMAT {
            return Err(corrupt(format!("unknown format '{}'", file.format)));
        }
        if file.version != INDEX_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {})",
                file.version, INDEX_FORMAT_VERSION
            )));
        }

        let index = file.index;
        if index.entries.is_empty() {
            return Err(corrupt("no documents stored".to_string()));
        }
        if let Some((position, entry)) = index
            .entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.vector.len() != index.dimension)
        {
            return Err(corrupt(format!(
                "entry {} has dimension {}, expected {}",
                position,
                entry.vector.len(),
                index.dimension
            )));
        }

        debug!(
            "Loaded index with {} documents from {}",
            index.len(),
            path.display()
        );
        Ok(index)
    }

    /// The `k` documents closest to `query` by Euclidean distance, nearest first.
    ///
    /// Equal distances keep insertion order. Asking for more documents than
    /// the index holds returns all of them.
    #[inline]
    pub fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<&Document>> {
        Ok(self
            .similarity_search_with_distance(query, k)?
            .into_iter()
            .map(|(document, _)| document)
            .collect())
    }

    /// Like [`similarity_search`](Self::similarity_search), with squared distances
    #[inline]
    pub fn similarity_search_with_distance(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(&Document, f32)>> {
        if self.entries.is_empty() {
            return Err(RelayError::EmptyIndex);
        }
        if k == 0 {
            return Err(RelayError::InvalidQuery(
                "k must be at least 1".to_string(),
            ));
        }
        if query.len() != self.dimension {
            return Err(RelayError::DimensionMismatch {
                position: 0,
                expected: self.dimension,
                found: query.len(),
            });
        }

        let mut scored: Vec<(&Document, f32)> = self
            .entries
            .iter()
            .map(|entry| (&entry.document, squared_l2(query, &entry.vector)))
            .collect();

        // sort_by is stable, which keeps ties in insertion order
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        Ok(scored)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embedding model the vectors were produced with
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    #[inline]
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.entries.iter().map(|entry| &entry.document)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}
