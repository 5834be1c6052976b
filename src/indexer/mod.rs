// Indexer module
// Offline pipeline turning the knowledge file into a persisted vector index


use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::embeddings::{Embedder, chunk_text};
use crate::index::{Document, VectorIndex};
use crate::{RelayError, Result};

/// Outcome of a successful index build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub documents: usize,
    pub dimension: usize,
    pub output: PathBuf,
}

/// Reads the knowledge file, embeds its chunks and writes the index.
///
/// Runs sequentially; any failure aborts before the index file is touched.
pub struct IndexBuilder<'a> {
    embedder: &'a dyn Embedder,
    chunk_size: usize,
    show_progress: bool,
}

impl<'a> IndexBuilder<'a> {
    #[inline]
    pub fn new(embedder: &'a dyn Embedder, chunk_size: usize) -> Self {
        Self {
            embedder,
            chunk_size,
            show_progress: console::user_attended_stderr(),
        }
    }

    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[inline]
    pub fn build(&self, source: &Path, output: &Path) -> Result<BuildReport> {
        info!(
            "Building index from {} with chunk size {}",
            source.display(),
            self.chunk_size
        );

        let text = match fs::read_to_string(source) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RelayError::SourceNotFound {
                    path: source.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let documents: Vec<Document> = chunk_text(&text, self.chunk_size)
            .into_iter()
            .enumerate()
            .map(|(position, chunk)| Document::new(position, chunk))
            .collect();

        if documents.is_empty() {
            // an empty knowledge file leaves the previous index in place
            return Err(RelayError::EmptyIndex);
        }

        let embeddings = self.embed_documents(&documents)?;
        let index = VectorIndex::build(documents, embeddings, self.embedder.model())?;
        index.save(output)?;

        let report = BuildReport {
            documents: index.len(),
            dimension: index.dimension(),
            output: output.to_path_buf(),
        };
        info!(
            "Indexed {} documents ({} dimensions) into {}",
            report.documents,
            report.dimension,
            report.output.display()
        );
        Ok(report)
    }

    fn embed_documents(&self, documents: &[Document]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();

        let bar = if self.show_progress {
            ProgressBar::new(texts.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding chunks {wide_bar}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        // one embedder request per batch, so the bar advances as requests finish
        let batch_size = self.embedder.batch_size().max(1);
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            debug!("Embedding batch of {} chunks", batch.len());
            let vectors = self.embedder.embed_many(batch)?;
            if vectors.len() != batch.len() {
                bar.abandon();
                return Err(RelayError::EmbeddingCountMismatch {
                    documents: batch.len(),
                    embeddings: vectors.len(),
                });
            }
            embeddings.extend(vectors);
            bar.inc(batch.len() as u64);
        }
        bar.finish_and_clear();

        Ok(embeddings)
    }
}
