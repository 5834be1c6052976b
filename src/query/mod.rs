//! Query pipeline shared by the plain and retrieval-augmented endpoints.
//!
//! Both modes run the same steps: optional context retrieval, prompt
//! assembly, then a streaming relay of the LLM response.


use std::sync::Arc;

use tracing::{debug, info};

use crate::embeddings::Embedder;
use crate::index::IndexCache;
use crate::llm::{ByteStream, ChatBackend};
use crate::{RelayError, Result};

pub const DEFAULT_TOP_K: usize = 3;

const PROMPT_PREAMBLE: &str = "Use the following context to answer the question.\n\
If the context does not contain the answer, say that you don't know.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Forward the question untouched
    Plain,
    /// Retrieve passages from the index and answer from them
    Augmented,
}

pub struct QueryPipeline {
    chat: Arc<dyn ChatBackend>,
    embedder: Arc<dyn Embedder>,
    index: Arc<IndexCache>,
    top_k: usize,
}

impl QueryPipeline {
    #[inline]
    pub fn new(
        chat: Arc<dyn ChatBackend>,
        embedder: Arc<dyn Embedder>,
        index: Arc<IndexCache>,
    ) -> Self {
        Self {
            chat,
            embedder,
            index,
            top_k: DEFAULT_TOP_K,
        }
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Answer `question`, returning the upstream byte stream once it has started
    #[inline]
    pub async fn run(&self, mode: QueryMode, question: &str) -> Result<ByteStream> {
        let prompt = match mode {
            QueryMode::Plain => question.to_string(),
            QueryMode::Augmented => {
                let passages = self.retrieve(question).await?;
                build_prompt(&passages, question)
            }
        };

        debug!("Running {:?} query ({} prompt bytes)", mode, prompt.len());
        self.chat.stream_chat(prompt).await
    }

    /// The `top_k` passages nearest to `question`, nearest first
    #[inline]
    pub async fn retrieve(&self, question: &str) -> Result<Vec<String>> {
        let index = self.index.get().await?;

        let embedder = Arc::clone(&self.embedder);
        let owned_question = question.to_string();
        let query_vector = tokio::task::spawn_blocking(move || embedder.embed(&owned_question))
            .await
            .map_err(|e| RelayError::Other(anyhow::anyhow!("embedding task failed: {e}")))??;

        let hits = index.similarity_search_with_distance(&query_vector, self.top_k)?;
        info!(
            "Retrieved {} passages (positions {:?})",
            hits.len(),
            hits.iter().map(|(doc, _)| doc.position).collect::<Vec<_>>()
        );

        Ok(hits
            .into_iter()
            .map(|(document, _)| document.text.clone())
            .collect())
    }
}

/// Fixed instructions, the retrieved context, the question and an answer cue
#[inline]
pub fn build_prompt(passages: &[String], question: &str) -> String {
    let context = passages.join("\n\n");
    format!("{PROMPT_PREAMBLE}\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer:")
}
