use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::RelayError;
use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::index::{IndexCache, VectorIndex};
use crate::indexer::{BuildReport, IndexBuilder};
use crate::llm::LlmClient;
use crate::query::QueryPipeline;
use crate::server::{self, AppState};

/// Chunk and embed the knowledge file, then persist the index.
///
/// Blocking: run it off the async runtime.
#[inline]
pub fn build_index(
    config: &Config,
    source: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<BuildReport> {
    let source = source.unwrap_or_else(|| config.index.source.clone());
    let output = output.unwrap_or_else(|| config.index.path.clone());

    info!(
        "Building index from {} into {}",
        source.display(),
        output.display()
    );

    let embedder =
        OllamaClient::new(&config.ollama).context("Failed to create embedding client")?;

    let result = IndexBuilder::new(&embedder, config.index.chunk_size).build(&source, &output);

    match result {
        Ok(report) => {
            println!(
                "Indexed {} chunks ({} dimensions) into {}",
                report.documents,
                report.dimension,
                report.output.display()
            );
            Ok(report)
        }
        Err(RelayError::EmptyIndex) => {
            println!("Indexed 0 chunks: {} is empty", source.display());
            Err(RelayError::EmptyIndex).context("Refusing to write an empty index")
        }
        Err(e) => Err(e).context("Index build failed"),
    }
}

/// Run the HTTP relay until Ctrl-C
#[inline]
pub async fn serve(config: &Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(host) = host {
        server_config.host = host;
    }
    if let Some(port) = port {
        server_config.port = port;
    }
    server_config
        .validate()
        .context("Invalid server address")?;

    let embedder =
        OllamaClient::new(&config.ollama).context("Failed to create embedding client")?;
    let client = embedder.clone();
    match tokio::task::spawn_blocking(move || client.health_check()).await {
        Ok(Ok(())) => info!("Embedding service ready"),
        Ok(Err(e)) => warn!("Embedding service not ready, /ask will fail until it is: {}", e),
        Err(e) => warn!("Embedding health check did not complete: {}", e),
    }

    let chat = LlmClient::new(&config.llm).context("Failed to create LLM client")?;
    info!("Relaying to {} (model {})", chat.chat_url(), chat.model());

    let index = Arc::new(IndexCache::new(config.index.path.clone()));
    info!("Answering /ask from {}", index.path().display());
    match index.get().await {
        Ok(loaded) => {
            if let Some(message) = model_mismatch(&loaded, &config.ollama.model) {
                warn!("{}; /ask will fail until the index is rebuilt", message);
            }
        }
        Err(e) => warn!("{}; /ask will fail until an index is built", e),
    }

    let pipeline = QueryPipeline::new(Arc::new(chat), Arc::new(embedder), index)
        .with_top_k(config.index.top_k);

    let address = server_config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    server::serve(listener, AppState::new(pipeline), server::shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Print what the index and services look like
#[inline]
pub fn show_status(config: &Config) {
    println!("{}", style("📊 rag-relay Status Report").bold().cyan());
    println!("{}", "=".repeat(50));
    println!();

    println!("📚 Index Status:");
    let path = &config.index.path;
    match VectorIndex::load(path) {
        Ok(index) => {
            println!("   ✅ Index: {}", path.display());
            println!("   📄 Documents: {}", index.len());
            println!("   🔢 Dimension: {}", index.dimension());
            println!("   🧮 Embedding Model: {}", index.model());
            println!(
                "   🕒 Built: {}",
                index.built_at().format("%Y-%m-%d %H:%M:%S UTC")
            );
            if let Some(message) = model_mismatch(&index, &config.ollama.model) {
                println!("   ⚠️  {}; rebuild it", message);
            }
        }
        Err(RelayError::IndexNotFound { .. }) => {
            println!("   ❌ Index: not built ({})", path.display());
            println!("   Run 'rag-relay build-index' to create it.");
        }
        Err(e) => {
            println!("   ❌ Index: {}", e);
        }
    }

    println!();
    println!("🤖 Embedding Service:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Model: {}", config.ollama.model);
                println!("   🔢 Batch Size: {}", config.ollama.batch_size);
            }
            Err(e) => {
                println!("   ⚠️  Ollama: Unhealthy - {}", e);
            }
        },
        Err(e) => {
            println!("   ❌ Ollama: Misconfigured - {}", e);
        }
    }

    println!();
    println!("💬 Chat Model:");
    match config.llm.chat_url() {
        Ok(url) => println!("   🌐 Endpoint: {}", url),
        Err(e) => println!("   ❌ Endpoint: {}", e),
    }
    println!("   📋 Model: {}", config.llm.model);

    println!();
    println!("🌍 Server: http://{}", config.server.bind_address());
}

/// Query vectors from another model will not match the index dimension
fn model_mismatch(index: &VectorIndex, configured_model: &str) -> Option<String> {
    (index.model() != configured_model).then(|| {
        format!(
            "Index was built with '{}' but '{}' is configured",
            index.model(),
            configured_model
        )
    })
}
