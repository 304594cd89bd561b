use std::sync::Arc;

use clap::Parser;
use common::{
    storage::store::StorageManager,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use retrieval_engine::retriever::{Retriever, RetrieverTuning};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// One-shot search across every corpus named by the manifest, printing the
/// fused ranking as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "corpus-search", about = "Search pre-embedded corpora and fuse the rankings")]
struct Args {
    /// Query text
    query: String,
    /// Results requested from each corpus before fusion (defaults to the
    /// configured top_k)
    #[arg(long)]
    top_k: Option<usize>,
    /// Cap on the number of fused results printed
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();

    // Get config
    let config = get_config()?;
    config.validate()?;

    let storage = StorageManager::new(&config).await?;
    let embedder = Arc::new(EmbeddingProvider::from_config(&config).await?);
    info!(
        embedding_backend = embedder.backend_label(),
        embedding_dimension = embedder.dimension(),
        "Embedding provider initialized"
    );

    let retriever = Retriever::new(storage, embedder, RetrieverTuning::from_config(&config));
    retriever.load(&config.manifest_key).await?;

    let status = retriever.status().await;
    info!(
        version = ?status.version,
        corpora = ?status.corpus_counts,
        "Retriever ready"
    );

    let top_k = args.top_k.unwrap_or(config.top_k);
    let results = retriever.search(&args.query, top_k).await?;

    let shown = args.limit.unwrap_or(results.len());
    for item in results.iter().take(shown) {
        println!("{}", serde_json::to_string(item)?);
    }

    retriever.close().await;
    Ok(())
}
