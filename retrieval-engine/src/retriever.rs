use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use common::{
    error::AppError,
    storage::store::StorageManager,
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::{
    corpus::CorpusIndex,
    manifest::Manifest,
    pipeline::{self, SearchRunOutput},
    RankedChunk,
};

/// Knobs the facade needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct RetrieverTuning {
    /// Durable download cache root; corpus files land under
    /// `<cache_dir>/<corpus>/<manifest version>/`.
    pub cache_dir: PathBuf,
    /// Reciprocal rank fusion constant.
    pub fusion_k: u32,
}

impl RetrieverTuning {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            cache_dir: PathBuf::from(&cfg.cache_dir),
            fusion_k: cfg.fusion_k,
        }
    }
}

/// Snapshot of the facade for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RetrieverStatus {
    pub loaded: bool,
    pub version: Option<String>,
    pub corpus_counts: HashMap<String, usize>,
}

// Everything owned while serving searches. Dropped wholesale on close.
struct LoadedCorpora {
    version: String,
    corpora: Vec<Arc<CorpusIndex>>,
}

enum Lifecycle {
    NotLoaded,
    Loading,
    Loaded(LoadedCorpora),
    Closed,
}

/// Process-wide retrieval facade with an explicit lifecycle:
/// `NotLoaded → Loading → Loaded → Closed`.
///
/// `search` only succeeds in `Loaded`. Loading happens under the state
/// write lock, so concurrent first requests wait for the one in-flight
/// load instead of racing to download the same artifacts; a failed load
/// falls back to `NotLoaded` and never leaves partial state behind.
pub struct Retriever {
    storage: StorageManager,
    embedder: Arc<EmbeddingProvider>,
    tuning: RetrieverTuning,
    state: RwLock<Lifecycle>,
}

impl Retriever {
    pub fn new(
        storage: StorageManager,
        embedder: Arc<EmbeddingProvider>,
        tuning: RetrieverTuning,
    ) -> Self {
        Self {
            storage,
            embedder,
            tuning,
            state: RwLock::new(Lifecycle::NotLoaded),
        }
    }

    /// Resolve the manifest and bring every corpus it names into memory.
    ///
    /// Idempotent once loaded; fails after `close`.
    #[instrument(skip_all, fields(manifest_key))]
    pub async fn load(&self, manifest_key: &str) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        match &*state {
            Lifecycle::Loaded(_) => {
                debug!("retriever already loaded");
                return Ok(());
            }
            Lifecycle::Closed => return Err(AppError::NotLoaded),
            Lifecycle::NotLoaded | Lifecycle::Loading => {}
        }
        *state = Lifecycle::Loading;

        match self.load_corpora(manifest_key).await {
            Ok(loaded) => {
                info!(
                    version = %loaded.version,
                    corpora = loaded.corpora.len(),
                    "retriever loaded"
                );
                *state = Lifecycle::Loaded(loaded);
                Ok(())
            }
            Err(e) => {
                *state = Lifecycle::NotLoaded;
                Err(e)
            }
        }
    }

    async fn load_corpora(&self, manifest_key: &str) -> Result<LoadedCorpora, AppError> {
        let manifest = Manifest::fetch(&self.storage, manifest_key).await?;

        let mut corpora = Vec::with_capacity(manifest.corpora.len());
        for (name, entry) in &manifest.corpora {
            let started = Instant::now();
            let corpus = CorpusIndex::load(
                &self.storage,
                &self.tuning.cache_dir,
                &manifest.version,
                name,
                entry,
            )
            .await?;
            debug!(
                corpus = %name,
                elapsed_ms = started.elapsed().as_millis(),
                "corpus ready"
            );
            corpora.push(Arc::new(corpus));
        }

        Ok(LoadedCorpora {
            version: manifest.version,
            corpora,
        })
    }

    /// Search every loaded corpus and fuse the rankings into one list.
    ///
    /// The fused list is returned untruncated; callers apply any display
    /// cap. A whitespace-only query yields an empty list rather than an
    /// error.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RankedChunk>, AppError> {
        self.search_with_metrics(query, top_k)
            .await
            .map(|output| output.results)
    }

    /// Like [`search`](Self::search), but also returns stage timings and
    /// degradation counters for the run.
    #[instrument(skip_all, fields(top_k))]
    pub async fn search_with_metrics(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<SearchRunOutput, AppError> {
        let state = self.state.read().await;
        let Lifecycle::Loaded(loaded) = &*state else {
            return Err(AppError::NotLoaded);
        };

        if query.trim().is_empty() {
            debug!("empty query, returning no results");
            return Ok(SearchRunOutput {
                results: Vec::new(),
                diagnostics: pipeline::SearchDiagnostics::default(),
                stage_timings: pipeline::SearchStageTimings::default(),
            });
        }

        let preview: String = query.chars().take(50).collect::<String>().replace('\n', " ");
        let output = pipeline::run_search(
            Arc::clone(&self.embedder),
            loaded.corpora.clone(),
            query.to_owned(),
            top_k,
            self.tuning.fusion_k,
        )
        .await?;

        if output.diagnostics.missing_mappings > 0 || output.diagnostics.missing_docs > 0 {
            warn!(
                missing_mappings = output.diagnostics.missing_mappings,
                missing_docs = output.diagnostics.missing_docs,
                "search degraded by unresolved chunk mappings"
            );
        }
        debug!(
            preview = %preview,
            fused_count = output.results.len(),
            timings = ?output.stage_timings,
            "search complete"
        );

        Ok(output)
    }

    pub async fn status(&self) -> RetrieverStatus {
        let state = self.state.read().await;
        match &*state {
            Lifecycle::Loaded(loaded) => RetrieverStatus {
                loaded: true,
                version: Some(loaded.version.clone()),
                corpus_counts: loaded
                    .corpora
                    .iter()
                    .map(|corpus| (corpus.name().to_owned(), corpus.declared_count()))
                    .collect(),
            },
            _ => RetrieverStatus {
                loaded: false,
                version: None,
                corpus_counts: HashMap::new(),
            },
        }
    }

    /// Release every index and map. Terminal: the facade cannot be loaded
    /// again afterwards.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        *state = Lifecycle::Closed;
        info!("retriever closed");
    }
}
