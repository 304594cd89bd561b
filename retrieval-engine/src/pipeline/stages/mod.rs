use std::sync::Arc;

use anyhow::anyhow;
use common::{error::AppError, utils::embedding::EmbeddingProvider};
use state_machines::core::GuardError;
use tracing::{debug, instrument};

use crate::{
    corpus::CorpusIndex, fusion::reciprocal_rank_fusion, index::normalize_l2, RankedChunk,
};

use super::{
    state::{Embedded, Fused, Ready, Searched, SearchMachine},
    SearchDiagnostics,
};

/// Mutable state threaded through one search invocation.
pub struct SearchContext {
    pub embedder: Arc<EmbeddingProvider>,
    pub corpora: Vec<Arc<CorpusIndex>>,
    pub query: String,
    pub top_k: usize,
    pub fusion_k: u32,
    pub query_vector: Option<Vec<f32>>,
    pub ranked_lists: Vec<Vec<RankedChunk>>,
    pub fused: Vec<RankedChunk>,
    pub diagnostics: SearchDiagnostics,
}

impl SearchContext {
    pub fn new(
        embedder: Arc<EmbeddingProvider>,
        corpora: Vec<Arc<CorpusIndex>>,
        query: String,
        top_k: usize,
        fusion_k: u32,
    ) -> Self {
        Self {
            embedder,
            corpora,
            query,
            top_k,
            fusion_k,
            query_vector: None,
            ranked_lists: Vec::new(),
            fused: Vec::new(),
            diagnostics: SearchDiagnostics::default(),
        }
    }

    fn ensure_query_vector(&self) -> Result<&Vec<f32>, AppError> {
        self.query_vector
            .as_ref()
            .ok_or_else(|| AppError::Internal("query vector missing before corpus search".into()))
    }
}

#[instrument(level = "trace", skip_all)]
pub async fn embed(
    machine: SearchMachine<(), Ready>,
    ctx: &mut SearchContext,
) -> Result<SearchMachine<(), Embedded>, AppError> {
    debug!("generating query embedding");
    let mut vector = ctx.embedder.embed(&ctx.query).await?;
    // Index rows were normalized at build time; the query gets the same
    // treatment so inner products read as cosine similarity.
    normalize_l2(&mut vector);
    ctx.query_vector = Some(vector);

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", guard))
}

#[instrument(level = "trace", skip_all)]
pub async fn search_corpora(
    machine: SearchMachine<(), Embedded>,
    ctx: &mut SearchContext,
) -> Result<SearchMachine<(), Searched>, AppError> {
    let vector = Arc::new(ctx.ensure_query_vector()?.clone());

    for corpus in &ctx.corpora {
        if corpus.dimension() != vector.len() {
            return Err(AppError::Embedding(anyhow!(
                "query embedding width {} does not match corpus '{}' dimension {}",
                vector.len(),
                corpus.name(),
                corpus.dimension()
            )));
        }
    }

    // Corpora are independent once loaded; scan them on the blocking pool
    // and collect in spawn order so fusion input order stays deterministic.
    let mut handles = Vec::with_capacity(ctx.corpora.len());
    for corpus in &ctx.corpora {
        let corpus = Arc::clone(corpus);
        let vector = Arc::clone(&vector);
        let top_k = ctx.top_k;
        handles.push(tokio::task::spawn_blocking(move || {
            corpus.rank(&vector, top_k)
        }));
    }

    for handle in handles {
        let outcome = handle.await?;
        ctx.diagnostics.missing_mappings += outcome.missing_mappings;
        ctx.diagnostics.missing_docs += outcome.missing_docs;
        ctx.ranked_lists.push(outcome.chunks);
    }

    debug!(
        corpora = ctx.ranked_lists.len(),
        candidates = ctx.ranked_lists.iter().map(Vec::len).sum::<usize>(),
        "per-corpus search complete"
    );

    machine
        .search_corpora()
        .map_err(|(_, guard)| map_guard_error("search_corpora", guard))
}

#[instrument(level = "trace", skip_all)]
pub fn fuse(
    machine: SearchMachine<(), Searched>,
    ctx: &mut SearchContext,
) -> Result<SearchMachine<(), Fused>, AppError> {
    let ranked_lists = std::mem::take(&mut ctx.ranked_lists);
    ctx.fused = reciprocal_rank_fusion(ranked_lists, ctx.fusion_k);

    machine
        .fuse()
        .map_err(|(_, guard)| map_guard_error("fuse", guard))
}

#[instrument(level = "trace", skip_all)]
pub fn assemble(
    machine: SearchMachine<(), Fused>,
    ctx: &mut SearchContext,
) -> Result<Vec<RankedChunk>, AppError> {
    machine
        .assemble()
        .map_err(|(_, guard)| map_guard_error("assemble", guard))?;
    Ok(std::mem::take(&mut ctx.fused))
}

fn map_guard_error(stage: &'static str, err: GuardError) -> AppError {
    AppError::Internal(format!(
        "state machine guard '{stage}' failed: guard={}, event={}, kind={:?}",
        err.guard, err.event, err.kind
    ))
}
