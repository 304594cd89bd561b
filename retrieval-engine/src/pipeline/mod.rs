mod stages;
mod state;

use std::sync::Arc;
use std::time::Instant;

use common::{error::AppError, utils::embedding::EmbeddingProvider};

use crate::{corpus::CorpusIndex, RankedChunk};

/// Fused results of one search plus observability for the run.
#[derive(Debug)]
pub struct SearchRunOutput {
    pub results: Vec<RankedChunk>,
    pub diagnostics: SearchDiagnostics,
    pub stage_timings: SearchStageTimings,
}

/// Counters for the recoverable degradations of a single search, so silent
/// data loss stays visible to callers and tests.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SearchDiagnostics {
    pub missing_mappings: usize,
    pub missing_docs: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SearchStageTimings {
    pub embed_ms: u128,
    pub search_ms: u128,
    pub fuse_ms: u128,
}

/// Drives one search from query embedding through fused assembly.
pub(crate) async fn run_search(
    embedder: Arc<EmbeddingProvider>,
    corpora: Vec<Arc<CorpusIndex>>,
    query: String,
    top_k: usize,
    fusion_k: u32,
) -> Result<SearchRunOutput, AppError> {
    let mut ctx = stages::SearchContext::new(embedder, corpora, query, top_k, fusion_k);
    let mut timings = SearchStageTimings::default();

    let machine = state::ready();

    let started = Instant::now();
    let machine = stages::embed(machine, &mut ctx).await?;
    timings.embed_ms = started.elapsed().as_millis();

    let started = Instant::now();
    let machine = stages::search_corpora(machine, &mut ctx).await?;
    timings.search_ms = started.elapsed().as_millis();

    let started = Instant::now();
    let machine = stages::fuse(machine, &mut ctx)?;
    let results = stages::assemble(machine, &mut ctx)?;
    timings.fuse_ms = started.elapsed().as_millis();

    Ok(SearchRunOutput {
        results,
        diagnostics: ctx.diagnostics,
        stage_timings: timings,
    })
}
