//! Multi-corpus retrieval core: versioned corpus loading, exact
//! inner-product search, and reciprocal rank fusion behind a lifecycle-aware
//! facade.

pub mod corpus;
pub mod fusion;
pub mod index;
pub mod manifest;
pub mod pipeline;
pub mod retriever;

use serde::Serialize;

/// One retrieval hit, identified by `(corpus, chunk_id)`.
///
/// The corpus-local similarity and the cross-corpus fused score are kept as
/// separate fields so downstream citations never confuse the two.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub corpus: String,
    pub chunk_id: String,
    /// Inner-product similarity from first-stage search within one corpus.
    pub similarity: f32,
    /// Reciprocal-rank-fusion score; zero until fusion has run.
    pub fused: f32,
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
