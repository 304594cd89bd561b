use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::RankedChunk;

/// Standard dampening constant from the RRF literature; larger values
/// flatten the difference between ranks.
pub const DEFAULT_RRF_K: u32 = 60;

/// Combine per-corpus ranked lists into one list using Reciprocal Rank
/// Fusion.
///
/// Each item contributes `1 / (k + rank)` per list it appears in, with
/// 1-based ranks. Identity is `(corpus, chunk_id)` — the same chunk id in
/// two corpora stays two results. The surviving record (text, metadata,
/// corpus-local similarity) comes from the item's first occurrence across
/// the lists in list order; only `fused` is rewritten. The output is sorted
/// by fused score descending, and the stable sort keeps first-occurrence
/// order for equal scores.
///
/// Being rank-based, the fused ordering is insensitive to the incomparable
/// similarity scales different corpora produce.
pub fn reciprocal_rank_fusion(ranked_lists: Vec<Vec<RankedChunk>>, k: u32) -> Vec<RankedChunk> {
    if ranked_lists.is_empty() {
        return Vec::new();
    }

    let damp = k.max(1) as f32;

    let mut score_map: HashMap<(String, String), f32> = HashMap::new();
    for list in &ranked_lists {
        for (position, item) in list.iter().enumerate() {
            let rank = (position + 1) as f32;
            let key = (item.corpus.clone(), item.chunk_id.clone());
            *score_map.entry(key).or_insert(0.0) += 1.0 / (damp + rank);
        }
    }

    let input_lists = ranked_lists.len();
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(score_map.len());
    let mut fused_items: Vec<RankedChunk> = Vec::with_capacity(score_map.len());

    for list in ranked_lists {
        for mut item in list {
            let key = (item.corpus.clone(), item.chunk_id.clone());
            if seen.insert(key.clone()) {
                item.fused = score_map.get(&key).copied().unwrap_or_default();
                fused_items.push(item);
            }
        }
    }

    fused_items.sort_by(|a, b| b.fused.partial_cmp(&a.fused).unwrap_or(Ordering::Equal));

    debug!(
        input_lists,
        total_items = fused_items.len(),
        k,
        "fusion complete"
    );

    fused_items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(corpus: &str, chunk_id: &str) -> RankedChunk {
        RankedChunk {
            corpus: corpus.to_string(),
            chunk_id: chunk_id.to_string(),
            similarity: 0.0,
            fused: 0.0,
            text: String::new(),
            metadata: serde_json::Map::new(),
        }
    }

    fn chunk_with_text(corpus: &str, chunk_id: &str, similarity: f32, text: &str) -> RankedChunk {
        RankedChunk {
            similarity,
            text: text.to_string(),
            ..chunk(corpus, chunk_id)
        }
    }

    fn keys(fused: &[RankedChunk]) -> Vec<(&str, &str)> {
        fused
            .iter()
            .map(|item| (item.corpus.as_str(), item.chunk_id.as_str()))
            .collect()
    }

    #[test]
    fn empty_inputs_fuse_to_nothing() {
        assert!(reciprocal_rank_fusion(Vec::new(), DEFAULT_RRF_K).is_empty());
        assert!(reciprocal_rank_fusion(vec![Vec::new()], DEFAULT_RRF_K).is_empty());
        assert!(reciprocal_rank_fusion(vec![Vec::new(), Vec::new()], DEFAULT_RRF_K).is_empty());
    }

    #[test]
    fn single_list_keeps_order_with_descending_scores() {
        let list = vec![
            chunk("pdf", "chunk_1"),
            chunk("pdf", "chunk_2"),
            chunk("pdf", "chunk_3"),
        ];

        let fused = reciprocal_rank_fusion(vec![list], DEFAULT_RRF_K);

        assert_eq!(
            keys(&fused),
            [("pdf", "chunk_1"), ("pdf", "chunk_2"), ("pdf", "chunk_3")]
        );
        assert!(fused[0].fused > fused[1].fused);
        assert!(fused[1].fused > fused[2].fused);
    }

    #[test]
    fn fusion_is_deterministic_across_reruns() {
        let build = || {
            vec![
                vec![chunk("pdf", "a"), chunk("pdf", "b"), chunk("pdf", "c")],
                vec![chunk("sas", "x"), chunk("pdf", "b"), chunk("sas", "y")],
            ]
        };

        let first = reciprocal_rank_fusion(build(), DEFAULT_RRF_K);
        let second = reciprocal_rank_fusion(build(), DEFAULT_RRF_K);

        assert_eq!(keys(&first), keys(&second));
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.fused, b.fused);
        }
    }

    #[test]
    fn item_in_every_list_outranks_single_list_items() {
        // (pdf, shared) sits at rank 1 in both lists; every other item
        // appears once.
        let list_a = vec![chunk("pdf", "shared"), chunk("pdf", "a2")];
        let list_b = vec![chunk("pdf", "shared"), chunk("pdf", "b2")];

        let fused = reciprocal_rank_fusion(vec![list_a, list_b], DEFAULT_RRF_K);

        assert_eq!(fused[0].chunk_id, "shared");
        for other in fused.iter().skip(1) {
            assert!(fused[0].fused > other.fused);
        }
    }

    #[test]
    fn contributions_add_exactly_across_lists() {
        let list_a = vec![chunk("pdf", "c2"), chunk("pdf", "c1")];
        let list_b = vec![chunk("sas", "c2"), chunk("sas", "c1")];

        let fused = reciprocal_rank_fusion(vec![list_a, list_b], DEFAULT_RRF_K);

        // Four distinct keys; a shared chunk id across corpora is never
        // merged, so each key carries exactly its own list's contribution.
        assert_eq!(fused.len(), 4);
        let rank1 = 1.0 / 61.0_f32;
        let rank2 = 1.0 / 62.0_f32;
        assert_eq!(keys(&fused), [
            ("pdf", "c2"),
            ("sas", "c2"),
            ("pdf", "c1"),
            ("sas", "c1")
        ]);
        assert_eq!(fused[0].fused, rank1);
        assert_eq!(fused[1].fused, rank1);
        assert_eq!(fused[2].fused, rank2);
        assert_eq!(fused[3].fused, rank2);
    }

    #[test]
    fn repeated_item_in_two_lists_sums_both_ranks() {
        let list_a = vec![chunk("pdf", "c2"), chunk("pdf", "c1")];
        let list_b = vec![chunk("pdf", "c2")];

        let fused = reciprocal_rank_fusion(vec![list_a, list_b], DEFAULT_RRF_K);

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].chunk_id, "c2");
        assert_eq!(fused[0].fused, 1.0 / 61.0 + 1.0 / 61.0);
        assert_eq!(fused[1].fused, 1.0 / 62.0);
    }

    #[test]
    fn duplicate_key_keeps_first_occurrence_record() {
        let list_a = vec![chunk_with_text("pdf", "chunk_1", 0.92, "from the pdf list")];
        let list_b = vec![chunk_with_text("pdf", "chunk_1", 0.31, "from the other list")];

        let fused = reciprocal_rank_fusion(vec![list_a, list_b], DEFAULT_RRF_K);

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].text, "from the pdf list");
        assert_eq!(fused[0].similarity, 0.92);
        assert_eq!(fused[0].fused, 2.0 / 61.0);
    }

    #[test]
    fn same_chunk_id_in_different_corpora_stays_distinct() {
        let list_a = vec![chunk("pdf", "chunk_1")];
        let list_b = vec![chunk("sas", "chunk_1")];

        let fused = reciprocal_rank_fusion(vec![list_a, list_b], DEFAULT_RRF_K);

        assert_eq!(fused.len(), 2);
        assert_eq!(keys(&fused), [("pdf", "chunk_1"), ("sas", "chunk_1")]);
    }

    #[test]
    fn smaller_k_spreads_rank_scores_further_apart() {
        let build = || vec![vec![chunk("pdf", "first"), chunk("pdf", "second")]];

        let wide = reciprocal_rank_fusion(build(), 10);
        let flat = reciprocal_rank_fusion(build(), DEFAULT_RRF_K);

        let wide_gap = wide[0].fused - wide[1].fused;
        let flat_gap = flat[0].fused - flat[1].fused;
        assert!(wide_gap > flat_gap);
    }
}
