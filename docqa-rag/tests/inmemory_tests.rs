//! Property tests for in-memory index search ordering and score normalization.

use std::collections::HashMap;

use docqa_rag::document::{MAX_TOP_K, SearchMode, SearchSpec};
use docqa_rag::index::DocumentIndex;
use docqa_rag::inmemory::{InMemoryIndex, IndexedChunk};
use proptest::prelude::*;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map("non-zero embedding", |mut v| {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < 1e-8 {
            return None;
        }
        for val in &mut v {
            *val /= norm;
        }
        Some(v)
    })
}

fn arb_chunk(dim: usize) -> impl Strategy<Value = IndexedChunk> {
    ("[a-z]{3,8}", "[a-z ]{5,30}", arb_normalized_embedding(dim)).prop_map(
        |(id, text, embedding)| IndexedChunk::new(id, text, embedding).with_field("filename", "doc.pdf"),
    )
}

fn dedup(chunks: Vec<IndexedChunk>) -> Vec<IndexedChunk> {
    let mut unique: HashMap<String, IndexedChunk> = HashMap::new();
    for chunk in chunks {
        unique.entry(chunk.id.clone()).or_insert(chunk);
    }
    unique.into_values().collect()
}

/// Searching an [`InMemoryIndex`] returns at most `top_k` chunks, ordered by
/// descending score, with every exposed score in `[0, 1]`.
mod prop_inmemory_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn vector_results_ordered_bounded_and_normalized(
            chunks in proptest::collection::vec(arb_chunk(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
            threshold in 0.0f32..1.0,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, unique_count) = rt.block_on(async {
                let index = InMemoryIndex::new();
                let unique = dedup(chunks);
                let count = unique.len();
                index.upsert(unique).await;
                let results = index.search(&SearchSpec::vector(top_k, threshold), &query).await.unwrap();
                (results, count)
            });

            prop_assert!(results.len() <= top_k.min(MAX_TOP_K));
            prop_assert!(results.len() <= unique_count);

            for chunk in &results {
                prop_assert!((0.0..=1.0).contains(&chunk.score), "score out of range: {}", chunk.score);
                prop_assert!(chunk.raw_score >= threshold);
            }

            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }

        #[test]
        fn keyword_scores_are_relative_to_the_best_hit(
            chunks in proptest::collection::vec(arb_chunk(DIM), 1..20),
            term in "[a-z]{1,2}",
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let results = rt.block_on(async {
                let index = InMemoryIndex::new();
                index.upsert(dedup(chunks)).await;
                let spec = SearchSpec::vector(MAX_TOP_K, 0.0).with_mode(SearchMode::Keyword { text: term });
                index.search(&spec, &[]).await.unwrap()
            });

            if let Some(best) = results.first() {
                prop_assert!((best.score - 1.0).abs() < 1e-6);
            }
            for chunk in &results {
                prop_assert!(chunk.score > 0.0 && chunk.score <= 1.0);
            }
        }
    }
}
