//! Property tests for flat index search and batched embedding alignment.

use std::sync::Arc;

use async_trait::async_trait;
use docrag::{Embedder, EmbeddingProvider, FlatL2Index, similarity};
use proptest::prelude::*;

fn arb_vectors(dim: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    proptest::collection::vec(proptest::collection::vec(-10.0f32..10.0, dim), 0..40)
}

fn brute_force(vectors: &[Vec<f32>], query: &[f32]) -> Vec<f32> {
    let mut distances: Vec<f32> = vectors
        .iter()
        .map(|v| v.iter().zip(query).map(|(a, b)| (a - b) * (a - b)).sum())
        .collect();
    distances.sort_by(f32::total_cmp);
    distances
}

/// **Flat index search ordering**
/// *For any* set of vectors and query, search returns `min(k, n)` hits in
/// ascending distance order, equal to the brute-force nearest distances.
mod prop_search_ordering {
    use super::*;

    const DIM: usize = 8;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn hits_are_the_k_nearest_in_order(
            vectors in arb_vectors(DIM),
            query in proptest::collection::vec(-10.0f32..10.0, DIM),
            k in 0usize..50,
        ) {
            let index = FlatL2Index::build(DIM, vectors.iter().map(Vec::as_slice)).unwrap();
            let hits = index.search(&query, k).unwrap();

            prop_assert_eq!(hits.len(), k.min(vectors.len()));
            for pair in hits.windows(2) {
                prop_assert!(
                    pair[0].distance < pair[1].distance
                        || (pair[0].distance == pair[1].distance && pair[0].index < pair[1].index)
                );
            }

            let expected = brute_force(&vectors, &query);
            for (hit, distance) in hits.iter().zip(&expected) {
                prop_assert_eq!(hit.distance, *distance);
                prop_assert!(similarity(hit.distance) > 0.0 && similarity(hit.distance) <= 1.0);
            }
        }
    }
}

/// Returns the input's numeric value so output order can be checked.
struct EchoProvider;

#[async_trait]
impl EmbeddingProvider for EchoProvider {
    async fn embed(&self, text: &str) -> docrag::Result<Vec<f32>> {
        Ok(vec![text.parse().unwrap_or(f32::NAN)])
    }

    fn dimensions(&self) -> usize {
        1
    }

    fn model(&self) -> &str {
        "echo"
    }
}

/// **Embedding alignment**
/// *For any* input count and batch size, the embedder returns one vector per
/// input, in input order.
mod prop_embedding_alignment {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn one_vector_per_input_in_order(count in 0usize..300, batch_size in 1usize..120) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let vectors = rt.block_on(async {
                let embedder = Embedder::new(Arc::new(EchoProvider), batch_size).unwrap();
                let texts: Vec<String> = (0..count).map(|i| i.to_string()).collect();
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                embedder.embed(&refs).await.unwrap()
            });

            prop_assert_eq!(vectors.len(), count);
            for (i, vector) in vectors.iter().enumerate() {
                prop_assert_eq!(vector, &vec![i as f32]);
            }
        }
    }
}
