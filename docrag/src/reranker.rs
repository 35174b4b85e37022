//! Lexical reranking of retrieval candidates.

use crate::document::RetrievalResult;
use crate::keyword::word_set;

/// Boosts each candidate by `boost` for every distinct query word it
/// contains, then re-sorts by descending score.
///
/// Deterministic for a given query and candidate list: equal scores keep
/// their incoming order.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::KeywordBoostReranker;
///
/// let reranked = KeywordBoostReranker::new(0.05).rerank("vector search", results);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordBoostReranker {
    boost: f32,
}

impl Default for KeywordBoostReranker {
    fn default() -> Self {
        Self { boost: 0.05 }
    }
}

impl KeywordBoostReranker {
    pub fn new(boost: f32) -> Self {
        Self { boost }
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn rerank(&self, query: &str, mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        let query_words = word_set(query);
        for result in &mut results {
            let overlap = query_words.intersection(&word_set(&result.content)).count();
            result.score += overlap as f32 * self.boost;
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(content: &str, score: f32) -> RetrievalResult {
        RetrievalResult {
            id: content.to_string(),
            content: content.to_string(),
            score,
            metadata: Default::default(),
        }
    }

    #[test]
    fn boosts_matching_results_above_higher_similarity() {
        let results = vec![
            result("Python is great for data science", 0.5),
            result("Rust vector database with similarity search", 0.4),
        ];
        let reranked = KeywordBoostReranker::new(0.1).rerank("vector database search", results);

        assert_eq!(reranked[0].content, "Rust vector database with similarity search");
        assert!((reranked[0].score - 0.7).abs() < 1e-6);
        assert!((reranked[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn repeated_words_count_once() {
        let results = vec![result("cache cache cache", 0.0)];
        let reranked = KeywordBoostReranker::default().rerank("cache cache", results);
        assert!((reranked[0].score - 0.05).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_incoming_order() {
        let results = vec![result("a", 0.3), result("b", 0.3), result("c", 0.3)];
        let reranked = KeywordBoostReranker::default().rerank("zzz", results);
        let ids: Vec<&str> = reranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }
}
