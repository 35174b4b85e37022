//! Word tokenization and lexical keyword scoring.

use std::collections::HashSet;

use crate::document::ChunkRecord;

/// Lowercase alphanumeric word tokens of `text`, in order, with repeats.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).map(str::to_lowercase)
}

/// The distinct lowercase words of `text`.
pub fn word_set(text: &str) -> HashSet<String> {
    tokenize(text).collect()
}

/// Score every record by the fraction of query words it contains.
///
/// Returns `(record_index, score)` pairs for records matching at least one
/// query word, sorted by descending score (ties keep index order) and capped
/// at `limit`. No IDF weighting or length normalization is applied.
pub fn keyword_scores(query: &str, records: &[ChunkRecord], limit: usize) -> Vec<(usize, f32)> {
    let query_words = word_set(query);
    if query_words.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let content_words = word_set(&record.content);
            let matches = query_words.intersection(&content_words).count();
            (matches > 0).then(|| (index, matches as f32 / query_words.len() as f32))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);
    scored
}
