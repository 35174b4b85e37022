//! Property tests for chunk offsets, ordering and coverage.

use docrag::chunking::{Chunker, CodeAwareChunker, FixedSizeChunker, SemanticChunker};
use docrag::document::{Chunk, Document};
use proptest::prelude::*;

/// Text made of words, sentence ends, blank lines and headings.
fn arb_text() -> impl Strategy<Value = String> {
    let piece = prop_oneof![
        4 => "[a-zé]{1,9}",
        2 => Just(" ".to_string()),
        1 => Just(". ".to_string()),
        1 => Just("\n".to_string()),
        1 => Just("\n\n".to_string()),
        1 => Just("\n## ".to_string()),
        1 => Just("\nfn ".to_string()),
    ];
    proptest::collection::vec(piece, 0..200).prop_map(|pieces| pieces.concat())
}

fn assert_well_formed(document: &Document, chunks: &[Chunk]) -> Result<(), TestCaseError> {
    let text = document.text.as_str();
    for (i, chunk) in chunks.iter().enumerate() {
        prop_assert!(!chunk.content.trim().is_empty());
        prop_assert_eq!(&text[chunk.start_index..chunk.end_index], chunk.content.as_str());
        prop_assert_eq!(&chunk.id, &format!("{}_chunk_{i}", document.id));
        prop_assert_eq!(&chunk.document_id, &document.id);
    }
    for pair in chunks.windows(2) {
        prop_assert!(pair[0].start_index <= pair[1].start_index);
    }

    // Every non-whitespace character lands in at least one chunk.
    for (offset, c) in text.char_indices() {
        if !c.is_whitespace() {
            prop_assert!(
                chunks.iter().any(|ch| ch.start_index <= offset && offset < ch.end_index),
                "character {:?} at byte {} is not covered",
                c,
                offset
            );
        }
    }
    if text.trim().is_empty() {
        prop_assert!(chunks.is_empty());
    } else {
        prop_assert!(!chunks.is_empty());
    }
    Ok(())
}

/// **Fixed-size chunking bounds**
/// *For any* text and valid `(size, overlap)`, every chunk is at most `size`
/// characters and consecutive chunks share at most `overlap` characters.
mod prop_fixed_size {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn chunks_are_bounded_and_cover_the_text(
            text in arb_text(),
            size in 1usize..120,
            overlap_seed in 0usize..120,
        ) {
            let overlap = overlap_seed % size;
            let document = Document::new("doc", text);
            let chunks = FixedSizeChunker::new(size, overlap).unwrap().chunk(&document);

            assert_well_formed(&document, &chunks)?;
            for chunk in &chunks {
                prop_assert!(chunk.content.chars().count() <= size);
            }
            for pair in chunks.windows(2) {
                if pair[1].start_index < pair[0].end_index {
                    let shared_text = &document.text[pair[1].start_index..pair[0].end_index];
                    let shared = shared_text.chars().count();
                    prop_assert!(shared <= overlap, "shared {} > overlap {}", shared, overlap);
                }
            }
        }
    }
}

/// **Structural chunking offsets**
/// *For any* text, the heading-aware and code-aware chunkers return ordered,
/// non-empty chunks whose offsets slice back to their content.
mod prop_structural {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn semantic_chunks_are_well_formed(
            text in arb_text(),
            max in 1usize..200,
            min in 0usize..100,
        ) {
            let document = Document::new("doc", text);
            let chunks = SemanticChunker::new(max, min).unwrap().chunk(&document);
            assert_well_formed(&document, &chunks)?;
        }

        #[test]
        fn code_chunks_are_well_formed(text in arb_text(), max in 1usize..200) {
            let document = Document::new("src", text);
            let chunks = CodeAwareChunker::new(max).unwrap().chunk(&document);
            assert_well_formed(&document, &chunks)?;
            for chunk in &chunks {
                prop_assert_eq!(chunk.metadata.get("type").and_then(|v| v.as_str()), Some("code"));
            }
        }
    }
}
