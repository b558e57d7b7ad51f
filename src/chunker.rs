//! Overlap-aware recursive text chunking.
//!
//! Splits a source document into [`DocumentChunk`]s by trying a prioritized
//! list of separators, hard-slicing at character boundaries once the list is
//! exhausted, greedily merging adjacent pieces back up to the chunk size,
//! and finally carrying the trailing overlap of each chunk into the next.
//!
//! The chunker works on character spans over the original text, so every
//! chunk is an exact slice of the source: offsets are byte offsets that
//! always fall on UTF-8 character boundaries, and no content is ever
//! dropped or rewritten. The same input always produces the same chunks,
//! which is what makes re-ingestion idempotent.

use std::collections::HashMap;
use std::ops::Range;

use crate::error::{LlmError, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive chunks, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Default separator priority list: section breaks, paragraphs, lines, words.
pub fn default_separators() -> Vec<String> {
    vec![
        "\n---\n".to_string(),
        "\n\n".to_string(),
        "\n".to_string(),
        " ".to_string(),
    ]
}

/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Target maximum chunk length in characters.
    pub chunk_size: usize,

    /// Characters carried from the end of each chunk into the next.
    pub chunk_overlap: usize,

    /// Separators tried in priority order; may be empty to slice directly.
    pub separators: Vec<String>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: default_separators(),
        }
    }
}

/// A bounded span of text from one source document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    /// The chunk text, an exact slice of the source.
    pub content: String,

    /// Identifier of the source document.
    pub source_id: String,

    /// Position of this chunk within its source.
    pub sequence_index: usize,

    /// Byte offset of the chunk start in the source (on a char boundary).
    pub start_offset: usize,

    /// Byte offset one past the chunk end in the source.
    pub end_offset: usize,

    /// Optional caller-supplied metadata.
    pub metadata: HashMap<String, String>,
}

impl DocumentChunk {
    /// A stable identifier within one ingestion: source id plus position.
    pub fn chunk_id(&self) -> String {
        format!("{}#{}", self.source_id, self.sequence_index)
    }
}

/// Split `text` into overlapping chunks attributed to `source_id`.
///
/// Empty input yields zero chunks. `chunk_overlap >= chunk_size` is a
/// configuration error.
pub fn chunk(source_id: &str, text: &str, config: &ChunkConfig) -> Result<Vec<DocumentChunk>> {
    if config.chunk_overlap >= config.chunk_size {
        return Err(LlmError::InvalidRequest(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            config.chunk_overlap, config.chunk_size
        )));
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every character boundary; bounds[i] is the offset of
    // the i-th character, bounds[char_count] == text.len().
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;

    let mut pieces = Vec::new();
    split_span(
        text,
        &bounds,
        0..char_count,
        &config.separators,
        config.chunk_size,
        &mut pieces,
    );

    let merged = merge_spans(pieces, config.chunk_size);

    let mut chunks = Vec::with_capacity(merged.len());
    let mut prev_end: Option<usize> = None;
    for (i, span) in merged.into_iter().enumerate() {
        let mut start = span.start;
        if let Some(pe) = prev_end {
            if config.chunk_overlap > 0 {
                let carry_start = pe.saturating_sub(config.chunk_overlap);
                let suffix = &text[bounds[carry_start]..bounds[pe]];
                let piece = &text[bounds[span.start]..bounds[span.end]];
                // The carried suffix is skipped when the piece already opens
                // with exactly that text; the overlap property holds either way.
                if !piece.starts_with(suffix) {
                    start = carry_start;
                }
            }
        }

        chunks.push(DocumentChunk {
            content: text[bounds[start]..bounds[span.end]].to_string(),
            source_id: source_id.to_string(),
            sequence_index: i,
            start_offset: bounds[start],
            end_offset: bounds[span.end],
            metadata: HashMap::new(),
        });
        prev_end = Some(span.end);
    }

    Ok(chunks)
}

/// Recursively split a character span until every piece fits `size`.
fn split_span(
    text: &str,
    bounds: &[usize],
    span: Range<usize>,
    separators: &[String],
    size: usize,
    out: &mut Vec<Range<usize>>,
) {
    if span.is_empty() {
        return;
    }
    if span.len() <= size {
        out.push(span);
        return;
    }

    let Some((sep, rest)) = separators.split_first() else {
        hard_slice(span, size, out);
        return;
    };

    let slice = &text[bounds[span.start]..bounds[span.end]];
    let sep_chars = sep.chars().count();
    if sep.is_empty() || !slice.contains(sep.as_str()) {
        split_span(text, bounds, span, rest, size, out);
        return;
    }

    let slice_base = bounds[span.start];
    let mut cursor = span.start;
    for (byte_pos, _) in slice.match_indices(sep.as_str()) {
        let at = char_index(bounds, slice_base + byte_pos);
        if at >= cursor {
            split_span(text, bounds, cursor..at, rest, size, out);
        }
        cursor = at + sep_chars;
    }
    if cursor < span.end {
        split_span(text, bounds, cursor..span.end, rest, size, out);
    }
}

/// Slice an oversize span into `size`-character pieces. The final piece may
/// be shorter; nothing is dropped.
fn hard_slice(span: Range<usize>, size: usize, out: &mut Vec<Range<usize>>) {
    let mut start = span.start;
    while start < span.end {
        let end = (start + size).min(span.end);
        out.push(start..end);
        start = end;
    }
}

/// Greedily merge adjacent spans while the combined span (including any
/// separator text between them) stays within `size`.
fn merge_spans(pieces: Vec<Range<usize>>, size: usize) -> Vec<Range<usize>> {
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        match merged.last_mut() {
            Some(last) if piece.end - last.start <= size => {
                last.end = piece.end;
            }
            _ => merged.push(piece),
        }
    }
    merged
}

/// Map a byte offset back to its character index via the boundary table.
fn char_index(bounds: &[usize], byte_offset: usize) -> usize {
    bounds
        .binary_search(&byte_offset)
        .expect("separator match must start on a char boundary")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(size: usize, overlap: usize, separators: &[&str]) -> ChunkConfig {
        ChunkConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            separators: separators.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunk("doc1", "", &ChunkConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = chunk("doc1", "hello", &cfg(100, 100, &[])).unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
        let err = chunk("doc1", "hello", &cfg(100, 150, &[])).unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[test]
    fn small_text_is_one_chunk() {
        let chunks = chunk("doc1", "Hello, world!", &ChunkConfig::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].sequence_index, 0);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 13);
        assert_eq!(chunks[0].source_id, "doc1");
    }

    #[test]
    fn uniform_text_hard_slices_to_expected_lengths() {
        let text = "A".repeat(2500);
        let chunks = chunk("doc1", &text, &cfg(1000, 200, &[])).unwrap();

        let lengths: Vec<usize> = chunks.iter().map(|c| c.content.chars().count()).collect();
        assert_eq!(lengths, vec![1000, 1000, 500]);

        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .content
                .chars()
                .rev()
                .take(200)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let head: String = pair[1].content.chars().take(200).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn overlap_carries_previous_tail_on_distinct_text() {
        // Non-repeating text: four-digit counters.
        let text: String = (0..300).map(|i| format!("{i:04}")).collect();
        let chunks = chunk("doc1", &text, &cfg(100, 20, &[])).unwrap();

        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let tail = &pair[0].content[pair[0].content.len() - 20..];
            let head = &pair[1].content[..20];
            assert_eq!(tail, head);
        }
        for c in &chunks {
            assert!(c.content.chars().count() <= 100 + 20);
            assert!(c.end_offset > c.start_offset);
        }
    }

    #[test]
    fn splits_on_paragraphs_before_slicing() {
        let text = "First paragraph, short.\n\nSecond paragraph, also short.\n\nThird one.";
        let chunks = chunk("doc1", text, &cfg(30, 5, &["\n\n", " "])).unwrap();

        assert!(chunks.len() >= 3);
        // Chunk content is always a slice of the source.
        for c in &chunks {
            assert_eq!(&text[c.start_offset..c.end_offset], c.content);
        }
    }

    #[test]
    fn adjacent_small_pieces_merge_up_to_size() {
        let text = "one two three four five six seven eight";
        let chunks = chunk("doc1", text, &cfg(1000, 0, &[" "])).unwrap();
        // Everything fits one chunk after merging, separators included.
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
    }

    #[test]
    fn long_word_is_sliced_at_character_boundaries_without_loss() {
        let long_word = "x".repeat(250);
        let text = format!("short {long_word} tail");
        let chunks = chunk("doc1", &text, &cfg(100, 10, &[" "])).unwrap();

        // Recover full coverage of the long word across chunks.
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(joined.contains(&long_word[..100]));
        let total: usize = chunks
            .iter()
            .map(|c| c.end_offset - c.start_offset)
            .sum();
        assert!(total >= text.len());
        for c in &chunks {
            assert!(c.content.chars().count() <= 100 + 10);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta. ".repeat(40);
        let config = cfg(120, 30, &["\n\n", "\n", " "]);
        let a = chunk("doc1", &text, &config).unwrap();
        let b = chunk("doc1", &text, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sequence_indices_are_contiguous() {
        let text = "word ".repeat(500);
        let chunks = chunk("doc1", &text, &cfg(100, 20, &[" "])).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.sequence_index, i);
        }
    }

    #[test]
    fn multibyte_text_slices_on_char_boundaries() {
        let text = "héllo wörld ünïcödé ".repeat(30);
        let chunks = chunk("doc1", &text, &cfg(40, 8, &[" "])).unwrap();
        for c in &chunks {
            // Offsets must be valid slice bounds.
            assert_eq!(&text[c.start_offset..c.end_offset], c.content);
        }
    }

    #[test]
    fn section_separator_takes_priority() {
        let text = format!("{}\n---\n{}", "a".repeat(40), "b".repeat(40));
        let chunks = chunk("doc1", &text, &cfg(50, 0, &["\n---\n", "\n", " "])).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "a".repeat(40));
        assert_eq!(chunks[1].content, "b".repeat(40));
    }

    #[test]
    fn chunk_id_combines_source_and_index() {
        let chunks = chunk("paper-7", "hello world", &ChunkConfig::default()).unwrap();
        assert_eq!(chunks[0].chunk_id(), "paper-7#0");
    }
}
