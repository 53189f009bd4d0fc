//! Boundary-aware sliding window chunker.
//!
//! Each window is cut at the best boundary that keeps at least half of the
//! target size: a paragraph break, then a sentence end, then a line break,
//! then any whitespace. Words are never split.

use super::{normalize_text, Chunker, ChunkingConfig, TextSpan};
use crate::error::{BuddyError, Result};
use tracing::debug;

/// Recursive-separator chunker over normalized text.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    config: ChunkingConfig,
}

impl RecursiveChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(BuddyError::InvalidInput("chunk size must be positive".into()));
        }
        if config.overlap >= config.chunk_size {
            return Err(BuddyError::InvalidInput(format!(
                "overlap ({}) must be smaller than chunk size ({})",
                config.overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    Word,
    Line,
    Sentence,
    Paragraph,
}

/// Classify a cut at `i` (exclusive end). Only valid between a word and whitespace.
fn boundary_at(chars: &[char], i: usize) -> Option<Boundary> {
    if i == 0 || i >= chars.len() {
        return None;
    }
    let prev = chars[i - 1];
    let next = chars[i];
    if prev.is_whitespace() || !next.is_whitespace() {
        return None;
    }

    if next == '\n' && chars.get(i + 1) == Some(&'\n') {
        Some(Boundary::Paragraph)
    } else if matches!(prev, '.' | '?' | '!' | ':' | ';') {
        Some(Boundary::Sentence)
    } else if next == '\n' {
        Some(Boundary::Line)
    } else {
        Some(Boundary::Word)
    }
}

/// Pick the end of a window starting at `start` whose hard limit is `hard_end`.
fn find_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    let floor = start + (hard_end - start) / 2;

    let mut best: Option<(Boundary, usize)> = None;
    for i in (floor.max(start + 1)..=hard_end).rev() {
        if let Some(kind) = boundary_at(chars, i) {
            // Scanning backwards: keep the strongest kind, and the latest position for it.
            if best.map_or(true, |(b, _)| kind > b) {
                best = Some((kind, i));
            }
            if kind == Boundary::Paragraph {
                break;
            }
        }
    }
    if let Some((_, i)) = best {
        return i;
    }

    // No boundary in the upper half: take any earlier word break.
    if let Some(i) = (start + 1..floor).rev().find(|&i| boundary_at(chars, i).is_some()) {
        return i;
    }

    // A single word longer than the window: extend to its end.
    (hard_end..chars.len())
        .find(|&i| chars[i].is_whitespace())
        .unwrap_or(chars.len())
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, raw_text: &str) -> Result<Vec<TextSpan>> {
        let normalized = normalize_text(raw_text);
        if normalized.is_empty() {
            return Err(BuddyError::EmptyDocument);
        }

        let chars: Vec<char> = normalized.chars().collect();
        let n = chars.len();
        let size = self.config.chunk_size;
        let overlap = self.config.overlap;

        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            let end = if n - start <= size {
                n
            } else {
                find_break(&chars, start, start + size)
            };

            spans.push(TextSpan {
                text: chars[start..end].iter().collect(),
                start_offset: start,
                end_offset: end,
            });

            if end >= n {
                break;
            }

            // Step back by the overlap, then forward to the next word start.
            let mut next = end.saturating_sub(overlap).max(start + 1);
            if next > 0 && !chars[next - 1].is_whitespace() {
                while next < end && !chars[next].is_whitespace() {
                    next += 1;
                }
            }
            while next < n && chars[next].is_whitespace() {
                next += 1;
            }
            if next >= n {
                break;
            }

            start = next;
        }

        debug!(
            "Chunked {} chars into {} spans (size {}, overlap {})",
            n,
            spans.len(),
            size,
            overlap
        );
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> RecursiveChunker {
        RecursiveChunker::new(ChunkingConfig {
            chunk_size: size,
            overlap,
        })
        .unwrap()
    }

    fn sample_text() -> String {
        let sentences = [
            "Photosynthesis converts light energy into chemical energy.",
            "Chlorophyll absorbs mostly blue and red light.",
            "The light reactions take place in the thylakoid membranes.",
            "The Calvin cycle fixes carbon dioxide into sugars.",
            "Cellular respiration releases the energy stored in glucose.",
            "Mitochondria are the site of oxidative phosphorylation.",
            "Enzymes lower the activation energy of reactions.",
        ];
        let mut text = String::new();
        for (i, s) in sentences.iter().cycle().take(21).enumerate() {
            text.push_str(s);
            text.push(if i % 7 == 6 { '\n' } else { ' ' });
            if i % 7 == 6 {
                text.push('\n');
            }
        }
        text
    }

    #[test]
    fn test_empty_document() {
        let result = chunker(100, 10).chunk("   \n\n\t ");
        assert!(matches!(result, Err(BuddyError::EmptyDocument)));
    }

    #[test]
    fn test_short_text_single_chunk() {
        let spans = chunker(100, 10).chunk("Short text.").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Short text.");
        assert_eq!((spans[0].start_offset, spans[0].end_offset), (0, 11));
    }

    #[test]
    fn test_offsets_match_normalized_text() {
        let text = sample_text();
        let normalized: Vec<char> = normalize_text(&text).chars().collect();
        let spans = chunker(200, 40).chunk(&text).unwrap();

        for span in &spans {
            let slice: String = normalized[span.start_offset..span.end_offset].iter().collect();
            assert_eq!(slice, span.text);
        }
        assert_eq!(spans.last().unwrap().end_offset, normalized.len());
    }

    #[test]
    fn test_never_splits_words() {
        let text = sample_text();
        let normalized: Vec<char> = normalize_text(&text).chars().collect();
        let spans = chunker(150, 30).chunk(&text).unwrap();

        for span in &spans {
            if span.start_offset > 0 {
                assert!(normalized[span.start_offset - 1].is_whitespace());
            }
            if span.end_offset < normalized.len() {
                assert!(normalized[span.end_offset].is_whitespace());
            }
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let spans = chunker(200, 50).chunk(&sample_text()).unwrap();
        assert!(spans.len() > 2);
        for pair in spans.windows(2) {
            assert!(pair[1].start_offset < pair[0].end_offset);
            assert!(pair[0].end_offset - pair[1].start_offset <= 50);
            assert!(pair[1].start_offset > pair[0].start_offset);
        }
    }

    #[test]
    fn test_prefers_sentence_boundaries() {
        let spans = chunker(200, 0).chunk(&sample_text()).unwrap();
        for span in &spans[..spans.len() - 1] {
            assert!(span.text.ends_with('.'), "chunk ended mid-sentence: {:?}", span.text);
        }
    }

    #[test]
    fn test_long_word_is_kept_whole() {
        let word = "a".repeat(50);
        let text = format!("{} tail", word);
        let spans = chunker(20, 5).chunk(&text).unwrap();
        assert_eq!(spans[0].text, word);
        assert_eq!(spans.last().unwrap().text, "tail");
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text();
        let a = chunker(180, 40).chunk(&text).unwrap();
        let b = chunker(180, 40).chunk(&text).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_three_chunks_at_500_with_50_overlap() {
        let text = sample_text();
        let len = normalize_text(&text).chars().count();
        assert!(len > 1000 && len < 1300, "fixture length {}", len);

        let spans = chunker(500, 50).chunk(&text).unwrap();
        assert_eq!(spans.len(), 3);
    }

    #[test]
    fn test_invalid_config() {
        assert!(RecursiveChunker::new(ChunkingConfig { chunk_size: 10, overlap: 10 }).is_err());
        assert!(RecursiveChunker::new(ChunkingConfig { chunk_size: 0, overlap: 0 }).is_err());
    }
}
