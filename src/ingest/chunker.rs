//! Text chunking into overlapping passages
//!
//! Paragraph-merge strategy: accumulate paragraphs until the word budget is
//! hit, emit the chunk, and start the next one with the tail of its
//! predecessor so context survives chunk boundaries. Word counts stand in
//! for tokens; both backends index the same chunks.

use crate::ingest::Segment;
use regex::Regex;
use std::sync::OnceLock;

fn paragraph_splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"\n\s*\n").expect("valid paragraph regex"))
}

/// Split text into chunks of roughly `max_words` words with overlap.
///
/// A single paragraph longer than the budget is emitted oversized rather than
/// split mid-sentence, so a chunk may exceed `max_words` by at most one
/// paragraph's length.
pub fn chunk_text(text: &str, max_words: usize, overlap_words: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = paragraph_splitter()
        .split(text.trim())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for paragraph in paragraphs {
        let paragraph_words: Vec<String> =
            paragraph.split_whitespace().map(str::to_string).collect();

        if !current.is_empty() && current.len() + paragraph_words.len() > max_words {
            chunks.push(current.join(" "));

            let overlap_start = current.len().saturating_sub(overlap_words);
            let mut next: Vec<String> = current[overlap_start..].to_vec();
            next.extend(paragraph_words);
            current = next;
        } else {
            current.extend(paragraph_words);
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Chunk all segments of a parsed document into a flat chunk list
pub fn chunk_segments(segments: &[Segment], max_words: usize, overlap_words: usize) -> Vec<String> {
    let full_text = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    chunk_text(&full_text, max_words, overlap_words)
}
