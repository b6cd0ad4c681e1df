//! Semantic chunker.
//!
//! Splits document text into overlapping chunks:
//! 1. Paragraphs (separated by blank lines) are the preferred unit
//! 2. Paragraphs longer than the chunk size are split into sentences
//! 3. A unit that still does not fit is cut on character boundaries
//!
//! Units are packed greedily. Every chunk after the first starts with up to
//! `overlap` characters of the text preceding it.

use std::ops::Range;

use unicode_segmentation::UnicodeSegmentation;

use super::types::{Chunk, Document};
use crate::core::errors::RagError;

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chunk_size: usize,
    overlap: usize,
}

/// A chunk under construction, as byte offsets into the document text.
#[derive(Debug, Clone, Copy)]
struct OpenChunk {
    start: usize,
    core_start: usize,
    end: usize,
}

impl Chunker {
    /// `max_chunk_size` and `overlap` are measured in characters.
    pub fn new(max_chunk_size: usize, overlap: usize) -> Result<Self, RagError> {
        if max_chunk_size == 0 {
            return Err(RagError::config("max_chunk_size must be greater than 0"));
        }
        if overlap >= max_chunk_size {
            return Err(RagError::config(format!(
                "overlap ({}) must be smaller than max_chunk_size ({})",
                overlap, max_chunk_size
            )));
        }
        Ok(Self {
            max_chunk_size,
            overlap,
        })
    }

    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.raw_text.as_str();
        let mut chunks = Vec::new();
        if text.trim().is_empty() {
            return chunks;
        }

        let mut open: Option<OpenChunk> = None;
        let mut prev_start: Option<usize> = None;

        for unit in self.semantic_units(text) {
            let mut remaining = unit;
            while !remaining.is_empty() {
                if let Some(current) = open.as_mut() {
                    if char_len(&text[current.start..remaining.end]) <= self.max_chunk_size {
                        current.end = remaining.end;
                        break;
                    }
                    let full = *current;
                    prev_start = Some(full.start);
                    push_chunk(&mut chunks, document, full);
                    open = None;
                }

                let start = self.overlap_start(text, prev_start, remaining.start);
                let room = self.max_chunk_size - char_len(&text[start..remaining.start]);
                if char_len(&text[remaining.clone()]) <= room {
                    open = Some(OpenChunk {
                        start,
                        core_start: remaining.start,
                        end: remaining.end,
                    });
                    break;
                }

                // The unit cannot fit even in an empty chunk: hard cut.
                let cut = advance_chars(text, remaining.start, room).min(remaining.end);
                let piece = OpenChunk {
                    start,
                    core_start: remaining.start,
                    end: cut,
                };
                prev_start = Some(piece.start);
                push_chunk(&mut chunks, document, piece);
                remaining = cut..remaining.end;
            }
        }

        if let Some(last) = open {
            push_chunk(&mut chunks, document, last);
        }

        tracing::debug!(
            document_id = %document.id,
            chunk_count = chunks.len(),
            max_chunk_size = self.max_chunk_size,
            overlap = self.overlap,
            "Document chunked"
        );
        chunks
    }

    /// Start of a chunk whose own text begins at `core_start`, pulled back by
    /// the overlap but never before the previous chunk's start.
    fn overlap_start(&self, text: &str, prev_start: Option<usize>, core_start: usize) -> usize {
        let Some(prev_start) = prev_start else {
            return core_start;
        };
        if self.overlap == 0 {
            return core_start;
        }

        let mut start = retreat_chars(text, core_start, self.overlap).max(prev_start);
        while start < core_start {
            match text[start..].chars().next() {
                Some(c) if c.is_whitespace() => start += c.len_utf8(),
                _ => break,
            }
        }
        start
    }

    fn semantic_units(&self, text: &str) -> Vec<Range<usize>> {
        let mut units = Vec::new();
        for paragraph in paragraph_spans(text) {
            if char_len(&text[paragraph.clone()]) <= self.max_chunk_size {
                units.push(paragraph);
                continue;
            }
            let base = paragraph.start;
            for (offset, sentence) in text[paragraph].split_sentence_bound_indices() {
                let span = base + offset..base + offset + sentence.len();
                if let Some(trimmed) = trim_span(text, span) {
                    units.push(trimmed);
                }
            }
        }
        units
    }
}

/// Chunk `document` with the given limits.
pub fn chunk(document: &Document, max_chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, RagError> {
    Ok(Chunker::new(max_chunk_size, overlap)?.chunk(document))
}

fn push_chunk(chunks: &mut Vec<Chunk>, document: &Document, span: OpenChunk) {
    let sequence_index = chunks.len();
    chunks.push(Chunk {
        id: Chunk::chunk_id(&document.id, sequence_index),
        document_id: document.id.clone(),
        text: document.raw_text[span.start..span.end].to_string(),
        start_offset: span.start,
        end_offset: span.end,
        sequence_index,
        overlap_len: span.core_start - span.start,
    });
}

/// Non-blank paragraphs, trimmed, separated by lines containing only whitespace.
fn paragraph_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut paragraph_start: Option<usize> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(start) = paragraph_start.take() {
                spans.extend(trim_span(text, start..offset));
            }
        } else if paragraph_start.is_none() {
            paragraph_start = Some(offset);
        }
        offset += line.len();
    }
    if let Some(start) = paragraph_start {
        spans.extend(trim_span(text, start..text.len()));
    }

    spans
}

fn trim_span(text: &str, span: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[span.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let start = span.start + (slice.len() - slice.trim_start().len());
    Some(start..start + trimmed.len())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte position `n` characters after `pos`, clamped to the end of `text`.
fn advance_chars(text: &str, pos: usize, n: usize) -> usize {
    text[pos..]
        .char_indices()
        .nth(n)
        .map(|(idx, _)| pos + idx)
        .unwrap_or(text.len())
}

/// Byte position `n` characters before `pos`, clamped to 0.
fn retreat_chars(text: &str, pos: usize, n: usize) -> usize {
    if n == 0 {
        return pos;
    }
    text[..pos]
        .char_indices()
        .rev()
        .take(n)
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(pos)
}
