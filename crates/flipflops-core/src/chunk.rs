//! Paragraph → sentence → window text chunker.
//!
//! Splits extracted document text into [`Chunk`]s bounded by a
//! `max_tokens` limit so every chunk fits the embedding model's input.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries and pack whole paragraphs
//!    into a buffer until the next one would exceed `max_chars`.
//! 3. A paragraph longer than `max_chars` is split on sentence boundaries
//!    (`.`, `!`, `?`, `…` followed by whitespace) and sentences are packed
//!    the same way.
//! 4. A sentence longer than `max_chars` is hard-split at the nearest
//!    newline or space, never inside a UTF-8 character.
//!
//! Chunk ids are `{document_id}-{position:04}` and each chunk carries the
//! SHA-256 of its text, so re-chunking unchanged text yields an identical
//! chunk set.
//!
//! ```rust
//! use flipflops_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-1", "Primeiro parágrafo.\n\nSegundo.", 250);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "doc-1-0000");
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks of at most `max_tokens × 4` bytes.
///
/// Blank text yields no chunks. Positions are contiguous from 0.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if para.len() > max_chars {
            flush(&mut buf, &mut pieces);
            pack_sentences(para, max_chars, &mut pieces);
            continue;
        }
        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if would_be > max_chars {
            flush(&mut buf, &mut pieces);
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    flush(&mut buf, &mut pieces);

    pieces
        .iter()
        .enumerate()
        .map(|(position, piece)| make_chunk(document_id, position, piece))
        .collect()
}

/// Split text into sentences, keeping terminal punctuation.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?' | '…') {
            let end = i + c.len_utf8();
            match chars.peek() {
                Some((_, next)) if next.is_whitespace() => {
                    let s = text[start..end].trim();
                    if !s.is_empty() {
                        sentences.push(s);
                    }
                    start = end;
                }
                _ => {}
            }
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn pack_sentences(para: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut buf = String::new();
    for sentence in split_sentences(para) {
        if sentence.len() > max_chars {
            flush(&mut buf, pieces);
            hard_split(sentence, max_chars, pieces);
            continue;
        }
        let would_be = if buf.is_empty() {
            sentence.len()
        } else {
            buf.len() + 1 + sentence.len()
        };
        if would_be > max_chars {
            flush(&mut buf, pieces);
        }
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(sentence);
    }
    flush(&mut buf, pieces);
}

fn hard_split(text: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut remaining = text;
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .filter(|pos| *pos > 0)
                .unwrap_or(limit)
        } else {
            limit
        };
        // A single character wider than max_chars still has to make progress.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

fn flush(buf: &mut String, pieces: &mut Vec<String>) {
    if !buf.is_empty() {
        pieces.push(std::mem::take(buf));
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Hex SHA-256 of a string.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, position: usize, text: &str) -> Chunk {
    Chunk {
        id: format!("{}-{:04}", document_id, position),
        document_id: document_id.to_string(),
        position,
        text: text.to_string(),
        hash: content_hash(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Olá, mundo!", 250);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[0].text, "Olá, mundo!");
        assert_eq!(chunks[0].id, "doc1-0000");
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(chunk_text("doc1", "", 250).is_empty());
        assert!(chunk_text("doc1", "  \n\n \n\n", 250).is_empty());
    }

    #[test]
    fn test_paragraphs_packed_under_limit() {
        let text = "Primeiro parágrafo.\n\nSegundo parágrafo.\n\nTerceiro parágrafo.";
        let chunks = chunk_text("doc1", text, 250);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Primeiro"));
        assert!(chunks[0].text.contains("Terceiro"));
    }

    #[test]
    fn test_long_paragraph_splits_on_sentences() {
        // max_tokens=10 => max_chars=40
        let text = "A mitocôndria produz energia. O cloroplasto faz fotossíntese. O núcleo guarda o DNA.";
        let chunks = chunk_text("doc1", text, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 40, "chunk too long: {:?}", c.text);
            assert!(c.text.ends_with('.'), "sentence cut mid-way: {:?}", c.text);
        }
    }

    #[test]
    fn test_long_sentence_hard_split() {
        let text = "palavra ".repeat(50);
        let chunks = chunk_text("doc1", &text, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 20);
            assert!(!c.text.starts_with(' '));
        }
    }

    #[test]
    fn test_positions_contiguous() {
        let text = (0..50)
            .map(|i| format!("Parágrafo número {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.position, i, "position mismatch at {}", i);
            assert_eq!(c.id, format!("doc1-{:04}", i));
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "ção".repeat(40);
        let chunks = chunk_text("doc1", &text, 3);
        assert!(!chunks.is_empty());
        let rejoined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_rechunking_is_identical() {
        let text = "Alfa.\n\nBeta é longo demais para caber. Tem duas frases.\n\nGama\n\nDelta";
        let c1 = chunk_text("doc1", text, 5);
        let c2 = chunk_text("doc1", text, 5);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("Olá! Tudo bem? Sim. v1.2 funciona…  fim");
        assert_eq!(s, vec!["Olá!", "Tudo bem?", "Sim.", "v1.2 funciona…", "fim"]);
    }
}
