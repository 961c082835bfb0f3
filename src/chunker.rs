//! Splits a memory's text into bounded, overlapping chunks (C2, spec §4.2).
//!
//! Grounded on `embedding/chunker.rs`'s boundary-preference idea, but the
//! algorithm itself is different: splits only ever land on line boundaries,
//! an open code fence suppresses a split even over budget, and the overlap
//! carried into the next chunk is whole trailing lines rather than a
//! character window.

use serde::{Deserialize, Serialize};

const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkPiece {
    pub content: String,
    pub chunk_index: u32,
    pub token_count: u32,
}

fn estimate_tokens(s: &str) -> u32 {
    ((s.chars().count() + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN) as u32
}

fn is_fence_line(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Split `text` into chunks of at most `max_tokens` tokens, carrying
/// `overlap_tokens` worth of trailing lines into the next chunk.
pub fn chunk(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<ChunkPiece> {
    if text.is_empty() {
        return Vec::new();
    }

    if estimate_tokens(text) <= max_tokens as u32 {
        return vec![ChunkPiece {
            content: text.to_string(),
            chunk_index: 0,
            token_count: estimate_tokens(text),
        }];
    }

    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;
    let max_chars = max_tokens * CHARS_PER_TOKEN;

    let lines: Vec<&str> = text.split_inclusive('\n').collect();

    let mut pieces = Vec::new();
    let mut chunk_index = 0u32;

    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;
    let mut in_fence = false;

    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];
        let line_is_fence = is_fence_line(line);
        let line_len = line.chars().count();

        let would_overflow = current_len + line_len > max_chars && !current.is_empty();

        if would_overflow && !in_fence {
            // flush current chunk
            let content: String = current.concat();
            pieces.push(ChunkPiece {
                content: content.clone(),
                chunk_index,
                token_count: estimate_tokens(&content),
            });
            chunk_index += 1;

            // carry trailing lines whose cumulative length fits overlap_chars,
            // rounded up to at least one line when overlap is configured.
            // The window is trimmed back to the last point where it held a
            // balanced number of fence markers, so a carried chunk never
            // opens with a dangling fence opener/closer the flushed chunk
            // already paired off.
            let mut carried: Vec<&str> = Vec::new();
            let mut carried_len = 0usize;
            if overlap_chars > 0 {
                let mut fence_parity = 0u8;
                let mut safe_len = 0usize;
                let mut safe_chars = 0usize;
                for &l in current.iter().rev() {
                    let l_len = l.chars().count();
                    if carried_len + l_len > overlap_chars && !carried.is_empty() {
                        break;
                    }
                    carried.push(l);
                    carried_len += l_len;
                    if is_fence_line(l) {
                        fence_parity ^= 1;
                    }
                    if fence_parity == 0 {
                        safe_len = carried.len();
                        safe_chars = carried_len;
                    }
                }
                carried.truncate(safe_len);
                carried_len = safe_chars;
                carried.reverse();
            }

            current = carried;
            current_len = carried_len;
        }

        if line_is_fence {
            in_fence = !in_fence;
        }

        current.push(line);
        current_len += line_len;
        i += 1;
    }

    if !current.is_empty() {
        let content: String = current.concat();
        pieces.push(ChunkPiece {
            content: content.clone(),
            chunk_index,
            token_count: estimate_tokens(&content),
        });
    }

    pieces
}
