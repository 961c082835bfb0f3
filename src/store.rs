//! Store pipeline (C6, spec §4.6): deduplication-on-write.
//!
//! Classifies incoming text against the best-matching existing memory in
//! the target database and picks one of three paths -- near-duplicate,
//! merge, or novel -- the way `embedding/store.rs`'s `store_memory` already
//! classifies a single best match, generalized to the spec's three-way
//! split and its own similarity thresholds.

use anyhow::Result;
use rusqlite::Connection;

use crate::chunker;
use crate::embedding::{self, EmbedKind, EmbeddingProvider};
use crate::models::{new_id, NewMemory};
use crate::repo::{chunk, memory, tag};
use crate::search::best_score_per_memory;

const NEAR_DUPLICATE_THRESHOLD: f32 = 0.95;
const MERGE_THRESHOLD_LOW: f32 = 0.90;
const SIMILAR_LOW: f32 = 0.85;
const SIMILAR_HIGH: f32 = 0.90;
const CANDIDATE_K: usize = 10;
const MAX_SIMILAR_ADVISORY: usize = 3;

/// Outcome of a `store` call.
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub id: String,
    pub chunks_written: usize,
    pub deduplicated: bool,
    pub merged: bool,
    pub similar_memories: Vec<String>,
}

/// Run the store pipeline against an already-open database (spec §4.6
/// steps 2-8; step 1's database selection is the caller's job, since it
/// may need to open a per-project handle before calling in).
pub fn store(
    conn: &mut Connection,
    provider: &EmbeddingProvider,
    vec_available: bool,
    chunk_max_tokens: usize,
    chunk_overlap_tokens: usize,
    input: &NewMemory,
) -> Result<StoreOutcome> {
    let query_embedding = embedding::embed(provider, conn, &input.content, EmbedKind::Query)?;

    let candidate_hits = chunk::search_vector(conn, &query_embedding, CANDIDATE_K, vec_available)?;
    let ranked = best_score_per_memory(&candidate_hits);

    let top = ranked.first().cloned();

    if let Some((top_id, score)) = &top {
        if *score > NEAR_DUPLICATE_THRESHOLD {
            memory::touch_access(conn, top_id)?;
            return Ok(StoreOutcome {
                id: top_id.clone(),
                chunks_written: 0,
                deduplicated: true,
                merged: false,
                similar_memories: Vec::new(),
            });
        }

        if *score >= MERGE_THRESHOLD_LOW && *score <= NEAR_DUPLICATE_THRESHOLD {
            let existing = memory::peek(conn, top_id)?
                .ok_or_else(|| anyhow::anyhow!("merge target vanished: {top_id}"))?;
            let merged_content = format!("{}\n\n---\n\n{}", existing.content, input.content);

            chunk::delete_by_memory(conn, top_id, vec_available)?;
            memory::set_content(conn, top_id, &merged_content)?;

            let chunks_written =
                rechunk_and_embed(conn, provider, vec_available, chunk_max_tokens, chunk_overlap_tokens, top_id, &merged_content)?;

            return Ok(StoreOutcome {
                id: top_id.clone(),
                chunks_written,
                deduplicated: false,
                merged: true,
                similar_memories: Vec::new(),
            });
        }
    }

    // Novel.
    let id = new_id();
    memory::create(conn, &id, input)?;

    if !input.tags.is_empty() {
        tag::set_for_memory(conn, &id, &input.tags)?;
    }

    let chunks_written = rechunk_and_embed(
        conn,
        provider,
        vec_available,
        chunk_max_tokens,
        chunk_overlap_tokens,
        &id,
        &input.content,
    )?;

    let similar_memories = ranked
        .into_iter()
        .filter(|(_, score)| *score >= SIMILAR_LOW && *score < SIMILAR_HIGH)
        .take(MAX_SIMILAR_ADVISORY)
        .map(|(id, _)| id)
        .collect();

    Ok(StoreOutcome {
        id,
        chunks_written,
        deduplicated: false,
        merged: false,
        similar_memories,
    })
}

/// Chunk `content` and embed each piece (kind = document, cache-consulting),
/// inserting all chunks and both mirrors in one transaction (spec §4.2,
/// §4.6 step 7).
fn rechunk_and_embed(
    conn: &mut Connection,
    provider: &EmbeddingProvider,
    vec_available: bool,
    max_tokens: usize,
    overlap_tokens: usize,
    memory_id: &str,
    content: &str,
) -> Result<usize> {
    let pieces = chunker::chunk(content, max_tokens, overlap_tokens);

    let mut with_embeddings = Vec::with_capacity(pieces.len());
    for piece in pieces {
        let vector = embedding::embed(provider, conn, &piece.content, EmbedKind::Document)?;
        with_embeddings.push((piece, vector));
    }

    chunk::create_chunks(conn, memory_id, &with_embeddings, vec_available)
}
