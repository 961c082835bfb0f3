//! Hybrid vector + keyword search (C5, spec §4.5).
//!
//! Generalizes `embedding/store.rs`'s `search_hybrid`, replacing its
//! Reciprocal Rank Fusion with the weighted linear fusion the spec
//! requires, and replacing per-session grouping with per-memory grouping.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::Connection;
use tracing::warn;

use crate::embedding::{self, EmbedKind, EmbeddingProvider};
use crate::models::{SearchFilters, SearchHit, StorageTier};
use crate::repo::{chunk, memory, tag};

/// Run a hybrid search against `conn` (spec §4.5 algorithm, steps 1-10).
pub fn search(
    conn: &Connection,
    provider: &EmbeddingProvider,
    vec_available: bool,
    query: &str,
    filters: &SearchFilters,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let max_results = if filters.max_results == 0 {
        10
    } else {
        filters.max_results
    };
    let k = max_results * 3;

    let query_embedding = match embedding::embed(provider, conn, query, EmbedKind::Query) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "query embedding failed, degrading to FTS-only");
            None
        }
    };

    let vector_hits = match &query_embedding {
        Some(v) => chunk::search_vector(conn, v, k, vec_available).unwrap_or_default(),
        None => Vec::new(),
    };
    let fts_hits = chunk::search_fts(conn, query, k).unwrap_or_default();

    // merge into a map keyed by chunk_id
    struct Merged {
        memory_id: String,
        vector_score: f32,
        fts_score: f32,
    }

    let mut merged: HashMap<String, Merged> = HashMap::new();
    for hit in vector_hits {
        merged.insert(
            hit.chunk_id,
            Merged {
                memory_id: hit.memory_id,
                vector_score: hit.score,
                fts_score: 0.0,
            },
        );
    }
    for hit in fts_hits {
        merged
            .entry(hit.chunk_id)
            .and_modify(|m| m.fts_score = hit.score)
            .or_insert(Merged {
                memory_id: hit.memory_id,
                vector_score: 0.0,
                fts_score: hit.score,
            });
    }

    let vector_weight = if filters.vector_weight == 0.0 && filters.fts_weight == 0.0 {
        0.7
    } else {
        filters.vector_weight
    };
    let fts_weight = if filters.vector_weight == 0.0 && filters.fts_weight == 0.0 {
        0.3
    } else {
        filters.fts_weight
    };
    let min_score = filters.min_score;

    // group by memory_id, keeping the highest final_score per memory
    let mut by_memory: HashMap<String, f32> = HashMap::new();
    for m in merged.values() {
        let final_score = vector_weight * m.vector_score + fts_weight * m.fts_score;
        if final_score < min_score {
            continue;
        }
        by_memory
            .entry(m.memory_id.clone())
            .and_modify(|s| {
                if final_score > *s {
                    *s = final_score;
                }
            })
            .or_insert(final_score);
    }

    let mut ranked: Vec<(String, f32)> = by_memory.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(max_results.max(k));

    if ranked.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
    let tags_by_memory = tag::get_for_memories(conn, &ids)?;

    let mut hits: Vec<SearchHit> = Vec::new();
    for (id, score) in ranked {
        let Some(mut mem) = memory::peek(conn, &id)? else {
            continue;
        };

        if let Some(project_filter) = &filters.project_id {
            if mem.project_id.as_deref() != Some(project_filter.as_str()) {
                continue;
            }
        }

        mem.tags = tags_by_memory.get(&id).cloned().unwrap_or_default();
        if !filters.tags.is_empty() && !filters.tags.iter().all(|t| mem.tags.contains(t)) {
            continue;
        }

        if !filters.include_archived && mem.storage_tier == StorageTier::Archive {
            continue;
        }

        hits.push(SearchHit { memory: mem, score });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    hits.truncate(max_results);

    Ok(hits)
}

/// Group raw chunk hits by memory, keeping the max score per memory.
/// Used by the store pipeline's dedup-on-write classification (spec §4.6),
/// which needs the same "best chunk per memory" reduction but over a
/// vector-only candidate set rather than a fused hybrid one.
pub fn best_score_per_memory(hits: &[chunk::ChunkHit]) -> Vec<(String, f32)> {
    let mut by_memory: HashMap<String, f32> = HashMap::new();
    for hit in hits {
        by_memory
            .entry(hit.memory_id.clone())
            .and_modify(|s| {
                if hit.score > *s {
                    *s = hit.score;
                }
            })
            .or_insert(hit.score);
    }
    let mut ranked: Vec<(String, f32)> = by_memory.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}
