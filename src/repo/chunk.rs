//! Chunk repository (C4, spec §4.4): chunk rows plus their vector and FTS
//! mirrors.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

use crate::chunker::ChunkPiece;
use crate::embedding::blob::{blob_to_embedding, embedding_to_blob};
use crate::embedding::provider::cosine_similarity;
use crate::models::new_id;

/// A vector or keyword search hit against the chunk mirrors.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub memory_id: String,
    pub content: String,
    pub score: f32,
}

/// Insert `pieces` (with their embeddings) for `memory_id` in one
/// transaction across the chunk table and both mirrors.
pub fn create_chunks(
    conn: &mut Connection,
    memory_id: &str,
    pieces: &[(ChunkPiece, Vec<f32>)],
    vec_available: bool,
) -> Result<usize> {
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();

    for (piece, embedding) in pieces {
        let chunk_id = new_id();
        let blob = embedding_to_blob(embedding);

        tx.execute(
            "INSERT INTO chunks (id, memory_id, content, chunk_index, token_count, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chunk_id,
                memory_id,
                piece.content,
                piece.chunk_index,
                piece.token_count,
                blob,
                now
            ],
        )
        .context("inserting chunk")?;
        // chunks_fts is kept in sync by the AFTER INSERT trigger.

        if vec_available {
            let rowid: i64 = tx.query_row(
                "SELECT rowid FROM chunks WHERE id = ?1",
                params![chunk_id],
                |row| row.get(0),
            )?;
            let _ = tx.execute(
                "INSERT INTO chunks_vec (rowid, embedding) VALUES (?1, ?2)",
                rusqlite::params![rowid, blob],
            );
        }
    }

    tx.commit()?;
    Ok(pieces.len())
}

/// Brute-force cosine search over every stored embedding. Used when the
/// native vector index is unavailable, and as the reference path the
/// native index's ranking must match (spec invariant 9).
pub fn search_vector_fallback(
    conn: &Connection,
    query_embedding: &[f32],
    k: usize,
) -> Result<Vec<ChunkHit>> {
    let mut stmt = conn.prepare(
        "SELECT id, memory_id, content, embedding FROM chunks WHERE embedding IS NOT NULL",
    )?;
    let rows = stmt.query_map([], |row| {
        let id: String = row.get(0)?;
        let memory_id: String = row.get(1)?;
        let content: String = row.get(2)?;
        let blob: Vec<u8> = row.get(3)?;
        Ok((id, memory_id, content, blob))
    })?;

    let mut hits: Vec<ChunkHit> = Vec::new();
    for row in rows {
        let (id, memory_id, content, blob) = row?;
        let embedding = blob_to_embedding(&blob);
        let score = cosine_similarity(query_embedding, &embedding);
        hits.push(ChunkHit {
            chunk_id: id,
            memory_id,
            content,
            score,
        });
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(k);
    Ok(hits)
}

/// Native-index vector search. Returns `Err` (caller falls back) if the
/// virtual table query fails for any reason.
pub fn search_vector_native(
    conn: &Connection,
    query_embedding: &[f32],
    k: usize,
) -> Result<Vec<ChunkHit>> {
    let blob = embedding_to_blob(query_embedding);
    let mut stmt = conn.prepare(
        "SELECT c.id, c.memory_id, c.content, v.distance
         FROM chunks_vec v JOIN chunks c ON c.rowid = v.rowid
         WHERE v.embedding MATCH ?1 AND k = ?2
         ORDER BY v.distance",
    )?;
    let rows = stmt.query_map(params![blob, k as i64], |row| {
        let id: String = row.get(0)?;
        let memory_id: String = row.get(1)?;
        let content: String = row.get(2)?;
        let distance: f64 = row.get(3)?;
        Ok(ChunkHit {
            chunk_id: id,
            memory_id,
            content,
            score: (1.0 - distance) as f32,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Pick the native path if `vec_available`, else fall back to brute force.
pub fn search_vector(
    conn: &Connection,
    query_embedding: &[f32],
    k: usize,
    vec_available: bool,
) -> Result<Vec<ChunkHit>> {
    if vec_available {
        if let Ok(hits) = search_vector_native(conn, query_embedding, k) {
            return Ok(hits);
        }
    }
    search_vector_fallback(conn, query_embedding, k)
}

/// FTS5 keyword search: tokenizes `query` into whitespace-separated terms,
/// quotes each (doubling internal quote chars), joins with AND, and
/// converts BM25 rank into a positive similarity `1 / (1 + |rank|)`.
pub fn search_fts(conn: &Connection, query: &str, k: usize) -> Result<Vec<ChunkHit>> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let fts_query = terms.join(" AND ");

    let mut stmt = conn.prepare(
        "SELECT c.id, c.memory_id, c.content, chunks_fts.rank
         FROM chunks_fts JOIN chunks c ON c.rowid = chunks_fts.rowid
         WHERE chunks_fts MATCH ?1
         ORDER BY rank
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![fts_query, k as i64], |row| {
        let id: String = row.get(0)?;
        let memory_id: String = row.get(1)?;
        let content: String = row.get(2)?;
        let rank: f64 = row.get(3)?;
        Ok(ChunkHit {
            chunk_id: id,
            memory_id,
            content,
            score: (1.0 / (1.0 + rank.abs())) as f32,
        })
    })?;

    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Delete every chunk belonging to `memory_id`, plus both mirrors, in one
/// transaction.
pub fn delete_by_memory(conn: &mut Connection, memory_id: &str, vec_available: bool) -> Result<()> {
    let tx = conn.transaction()?;
    if vec_available {
        let _ = tx.execute(
            "DELETE FROM chunks_vec WHERE rowid IN (SELECT rowid FROM chunks WHERE memory_id = ?1)",
            params![memory_id],
        );
    }
    tx.execute("DELETE FROM chunks WHERE memory_id = ?1", params![memory_id])?;
    tx.commit()?;
    Ok(())
}

/// Load every stored embedding, for the fallback path or for a
/// consolidation candidate search.
pub fn get_all_embeddings(conn: &Connection) -> Result<Vec<(String, String, Vec<f32>)>> {
    let mut stmt =
        conn.prepare("SELECT id, memory_id, embedding FROM chunks WHERE embedding IS NOT NULL")?;
    let rows = stmt.query_map([], |row| {
        let id: String = row.get(0)?;
        let memory_id: String = row.get(1)?;
        let blob: Vec<u8> = row.get(2)?;
        Ok((id, memory_id, blob_to_embedding(&blob)))
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}
