//! Embedding adapter + cache (C3, spec §4.3).
//!
//! Wires `provider::EmbeddingProvider` (the HTTP client) and `cache` (the
//! persistent keyed cache) together behind a single `embed`/`embed_batch`
//! contract. Consulting the cache first, and writing through it on a miss,
//! is the store pipeline's and the search module's only way to get a
//! vector — neither ever talks to the provider directly.

pub mod blob;
pub mod cache;
pub mod provider;

pub use provider::{cosine_similarity, EmbedKind, EmbeddingProvider, ProviderStatus};

use anyhow::Result;
use rusqlite::Connection;
use tracing::warn;

/// Embed `text` as `kind`, using `conn`'s cache first.
///
/// On a cache miss, calls the provider, writes the result back to the
/// cache, and returns it. Embedding failure propagates to the caller; per
/// spec §4.3 it is the caller's job to retry or degrade.
pub fn embed(
    provider: &EmbeddingProvider,
    conn: &Connection,
    text: &str,
    kind: EmbedKind,
) -> Result<Vec<f32>> {
    if let Some(cached) = cache::get(conn, text, kind)? {
        return Ok(cached);
    }

    let vector = provider.embed(text, kind)?;
    if let Err(e) = cache::set(conn, text, kind, &vector) {
        warn!(error = %e, "failed to write embedding cache entry");
    }
    Ok(vector)
}

/// Embed a batch of texts as `kind`, consulting the cache per-item so a
/// partially-cached batch only calls the provider for the misses.
pub fn embed_batch(
    provider: &EmbeddingProvider,
    conn: &Connection,
    texts: &[&str],
    kind: EmbedKind,
) -> Result<Vec<Vec<f32>>> {
    let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
    let mut misses: Vec<&str> = Vec::new();
    let mut miss_indices: Vec<usize> = Vec::new();

    for (i, text) in texts.iter().enumerate() {
        match cache::get(conn, text, kind)? {
            Some(v) => results.push(Some(v)),
            None => {
                results.push(None);
                misses.push(text);
                miss_indices.push(i);
            }
        }
    }

    if !misses.is_empty() {
        let embedded = provider.embed_batch(&misses, kind)?;
        for (idx, (text, vector)) in miss_indices.iter().zip(misses.iter().zip(embedded.iter())) {
            if let Err(e) = cache::set(conn, text, kind, vector) {
                warn!(error = %e, "failed to write embedding cache entry");
            }
            results[*idx] = Some(vector.clone());
        }
    }

    Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::migrate(&conn, false).unwrap();
        conn
    }

    #[test]
    fn test_embed_batch_uses_cache_for_repeated_text() {
        let conn = memory_conn();
        cache::set(&conn, "hello", EmbedKind::Document, &[0.5, 0.5]).unwrap();

        let result = embed_batch(
            &EmbeddingProvider::new("http://unused.invalid", None, "test-model"),
            &conn,
            &["hello"],
            EmbedKind::Document,
        )
        .unwrap();

        assert_eq!(result, vec![vec![0.5, 0.5]]);
    }
}
