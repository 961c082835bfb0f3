//! Persistent, content-addressed cache of embeddings (C3, spec §4.3).
//!
//! Key is a 256-bit SHA-256 digest over `kind_prefix || text`; value is the
//! embedding's raw little-endian `f32` bytes, matching the `embedding_cache`
//! table in `storage/schema.rs`.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use super::blob::{blob_to_embedding, embedding_to_blob};
use super::provider::EmbedKind;

/// Compute the cache key for `text` under `kind`.
pub fn cache_key(text: &str, kind: EmbedKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.prefix().as_bytes());
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Look up a cached embedding for `text`/`kind`. Returns `None` on a miss.
pub fn get(conn: &Connection, text: &str, kind: EmbedKind) -> Result<Option<Vec<f32>>> {
    let key = cache_key(text, kind);
    let row: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM embedding_cache WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .ok();
    Ok(row.map(|blob| blob_to_embedding(&blob)))
}

/// Store `embedding` under the key derived from `text`/`kind`. Idempotent:
/// writing the same key twice overwrites with the same bytes.
pub fn set(conn: &Connection, text: &str, kind: EmbedKind, embedding: &[f32]) -> Result<()> {
    let key = cache_key(text, kind);
    let blob = embedding_to_blob(embedding);
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO embedding_cache (key, embedding, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET embedding = excluded.embedding",
        params![key, blob, now],
    )
    .context("writing embedding cache entry")?;

    Ok(())
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
    fn test_cache_miss_then_hit() {
        let conn = memory_conn();
        assert!(get(&conn, "hello", EmbedKind::Document).unwrap().is_none());

        let vec = vec![0.1f32, 0.2, 0.3];
        set(&conn, "hello", EmbedKind::Document, &vec).unwrap();

        let cached = get(&conn, "hello", EmbedKind::Document).unwrap().unwrap();
        assert_eq!(cached, vec);
    }

    #[test]
    fn test_document_and_query_keys_differ() {
        let doc_key = cache_key("same text", EmbedKind::Document);
        let query_key = cache_key("same text", EmbedKind::Query);
        assert_ne!(doc_key, query_key);
    }

    #[test]
    fn test_set_is_idempotent() {
        let conn = memory_conn();
        let vec = vec![1.0f32, 2.0];
        set(&conn, "x", EmbedKind::Query, &vec).unwrap();
        set(&conn, "x", EmbedKind::Query, &vec).unwrap();

        let count: i64 = conn
            .query_row("SELECT count(*) FROM embedding_cache", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
