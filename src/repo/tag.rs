//! Tag repository (C4, spec §4.4). Tags are shared rows, never GC'd.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::new_id;

/// Insert-if-absent then read, so concurrent `ensure` of the same name is
/// idempotent and race-safe.
pub fn ensure(conn: &Connection, name: &str) -> Result<String> {
    conn.execute(
        "INSERT INTO tags (id, name) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
        params![new_id(), name],
    )?;

    let id: String = conn.query_row(
        "SELECT id FROM tags WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Replace a memory's full tag set transactionally.
pub fn set_for_memory(conn: &mut Connection, memory_id: &str, names: &[String]) -> Result<()> {
    let tag_ids: Vec<String> = names
        .iter()
        .map(|name| ensure(conn, name))
        .collect::<Result<_>>()?;

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM memory_tags WHERE memory_id = ?1",
        params![memory_id],
    )?;
    for tag_id in &tag_ids {
        tx.execute(
            "INSERT INTO memory_tags (memory_id, tag_id) VALUES (?1, ?2)",
            params![memory_id, tag_id],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Add a single tag to a memory without touching its other tags.
pub fn add_to_memory(conn: &Connection, memory_id: &str, name: &str) -> Result<()> {
    let tag_id = ensure(conn, name)?;
    conn.execute(
        "INSERT INTO memory_tags (memory_id, tag_id) VALUES (?1, ?2)
         ON CONFLICT(memory_id, tag_id) DO NOTHING",
        params![memory_id, tag_id],
    )?;
    Ok(())
}

pub fn get_for_memory(conn: &Connection, memory_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM tags t JOIN memory_tags mt ON mt.tag_id = t.id
         WHERE mt.memory_id = ?1 ORDER BY t.name",
    )?;
    let names = stmt
        .query_map(params![memory_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Batch-fetch tags for many memories in a single query, avoiding N+1.
pub fn get_for_memories(
    conn: &Connection,
    ids: &[String],
) -> Result<HashMap<String, Vec<String>>> {
    let mut result: HashMap<String, Vec<String>> = HashMap::new();
    if ids.is_empty() {
        return Ok(result);
    }

    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT mt.memory_id, t.name FROM tags t
         JOIN memory_tags mt ON mt.tag_id = t.id
         WHERE mt.memory_id IN ({placeholders})
         ORDER BY t.name"
    );

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    for row in rows {
        let (memory_id, name) = row?;
        result.entry(memory_id).or_default().push(name);
    }

    for id in ids {
        result.entry(id.clone()).or_default();
    }

    Ok(result)
}

#[allow(dead_code)]
pub fn lookup_id(conn: &Connection, name: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| {
            row.get(0)
        })
        .optional()?)
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
    fn test_ensure_is_idempotent() {
        let conn = memory_conn();
        let a = ensure(&conn, "rust").unwrap();
        let b = ensure(&conn, "rust").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_for_memory_replaces() {
        let mut conn = memory_conn();
        conn.execute(
            "INSERT INTO memories (id, content, created_at, updated_at, last_accessed_at) VALUES ('m1', 'x', '2024', '2024', '2024')",
            [],
        )
        .unwrap();

        set_for_memory(&mut conn, "m1", &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(get_for_memory(&conn, "m1").unwrap(), vec!["a", "b"]);

        set_for_memory(&mut conn, "m1", &["c".to_string()]).unwrap();
        assert_eq!(get_for_memory(&conn, "m1").unwrap(), vec!["c"]);
    }

    #[test]
    fn test_get_for_memories_batch() {
        let mut conn = memory_conn();
        for id in ["m1", "m2"] {
            conn.execute(
                "INSERT INTO memories (id, content, created_at, updated_at, last_accessed_at) VALUES (?1, 'x', '2024', '2024', '2024')",
                params![id],
            )
            .unwrap();
        }
        set_for_memory(&mut conn, "m1", &["shared".to_string()]).unwrap();
        set_for_memory(&mut conn, "m2", &["shared".to_string(), "only2".to_string()]).unwrap();

        let map = get_for_memories(&conn, &["m1".to_string(), "m2".to_string()]).unwrap();
        assert_eq!(map["m1"], vec!["shared"]);
        assert_eq!(map["m2"], vec!["only2", "shared"]);
    }
}
