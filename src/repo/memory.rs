//! Memory repository (C4, spec §4.4).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::models::{Memory, MemoryListFilters, MemoryPatch, MemorySource, MemoryType, NewMemory, StorageTier};

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let source: Option<String> = row.get("source")?;
    let metadata: Option<String> = row.get("metadata")?;
    let memory_type: String = row.get("memory_type")?;
    let storage_tier: String = row.get("storage_tier")?;

    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        source: source.and_then(|s| MemorySource::parse(&s)),
        project_id: row.get("project_id")?,
        created_at: parse_ts(row, "created_at")?,
        updated_at: parse_ts(row, "updated_at")?,
        last_accessed_at: parse_ts(row, "last_accessed_at")?,
        access_count: row.get::<_, i64>("access_count")? as u64,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        memory_type: MemoryType::parse(&memory_type).unwrap_or(MemoryType::General),
        importance_score: row.get("importance_score")?,
        is_rule: row.get::<_, i64>("is_rule")? != 0,
        storage_tier: StorageTier::parse(&storage_tier).unwrap_or(StorageTier::Active),
        tags: Vec::new(),
    })
}

fn parse_ts(row: &Row, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

/// Insert a new memory row. Defaults: memory_type=general, importance=0,
/// is_rule=false, storage_tier=active, unless overridden by `input`.
pub fn create(conn: &Connection, id: &str, input: &NewMemory) -> Result<Memory> {
    let now = Utc::now();
    let now_s = now.to_rfc3339();
    let metadata_json = input
        .metadata
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()?;

    let memory_type = input.memory_type.unwrap_or(MemoryType::General);
    // Invariant 5/6 (spec §3): a rule memory is always importance >= 0.9
    // and tier = active, enforced at write time rather than waiting for
    // the next recompute/tiering pass.
    let importance = if input.is_rule {
        input.importance.unwrap_or(0.0).max(0.9)
    } else {
        input.importance.unwrap_or(0.0)
    };
    let storage_tier = StorageTier::Active;

    conn.execute(
        "INSERT INTO memories (
            id, content, source, project_id, created_at, updated_at, last_accessed_at,
            access_count, metadata, memory_type, importance_score, is_rule, storage_tier
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5, 0, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            input.content,
            input.source.map(|s| s.as_str()),
            input.project_id,
            now_s,
            metadata_json,
            memory_type.as_str(),
            importance,
            input.is_rule as i64,
            storage_tier.as_str(),
        ],
    )
    .context("inserting memory")?;

    Ok(Memory {
        id: id.to_string(),
        content: input.content.clone(),
        source: input.source,
        project_id: input.project_id.clone(),
        created_at: now,
        updated_at: now,
        last_accessed_at: now,
        access_count: 0,
        metadata: input.metadata.clone(),
        memory_type,
        importance_score: importance,
        is_rule: input.is_rule,
        storage_tier,
        tags: input.tags.clone(),
    })
}

/// Fetch a memory by id, bumping `access_count` and `last_accessed_at`
/// atomically as a side effect (spec §4.4).
pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?2 WHERE id = ?1",
        params![id, now],
    )?;

    if updated == 0 {
        return Ok(None);
    }

    let memory = conn
        .query_row(
            "SELECT * FROM memories WHERE id = ?1",
            params![id],
            row_to_memory,
        )
        .optional()
        .context("fetching memory by id")?;

    Ok(memory)
}

/// Fetch a memory by id without the access-tracking side effect. Used by
/// internal pipelines (dedup, consolidation) that should not inflate a
/// memory's recency just by looking at it.
pub fn peek(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    conn.query_row(
        "SELECT * FROM memories WHERE id = ?1",
        params![id],
        row_to_memory,
    )
    .optional()
    .context("peeking memory by id")
}

/// List memories matching `filters`, returning the page plus the total
/// count of the filtered set before limit/offset (spec §4.4).
pub fn list(conn: &Connection, filters: &MemoryListFilters) -> Result<(Vec<Memory>, u64)> {
    let mut where_clauses = Vec::new();
    let mut bind: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(project_id) = &filters.project_id {
        where_clauses.push("project_id = ?".to_string());
        bind.push(Box::new(project_id.clone()));
    }
    if let Some(source) = filters.source {
        where_clauses.push("source = ?".to_string());
        bind.push(Box::new(source.as_str().to_string()));
    }
    if let Some(since) = filters.since {
        where_clauses.push("created_at >= ?".to_string());
        bind.push(Box::new(since.to_rfc3339()));
    }
    if let Some(tag) = &filters.tag {
        where_clauses.push(
            "id IN (SELECT memory_id FROM memory_tags mt JOIN tags t ON t.id = mt.tag_id WHERE t.name = ?)"
                .to_string(),
        );
        bind.push(Box::new(tag.clone()));
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    let count_sql = format!("SELECT count(*) FROM memories {where_sql}");
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, params_refs.as_slice(), |row| row.get(0))?;

    let page_sql = format!(
        "SELECT * FROM memories {where_sql} ORDER BY created_at DESC, id ASC LIMIT ?{} OFFSET ?{}",
        bind.len() + 1,
        bind.len() + 2
    );
    let mut all_params = bind;
    all_params.push(Box::new(filters.limit as i64));
    all_params.push(Box::new(filters.offset as i64));
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        all_params.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&page_sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), row_to_memory)?;
    let memories: Vec<Memory> = rows.collect::<rusqlite::Result<_>>()?;

    Ok((memories, total as u64))
}

/// Apply a partial update to a memory's mutable fields.
pub fn update(conn: &Connection, id: &str, patch: &MemoryPatch) -> Result<bool> {
    let mut sets = Vec::new();
    let mut bind: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(content) = &patch.content {
        sets.push("content = ?".to_string());
        bind.push(Box::new(content.clone()));
    }
    if let Some(metadata) = &patch.metadata {
        sets.push("metadata = ?".to_string());
        bind.push(Box::new(serde_json::to_string(metadata)?));
    }
    if let Some(memory_type) = patch.memory_type {
        sets.push("memory_type = ?".to_string());
        bind.push(Box::new(memory_type.as_str().to_string()));
    }

    // Invariant 5/6: turning a memory into a rule floors its importance at
    // 0.9 and pins it to the active tier immediately, rather than waiting
    // for the next recompute/tiering pass.
    let becomes_rule = patch.is_rule == Some(true);
    match patch.importance_score {
        Some(importance) => {
            sets.push("importance_score = ?".to_string());
            bind.push(Box::new(importance.max(if becomes_rule { 0.9 } else { f32::MIN }) as f64));
        }
        None if becomes_rule => {
            sets.push("importance_score = ?".to_string());
            bind.push(Box::new(0.9_f64));
        }
        None => {}
    }
    if let Some(is_rule) = patch.is_rule {
        sets.push("is_rule = ?".to_string());
        bind.push(Box::new(is_rule as i64));
    }
    if becomes_rule {
        sets.push("storage_tier = ?".to_string());
        bind.push(Box::new(StorageTier::Active.as_str().to_string()));
    } else if let Some(tier) = patch.storage_tier {
        sets.push("storage_tier = ?".to_string());
        bind.push(Box::new(tier.as_str().to_string()));
    }

    if sets.is_empty() {
        return Ok(peek(conn, id)?.is_some());
    }

    sets.push("updated_at = ?".to_string());
    bind.push(Box::new(Utc::now().to_rfc3339()));

    let sql = format!(
        "UPDATE memories SET {} WHERE id = ?{}",
        sets.join(", "),
        bind.len() + 1
    );
    bind.push(Box::new(id.to_string()));
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = bind.iter().map(|b| b.as_ref()).collect();

    let updated = conn.execute(&sql, params_refs.as_slice())?;
    Ok(updated > 0)
}

/// Set `importance_score` directly (used by the importance recompute job
/// and feedback effects, which bypass the general patch validation).
pub fn set_importance(conn: &Connection, id: &str, importance: f32) -> Result<()> {
    conn.execute(
        "UPDATE memories SET importance_score = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, importance, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Set `storage_tier` directly (tiering job).
pub fn set_storage_tier(conn: &Connection, id: &str, tier: StorageTier) -> Result<()> {
    conn.execute(
        "UPDATE memories SET storage_tier = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, tier.as_str(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Overwrite `content` directly (merge/consolidation).
pub fn set_content(conn: &Connection, id: &str, content: &str) -> Result<()> {
    conn.execute(
        "UPDATE memories SET content = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, content, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Bump access tracking without returning the row (near-duplicate path).
pub fn touch_access(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?2 WHERE id = ?1",
        params![id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Delete a memory and everything it owns (chunks, mirrors, tag joins) in
/// one transaction. Returns whether a row existed to delete.
pub fn delete(conn: &mut Connection, id: &str, vec_available: bool) -> Result<bool> {
    let tx = conn.transaction()?;
    let existed = tx.query_row("SELECT 1 FROM memories WHERE id = ?1", params![id], |_| Ok(())).is_ok();
    if existed {
        // chunks_vec and memory_tags must go before the memories row:
        // `chunks` cascades on delete (foreign_keys ON), so deleting
        // memories first would empty the chunks_vec subquery and orphan
        // its mirror rows.
        if vec_available {
            let _ = tx.execute(
                "DELETE FROM chunks_vec WHERE rowid IN (SELECT rowid FROM chunks WHERE memory_id = ?1)",
                params![id],
            );
        }
        tx.execute("DELETE FROM chunks WHERE memory_id = ?1", params![id])?;
        tx.execute("DELETE FROM memory_tags WHERE memory_id = ?1", params![id])?;
        tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
    }
    tx.commit()?;
    Ok(existed)
}

/// Iterate every memory row, for the importance/tiering/consolidation
/// batch jobs.
pub fn all(conn: &Connection) -> Result<Vec<Memory>> {
    let mut stmt = conn.prepare("SELECT * FROM memories")?;
    let rows = stmt.query_map([], row_to_memory)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Fetch an arbitrary value for testing metadata round-trips.
#[allow(dead_code)]
pub fn metadata_of(memory: &Memory) -> Option<&Value> {
    memory.metadata.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::new_id;
    use crate::storage::schema;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::migrate(&conn, false).unwrap();
        conn
    }

    #[test]
    fn test_create_and_get_by_id_tracks_access() {
        let conn = memory_conn();
        let id = new_id();
        create(
            &conn,
            &id,
            &NewMemory {
                content: "hello".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let m1 = get_by_id(&conn, &id).unwrap().unwrap();
        assert_eq!(m1.access_count, 1);
        let m2 = get_by_id(&conn, &id).unwrap().unwrap();
        assert_eq!(m2.access_count, 2);
    }

    #[test]
    fn test_get_by_id_missing_returns_none() {
        let conn = memory_conn();
        assert!(get_by_id(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_list_pagination_and_total() {
        let conn = memory_conn();
        for i in 0..5 {
            create(
                &conn,
                &new_id(),
                &NewMemory {
                    content: format!("memory {i}"),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        let (page, total) = list(
            &conn,
            &MemoryListFilters {
                limit: 2,
                offset: 0,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 5);
    }

    #[test]
    fn test_update_content_bumps_updated_at() {
        let conn = memory_conn();
        let id = new_id();
        create(
            &conn,
            &id,
            &NewMemory {
                content: "original".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let ok = update(
            &conn,
            &id,
            &MemoryPatch {
                content: Some("updated".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(ok);

        let m = peek(&conn, &id).unwrap().unwrap();
        assert_eq!(m.content, "updated");
    }

    #[test]
    fn test_delete_removes_chunks_and_tags() {
        let mut conn = memory_conn();
        let id = new_id();
        create(
            &conn,
            &id,
            &NewMemory {
                content: "x".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        conn.execute(
            "INSERT INTO chunks (id, memory_id, content, chunk_index, token_count, created_at) VALUES (?1, ?2, 'c', 0, 1, ?3)",
            params![new_id(), id, Utc::now().to_rfc3339()],
        )
        .unwrap();

        let deleted = delete(&mut conn, &id, false).unwrap();
        assert!(deleted);

        let chunk_count: i64 = conn
            .query_row("SELECT count(*) FROM chunks WHERE memory_id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(chunk_count, 0);
    }

    #[test]
    fn test_delete_missing_returns_false() {
        let mut conn = memory_conn();
        assert!(!delete(&mut conn, "missing", false).unwrap());
    }

    #[test]
    fn test_create_rule_floors_importance_and_pins_active_tier() {
        let conn = memory_conn();
        let id = new_id();
        create(
            &conn,
            &id,
            &NewMemory {
                content: "always use strict mode".to_string(),
                importance: Some(0.1),
                is_rule: true,
                ..Default::default()
            },
        )
        .unwrap();

        let m = peek(&conn, &id).unwrap().unwrap();
        assert!(m.importance_score >= 0.9);
        assert_eq!(m.storage_tier, StorageTier::Active);
    }

    #[test]
    fn test_update_marking_rule_floors_importance_and_tier() {
        let conn = memory_conn();
        let id = new_id();
        create(
            &conn,
            &id,
            &NewMemory {
                content: "x".to_string(),
                importance: Some(0.1),
                ..Default::default()
            },
        )
        .unwrap();
        update(
            &conn,
            &id,
            &MemoryPatch {
                storage_tier: Some(StorageTier::Archive),
                is_rule: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let m = peek(&conn, &id).unwrap().unwrap();
        assert!(m.importance_score >= 0.9);
        assert_eq!(m.storage_tier, StorageTier::Active);
    }
}
