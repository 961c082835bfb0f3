//! Forward-only schema migrations, in the style of `storage/index.rs`'s
//! inline `CREATE TABLE IF NOT EXISTS` + FTS5 trigger setup, generalized to
//! a small migration ladder tracked in a `meta` table.

use rusqlite::Connection;
use tracing::info;

const CURRENT_VERSION: i64 = 1;

pub fn migrate(conn: &Connection, vec_available: bool) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    let version: i64 = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if version < 1 {
        apply_v1(conn, vec_available)?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![CURRENT_VERSION.to_string()],
        )?;
        info!(version = CURRENT_VERSION, "applied schema migration");
    }

    Ok(())
}

fn apply_v1(conn: &Connection, vec_available: bool) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memories (
            id                TEXT PRIMARY KEY,
            content           TEXT NOT NULL,
            source            TEXT,
            project_id        TEXT,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL,
            last_accessed_at  TEXT NOT NULL,
            access_count      INTEGER NOT NULL DEFAULT 0,
            metadata          TEXT,
            memory_type       TEXT NOT NULL DEFAULT 'general',
            importance_score  REAL NOT NULL DEFAULT 0.5,
            is_rule           INTEGER NOT NULL DEFAULT 0,
            storage_tier      TEXT NOT NULL DEFAULT 'active'
        );
        CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project_id);
        CREATE INDEX IF NOT EXISTS idx_memories_tier ON memories(storage_tier);
        CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
        CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);

        CREATE TABLE IF NOT EXISTS tags (
            id   TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS memory_tags (
            memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            tag_id    TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (memory_id, tag_id)
        );
        CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag_id);

        CREATE TABLE IF NOT EXISTS chunks (
            id          TEXT PRIMARY KEY,
            memory_id   TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            token_count INTEGER NOT NULL,
            embedding   BLOB,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_memory ON chunks(memory_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
            content,
            content='chunks',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
            INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
        END;
        CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
        END;
        CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
            INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
        END;

        CREATE TABLE IF NOT EXISTS embedding_cache (
            key        TEXT PRIMARY KEY,
            embedding  BLOB NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id             TEXT PRIMARY KEY,
            description    TEXT NOT NULL,
            task_type      TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'pending',
            priority       INTEGER NOT NULL DEFAULT 0,
            project_id     TEXT,
            repo_url       TEXT,
            scheduled_for  TEXT,
            started_at     TEXT,
            completed_at   TEXT,
            retry_count    INTEGER NOT NULL DEFAULT 0,
            max_retries    INTEGER NOT NULL DEFAULT 3,
            timeout_ms     INTEGER NOT NULL DEFAULT 1800000,
            context        TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_scheduled ON tasks(scheduled_for);

        CREATE TABLE IF NOT EXISTS task_results (
            id          TEXT PRIMARY KEY,
            task_id     TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            output      TEXT,
            summary     TEXT,
            success     INTEGER NOT NULL,
            error       TEXT,
            duration_ms INTEGER NOT NULL,
            tokens_used INTEGER,
            cost_usd    REAL,
            memory_id   TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_task_results_task ON task_results(task_id);
        ",
    )?;

    if vec_available {
        // Native vector index mirrors `chunks` by rowid; populated lazily by
        // the chunk repository rather than via triggers, since the vector
        // extension's insert shape differs from a plain column copy.
        let _ = conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vec USING vec0(
                embedding float[768]
            );",
        );
    }

    Ok(())
}
