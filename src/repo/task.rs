//! Task repository (C4, C8): the scheduler's state machine storage.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{NewTask, Task, TaskListFilters, TaskResult, TaskResultFilters, TaskStatus, TaskType};

fn opt_ts(row: &Row, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(col)?;
    Ok(s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

fn ts(row: &Row, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let task_type: String = row.get("task_type")?;
    let status: String = row.get("status")?;
    let context: Option<String> = row.get("context")?;

    Ok(Task {
        id: row.get("id")?,
        description: row.get("description")?,
        task_type: TaskType::parse(&task_type).unwrap_or(TaskType::Custom),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        priority: row.get("priority")?,
        project_id: row.get("project_id")?,
        repo_url: row.get("repo_url")?,
        scheduled_for: opt_ts(row, "scheduled_for")?,
        started_at: opt_ts(row, "started_at")?,
        completed_at: opt_ts(row, "completed_at")?,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        max_retries: row.get::<_, i64>("max_retries")? as u32,
        timeout_ms: row.get::<_, i64>("timeout_ms")? as u64,
        context: context.and_then(|c| serde_json::from_str(&c).ok()),
        created_at: ts(row, "created_at")?,
        updated_at: ts(row, "updated_at")?,
    })
}

/// Create a new task in state `pending`.
pub fn add(conn: &Connection, id: &str, input: &NewTask) -> Result<Task> {
    let now = Utc::now();
    let now_s = now.to_rfc3339();
    let context_json = input
        .context
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO tasks (
            id, description, task_type, status, priority, project_id, repo_url,
            scheduled_for, retry_count, max_retries, timeout_ms, context, created_at, updated_at
        ) VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?11, ?11)",
        params![
            id,
            input.description,
            input.task_type.as_str(),
            input.priority,
            input.project_id,
            input.repo_url,
            input.scheduled_for.map(|d| d.to_rfc3339()),
            input.max_retries,
            input.timeout_ms,
            context_json,
            now_s,
        ],
    )
    .context("inserting task")?;

    Ok(Task {
        id: id.to_string(),
        description: input.description.clone(),
        task_type: input.task_type,
        status: TaskStatus::Pending,
        priority: input.priority,
        project_id: input.project_id.clone(),
        repo_url: input.repo_url.clone(),
        scheduled_for: input.scheduled_for,
        started_at: None,
        completed_at: None,
        retry_count: 0,
        max_retries: input.max_retries,
        timeout_ms: input.timeout_ms,
        context: input.context.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Task>> {
    Ok(conn
        .query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
        .optional()?)
}

/// Pick the next claimable task: `scheduled_for` unset or in the past,
/// ordered by `priority DESC, created_at ASC`.
pub fn next_pending(conn: &Connection) -> Result<Option<Task>> {
    let now = Utc::now().to_rfc3339();
    Ok(conn
        .query_row(
            "SELECT * FROM tasks
             WHERE status = 'pending' AND (scheduled_for IS NULL OR scheduled_for <= ?1)
             ORDER BY priority DESC, created_at ASC
             LIMIT 1",
            params![now],
            row_to_task,
        )
        .optional()?)
}

/// Atomically transition `pending -> running`. Returns whether this call
/// won the race (false if another caller already claimed it, or it was in
/// any other state).
pub fn claim(conn: &Connection, id: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE tasks SET status = 'running', started_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status = 'pending'",
        params![id, now],
    )?;
    Ok(updated > 0)
}

/// Record a successful run: `running -> completed`, append the result row.
pub fn complete(
    conn: &mut Connection,
    id: &str,
    result: &TaskResult,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE tasks SET status = 'completed', completed_at = ?2, updated_at = ?2 WHERE id = ?1",
        params![id, now],
    )?;
    insert_result(&tx, result)?;
    tx.commit()?;
    Ok(())
}

/// Record a failed run. If retries remain, `running -> pending` with
/// `retry_count += 1`; otherwise `running -> failed` plus a failure result.
pub fn fail(
    conn: &mut Connection,
    id: &str,
    result: &TaskResult,
) -> Result<TaskStatus> {
    let task = get(conn, id)?.context("task not found")?;
    let now = Utc::now().to_rfc3339();

    let tx = conn.transaction()?;
    let next_status = if task.retry_count < task.max_retries {
        tx.execute(
            "UPDATE tasks SET status = 'pending', started_at = NULL, retry_count = retry_count + 1, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        TaskStatus::Pending
    } else {
        tx.execute(
            "UPDATE tasks SET status = 'failed', completed_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        insert_result(&tx, result)?;
        TaskStatus::Failed
    };
    tx.commit()?;
    Ok(next_status)
}

/// `pending -> cancelled`. Returns whether the transition happened (false
/// for tasks in any other state, including `running`).
pub fn cancel(conn: &Connection, id: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE tasks SET status = 'cancelled', updated_at = ?2 WHERE id = ?1 AND status = 'pending'",
        params![id, now],
    )?;
    Ok(updated > 0)
}

fn insert_result(conn: &Connection, result: &TaskResult) -> Result<()> {
    conn.execute(
        "INSERT INTO task_results (
            id, task_id, output, summary, success, error, duration_ms,
            tokens_used, cost_usd, memory_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            result.id,
            result.task_id,
            result.output,
            result.summary,
            result.success as i64,
            result.error,
            result.duration_ms,
            result.tokens_used,
            result.cost_usd,
            result.memory_id,
            result.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn list(conn: &Connection, filters: &TaskListFilters) -> Result<Vec<Task>> {
    let mut where_clauses = Vec::new();
    let mut bind: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(status) = filters.status {
        where_clauses.push("status = ?".to_string());
        bind.push(Box::new(status.as_str().to_string()));
    }
    if let Some(project_id) = &filters.project_id {
        where_clauses.push("project_id = ?".to_string());
        bind.push(Box::new(project_id.clone()));
    }
    if let Some(since) = filters.since {
        where_clauses.push("created_at >= ?".to_string());
        bind.push(Box::new(since.to_rfc3339()));
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    let sql = format!(
        "SELECT * FROM tasks {where_sql} ORDER BY created_at DESC, id ASC LIMIT ?{}",
        bind.len() + 1
    );
    bind.push(Box::new(filters.limit as i64));
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = bind.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), row_to_task)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn get_results(conn: &Connection, filters: &TaskResultFilters) -> Result<Vec<TaskResult>> {
    let mut where_clauses = Vec::new();
    let mut bind: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(task_id) = &filters.task_id {
        where_clauses.push("task_id = ?".to_string());
        bind.push(Box::new(task_id.clone()));
    }
    if let Some(since) = filters.since {
        where_clauses.push("created_at >= ?".to_string());
        bind.push(Box::new(since.to_rfc3339()));
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    let sql = format!(
        "SELECT * FROM task_results {where_sql} ORDER BY created_at DESC LIMIT ?{}",
        bind.len() + 1
    );
    bind.push(Box::new(filters.limit as i64));
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = bind.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        let created_at: String = row.get("created_at")?;
        Ok(TaskResult {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            output: row.get("output")?,
            summary: row.get("summary")?,
            success: row.get::<_, i64>("success")? != 0,
            error: row.get("error")?,
            duration_ms: row.get::<_, i64>("duration_ms")? as u64,
            tokens_used: row.get("tokens_used")?,
            cost_usd: row.get("cost_usd")?,
            memory_id: row.get("memory_id")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .unwrap()
                .with_timezone(&Utc),
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}
