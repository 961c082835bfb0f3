//! Tool handlers (C10, spec §4.10): dispatch from validated inputs to the
//! C4-C8 operations, returning structured responses. This is the boundary
//! `spec.md` describes as "documented for completeness, not the hard
//! part"; `mcp.rs` wraps these functions for the MCP transport, and they
//! convert any core failure into `error::Error` rather than letting a raw
//! `rusqlite`/`anyhow` error escape.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{
    Memory, MemoryListFilters, MemoryPatch, MemorySource, MemoryType, NewMemory, NewTask,
    SearchFilters, SearchHit, Task, TaskListFilters, TaskResult, TaskResultFilters, TaskType,
};
use crate::repo::{chunk, memory, tag};
use crate::scheduler::Scheduler;
use crate::storage::{self, Handle};
use crate::{importance, project, search, store};

/// Shared core state backing every tool handler: configuration, the
/// embedding provider, and the scheduler (which owns the global database
/// handle tasks and task results always live in -- see DESIGN.md for why
/// tasks are not sharded per project).
pub struct Core {
    config: Config,
    provider: EmbeddingProvider,
    pub scheduler: Arc<Scheduler>,
}

impl Core {
    pub fn new(config: Config, scheduler: Arc<Scheduler>) -> Self {
        let provider = EmbeddingProvider::new(
            &config.embedding.api_base,
            config.embedding.api_key.as_deref(),
            &config.embedding.model,
        );
        Self {
            config,
            provider,
            scheduler,
        }
    }

    fn handle_for(&self, project: Option<&str>) -> anyhow::Result<Arc<Handle>> {
        match project {
            Some(id) => storage::project_handle(
                &self.config.data_dir,
                id,
                self.config.vec_extension_path.as_deref(),
            ),
            None => storage::global_handle(&self.config.data_dir, self.config.vec_extension_path.as_deref()),
        }
    }
}

// ===================== store =====================

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct StoreInput {
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub source: Option<String>,
    pub metadata: Option<Value>,
    pub memory_type: Option<String>,
    pub importance: Option<f32>,
    #[serde(default)]
    pub is_rule: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreOutput {
    pub id: String,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplicated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub similar_memories: Vec<String>,
}

pub fn store(core: &Core, input: StoreInput) -> Result<StoreOutput> {
    if input.text.trim().is_empty() {
        return Err(Error::validation("text must not be empty"));
    }

    let handle = core.handle_for(input.project.as_deref())?;
    let mut conn = handle.conn.lock().expect("db handle poisoned");

    let new_memory = NewMemory {
        content: input.text,
        tags: input.tags,
        project_id: input.project,
        source: input.source.as_deref().and_then(MemorySource::parse),
        metadata: input.metadata,
        memory_type: input.memory_type.as_deref().and_then(MemoryType::parse),
        importance: input.importance,
        is_rule: input.is_rule,
    };

    let outcome = store::store(
        &mut conn,
        &core.provider,
        handle.vec_available,
        core.config.chunk.max_tokens,
        core.config.chunk.overlap_tokens,
        &new_memory,
    )?;

    Ok(StoreOutput {
        id: outcome.id,
        chunks: outcome.chunks_written,
        deduplicated: outcome.deduplicated.then_some(true),
        merged: outcome.merged.then_some(true),
        similar_memories: outcome.similar_memories,
    })
}

// ===================== search =====================

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    Global,
    Project,
    All,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct SearchInput {
    pub query: String,
    #[serde(default = "default_scope")]
    pub scope: SearchScope,
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default)]
    pub include_archived: bool,
}

fn default_scope() -> SearchScope {
    SearchScope::All
}
fn default_max_results() -> usize {
    10
}
fn default_min_score() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub memory: Memory,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutput {
    pub results: Vec<SearchResultItem>,
}

pub fn search(core: &Core, input: SearchInput) -> Result<SearchOutput> {
    let max_results = input.max_results.clamp(1, 50);
    if !(0.0..=1.0).contains(&input.min_score) {
        return Err(Error::validation("minScore must be within [0, 1]"));
    }

    let filters = SearchFilters {
        project_id: input.project.clone(),
        tags: input.tags,
        max_results,
        min_score: input.min_score,
        vector_weight: core.config.search.vector_weight,
        fts_weight: core.config.search.fts_weight,
        include_archived: input.include_archived,
    };

    let mut hits: Vec<SearchHit> = Vec::new();

    let search_global = matches!(input.scope, SearchScope::Global | SearchScope::All);
    let search_project = matches!(input.scope, SearchScope::Project | SearchScope::All) && input.project.is_some();

    if matches!(input.scope, SearchScope::Project) && input.project.is_none() {
        return Err(Error::validation("scope=project requires a project id"));
    }

    if search_global {
        let handle = core.handle_for(None)?;
        let conn = handle.conn.lock().expect("db handle poisoned");
        hits.extend(search::search(&conn, &core.provider, handle.vec_available, &input.query, &filters)?);
    }
    if search_project {
        let handle = core.handle_for(input.project.as_deref())?;
        let conn = handle.conn.lock().expect("db handle poisoned");
        hits.extend(search::search(&conn, &core.provider, handle.vec_available, &input.query, &filters)?);
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    hits.truncate(max_results);

    Ok(SearchOutput {
        results: hits
            .into_iter()
            .map(|h| SearchResultItem {
                memory: h.memory,
                score: h.score,
            })
            .collect(),
    })
}

// ===================== get =====================

pub fn get(core: &Core, id: &str, project: Option<&str>) -> Result<Memory> {
    let handle = core.handle_for(project)?;
    let conn = handle.conn.lock().expect("db handle poisoned");
    let mut mem = memory::get_by_id(&conn, id)?.ok_or_else(|| Error::not_found(format!("memory {id}")))?;
    mem.tags = tag::get_for_memory(&conn, id)?;
    Ok(mem)
}

// ===================== list =====================

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct ListInput {
    pub project: Option<String>,
    pub tag: Option<String>,
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    #[serde(default = "default_list_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_list_limit() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize)]
pub struct ListOutput {
    pub memories: Vec<Memory>,
    pub total: u64,
}

pub fn list(core: &Core, input: ListInput) -> Result<ListOutput> {
    let limit = input.limit.clamp(1, 100);
    let handle = core.handle_for(input.project.as_deref())?;
    let conn = handle.conn.lock().expect("db handle poisoned");

    let filters = MemoryListFilters {
        project_id: input.project,
        tag: input.tag,
        source: input.source.as_deref().and_then(MemorySource::parse),
        since: input.since,
        limit,
        offset: input.offset,
    };

    let (mut memories, total) = memory::list(&conn, &filters)?;
    let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
    let tags = tag::get_for_memories(&conn, &ids)?;
    for m in &mut memories {
        m.tags = tags.get(&m.id).cloned().unwrap_or_default();
    }

    Ok(ListOutput { memories, total })
}

// ===================== update =====================

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct UpdateInput {
    pub id: String,
    pub project: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Value>,
    pub memory_type: Option<String>,
    pub importance_score: Option<f32>,
    pub is_rule: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutput {
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
}

pub fn update(core: &Core, input: UpdateInput) -> Result<UpdateOutput> {
    let handle = core.handle_for(input.project.as_deref())?;
    let mut conn = handle.conn.lock().expect("db handle poisoned");

    if memory::peek(&conn, &input.id)?.is_none() {
        return Err(Error::not_found(format!("memory {}", input.id)));
    }

    let patch = MemoryPatch {
        content: input.content.clone(),
        tags: None,
        metadata: input.metadata,
        memory_type: input.memory_type.as_deref().and_then(MemoryType::parse),
        importance_score: input.importance_score,
        is_rule: input.is_rule,
        storage_tier: None,
    };
    let updated = memory::update(&conn, &input.id, &patch)?;

    if let Some(tags) = &input.tags {
        tag::set_for_memory(&mut conn, &input.id, tags)?;
    }

    let chunks = if let Some(content) = &input.content {
        chunk::delete_by_memory(&mut conn, &input.id, handle.vec_available)?;
        let pieces = crate::chunker::chunk(content, core.config.chunk.max_tokens, core.config.chunk.overlap_tokens);
        let mut with_embeddings = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let vector = crate::embedding::embed(&core.provider, &conn, &piece.content, crate::embedding::EmbedKind::Document)?;
            with_embeddings.push((piece, vector));
        }
        Some(chunk::create_chunks(&mut conn, &input.id, &with_embeddings, handle.vec_available)?)
    } else {
        None
    };

    Ok(UpdateOutput { updated, chunks })
}

// ===================== delete =====================

pub fn delete(core: &Core, id: &str, project: Option<&str>) -> Result<bool> {
    let handle = core.handle_for(project)?;
    let mut conn = handle.conn.lock().expect("db handle poisoned");
    chunk::delete_by_memory(&mut conn, id, handle.vec_available)?;
    Ok(memory::delete(&mut conn, id, handle.vec_available)?)
}

// ===================== cleanup =====================

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct CleanupInput {
    pub older_than: Option<DateTime<Utc>>,
    pub max_count: Option<u32>,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    pub project: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupOutput {
    pub would_delete: u64,
    pub deleted: u64,
    pub dry_run: bool,
}

/// Cleanup scoped to a single database (spec §9 design note (c): a
/// `project` filter never reaches across into the global database, even if
/// memories there would otherwise match the age filter).
pub fn cleanup(core: &Core, input: CleanupInput) -> Result<CleanupOutput> {
    let Some(older_than) = input.older_than else {
        return Ok(CleanupOutput {
            would_delete: 0,
            deleted: 0,
            dry_run: true,
        });
    };

    let handle = core.handle_for(input.project.as_deref())?;
    let mut conn = handle.conn.lock().expect("db handle poisoned");

    let mut candidates = memory::all(&conn)?;
    candidates.retain(|m| m.created_at < older_than);
    candidates.sort_by_key(|m| m.created_at);
    if let Some(max) = input.max_count {
        candidates.truncate(max as usize);
    }

    let count = candidates.len() as u64;
    if input.dry_run {
        return Ok(CleanupOutput {
            would_delete: count,
            deleted: 0,
            dry_run: true,
        });
    }

    for m in &candidates {
        chunk::delete_by_memory(&mut conn, &m.id, handle.vec_available)?;
        memory::delete(&mut conn, &m.id, handle.vec_available)?;
    }

    Ok(CleanupOutput {
        would_delete: count,
        deleted: count,
        dry_run: false,
    })
}

// ===================== feedback =====================

#[derive(Debug, Clone, Copy, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Useful,
    Outdated,
    Wrong,
    Duplicate,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct FeedbackInput {
    pub id: String,
    pub rating: Rating,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackOutput {
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_importance: Option<f32>,
    pub action: String,
}

/// Apply a feedback effect (spec §6.1 "Feedback effects").
pub fn feedback(core: &Core, input: FeedbackInput) -> Result<FeedbackOutput> {
    let handle = core.handle_for(input.project.as_deref())?;
    let conn = handle.conn.lock().expect("db handle poisoned");

    let mem = memory::peek(&conn, &input.id)?.ok_or_else(|| Error::not_found(format!("memory {}", input.id)))?;

    let (new_importance, action, tag_to_add) = match input.rating {
        Rating::Useful => ((mem.importance_score + 0.1).min(1.0), "importance increased", None),
        Rating::Outdated => (mem.importance_score * 0.5, "importance halved", None),
        Rating::Wrong => (0.0, "importance zeroed, flagged disputed", Some("disputed")),
        Rating::Duplicate => (mem.importance_score, "flagged consolidation-candidate", Some("consolidation-candidate")),
    };

    if !matches!(input.rating, Rating::Duplicate) {
        memory::set_importance(&conn, &input.id, new_importance)?;
    }
    if let Some(tag_name) = tag_to_add {
        tag::add_to_memory(&conn, &input.id, tag_name)?;
    }

    Ok(FeedbackOutput {
        updated: true,
        new_importance: (!matches!(input.rating, Rating::Duplicate)).then_some(new_importance),
        action: action.to_string(),
    })
}

// ===================== bulk_delete =====================

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct BulkDeleteInput {
    pub tag: Option<String>,
    pub project: Option<String>,
    pub older_than: Option<DateTime<Utc>>,
    #[serde(default)]
    pub confirm: bool,
}

pub fn bulk_delete(core: &Core, input: BulkDeleteInput) -> Result<u64> {
    if !input.confirm {
        return Err(Error::validation("bulk_delete requires confirm=true"));
    }
    if input.tag.is_none() && input.project.is_none() && input.older_than.is_none() {
        return Err(Error::validation("bulk_delete requires at least one of tag, project, older_than"));
    }

    let handle = core.handle_for(input.project.as_deref())?;
    let mut conn = handle.conn.lock().expect("db handle poisoned");

    let filters = MemoryListFilters {
        project_id: input.project.clone(),
        tag: input.tag.clone(),
        source: None,
        since: None,
        limit: u32::MAX,
        offset: 0,
    };
    let (mut candidates, _) = memory::list(&conn, &filters)?;
    if let Some(older_than) = input.older_than {
        candidates.retain(|m| m.created_at < older_than);
    }

    for m in &candidates {
        chunk::delete_by_memory(&mut conn, &m.id, handle.vec_available)?;
        memory::delete(&mut conn, &m.id, handle.vec_available)?;
    }

    Ok(candidates.len() as u64)
}

// ===================== export / import =====================

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Json,
    Markdown,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct ExportInput {
    pub project: Option<String>,
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutput {
    pub data: String,
    pub count: usize,
    pub format: String,
}

/// Portable record used by both `export` and `import`; round-tripping on
/// `(content, tags, source, memory_type, is_rule, project_id)` is the
/// invariant spec §8 tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub memory_type: String,
    pub is_rule: bool,
    pub project_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub fn export(core: &Core, input: ExportInput) -> Result<ExportOutput> {
    let handle = core.handle_for(input.project.as_deref())?;
    let conn = handle.conn.lock().expect("db handle poisoned");

    let memories = memory::all(&conn)?;
    let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
    let tags_by_memory = tag::get_for_memories(&conn, &ids)?;

    let records: Vec<ExportRecord> = memories
        .iter()
        .map(|m| ExportRecord {
            content: m.content.clone(),
            tags: tags_by_memory.get(&m.id).cloned().unwrap_or_default(),
            source: m.source.map(|s| s.as_str().to_string()),
            memory_type: m.memory_type.as_str().to_string(),
            is_rule: m.is_rule,
            project_id: m.project_id.clone(),
            metadata: m.metadata.clone(),
        })
        .collect();

    let (data, format_str) = match input.format {
        ExportFormat::Json => (serde_json::to_string(&records)?, "json"),
        ExportFormat::Markdown => (render_markdown(&records), "markdown"),
    };

    Ok(ExportOutput {
        count: records.len(),
        data,
        format: format_str.to_string(),
    })
}

fn render_markdown(records: &[ExportRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str("## Memory\n\n");
        out.push_str(&record.content);
        out.push_str("\n\n");
        if !record.tags.is_empty() {
            out.push_str(&format!("Tags: {}\n\n", record.tags.join(", ")));
        }
        out.push_str("---\n\n");
    }
    out
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct ImportInput {
    pub data: String,
    #[serde(default)]
    pub format: ExportFormat,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutput {
    pub imported: usize,
    pub errors: usize,
}

/// Import never raises on malformed input (spec §7): on a parse failure it
/// returns `{imported: 0, errors: 1}`.
pub fn import(core: &Core, input: ImportInput) -> Result<ImportOutput> {
    let records: Vec<ExportRecord> = match input.format {
        ExportFormat::Json => match serde_json::from_str(&input.data) {
            Ok(records) => records,
            Err(_) => return Ok(ImportOutput { imported: 0, errors: 1 }),
        },
        ExportFormat::Markdown => return Ok(ImportOutput { imported: 0, errors: 1 }),
    };

    let handle = core.handle_for(input.project.as_deref())?;
    let mut conn = handle.conn.lock().expect("db handle poisoned");

    let mut imported = 0usize;
    let mut errors = 0usize;

    for record in records {
        let new_memory = NewMemory {
            content: record.content,
            tags: record.tags,
            project_id: record.project_id.or_else(|| input.project.clone()),
            source: record.source.as_deref().and_then(MemorySource::parse),
            metadata: record.metadata,
            memory_type: MemoryType::parse(&record.memory_type),
            importance: None,
            is_rule: record.is_rule,
        };

        match store::store(
            &mut conn,
            &core.provider,
            handle.vec_available,
            core.config.chunk.max_tokens,
            core.config.chunk.overlap_tokens,
            &new_memory,
        ) {
            Ok(_) => imported += 1,
            Err(_) => errors += 1,
        }
    }

    Ok(ImportOutput { imported, errors })
}

// ===================== tasks =====================

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct TaskAddInput {
    pub description: String,
    pub task_type: Option<String>,
    pub project: Option<String>,
    pub repo_url: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub context: Option<Value>,
    pub timeout_ms: Option<u64>,
}

fn default_priority() -> i32 {
    5
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskAddOutput {
    pub id: String,
    pub scheduled_for: Option<DateTime<Utc>>,
}

pub fn task_add(core: &Core, input: TaskAddInput) -> Result<TaskAddOutput> {
    if input.description.trim().is_empty() {
        return Err(Error::validation("description must not be empty"));
    }
    if !(1..=10).contains(&input.priority) {
        return Err(Error::validation("priority must be within [1, 10]"));
    }

    let new_task = NewTask {
        description: input.description,
        task_type: input.task_type.as_deref().and_then(TaskType::parse).unwrap_or(TaskType::Custom),
        project_id: input.project,
        repo_url: input.repo_url,
        priority: input.priority,
        scheduled_for: input.scheduled_for,
        context: input.context,
        timeout_ms: input.timeout_ms.unwrap_or(core.config.task_timeout_ms),
        max_retries: 3,
    };

    let task = core.scheduler.add(&new_task)?;
    Ok(TaskAddOutput {
        id: task.id,
        scheduled_for: task.scheduled_for,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct TaskListInput {
    pub status: Option<String>,
    pub project: Option<String>,
    pub since: Option<DateTime<Utc>>,
    #[serde(default = "default_list_limit")]
    pub limit: u32,
}

pub fn task_list(core: &Core, input: TaskListInput) -> Result<Vec<Task>> {
    let limit = input.limit.clamp(1, 100);
    let filters = TaskListFilters {
        status: input.status.as_deref().and_then(crate::models::TaskStatus::parse),
        project_id: input.project,
        since: input.since,
        limit,
    };
    Ok(core.scheduler.list(&filters)?)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct TaskResultsInput {
    pub task_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    #[serde(default = "default_task_results_limit")]
    pub limit: u32,
}

fn default_task_results_limit() -> u32 {
    10
}

pub fn task_results(core: &Core, input: TaskResultsInput) -> Result<Vec<TaskResult>> {
    let limit = input.limit.clamp(1, 100);
    let filters = TaskResultFilters {
        task_id: input.task_id,
        since: input.since,
        limit,
    };
    Ok(core.scheduler.get_results(&filters)?)
}

pub fn task_cancel(core: &Core, id: &str) -> Result<bool> {
    Ok(core.scheduler.cancel(id)?)
}

// ===================== single-id inputs (MCP tool parameters) =====================

/// Parameters shared by `get` and `delete`, which the core functions above
/// take as bare `(id, project)` arguments for direct Rust callers.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct GetInput {
    pub id: String,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct DeleteInput {
    pub id: String,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct TaskCancelInput {
    pub id: String,
}

// ===================== project resolution passthrough =====================

pub fn resolve_project(cwd: &Path) -> project::ProjectIdentity {
    project::detect(cwd)
}

// ===================== periodic jobs passthrough =====================

pub fn recompute_importance(core: &Core, project: Option<&str>) -> Result<usize> {
    let handle = core.handle_for(project)?;
    let mut conn = handle.conn.lock().expect("db handle poisoned");
    Ok(importance::recompute_all(&mut conn)?)
}

pub fn run_tiering(core: &Core, project: Option<&str>) -> Result<importance::TieringCounts> {
    let handle = core.handle_for(project)?;
    let mut conn = handle.conn.lock().expect("db handle poisoned");
    Ok(importance::run_tiering(&mut conn)?)
}

pub fn run_consolidation(core: &Core, project: Option<&str>, max_per_run: usize) -> Result<importance::ConsolidationCounts> {
    let handle = core.handle_for(project)?;
    let mut conn = handle.conn.lock().expect("db handle poisoned");
    Ok(importance::run_consolidation(
        &mut conn,
        &core.provider,
        handle.vec_available,
        core.config.chunk.max_tokens,
        core.config.chunk.overlap_tokens,
        max_per_run,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{MockRunner, Scheduler};
    use tempfile::TempDir;

    fn test_core() -> (TempDir, Core) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();

        let global_handle = storage::global_handle(&config.data_dir, None).unwrap();
        let runner: Arc<dyn crate::scheduler::Runner> = Arc::new(MockRunner::always_succeed());
        let scheduler = Arc::new(Scheduler::new(global_handle, runner, config.scheduler_cron.clone()));

        (dir, Core::new(config, scheduler))
    }

    #[test]
    fn test_cleanup_without_older_than_is_noop() {
        let (_dir, core) = test_core();
        let out = cleanup(&core, CleanupInput::default()).unwrap();
        assert_eq!(out.would_delete, 0);
        assert_eq!(out.deleted, 0);
        assert!(out.dry_run);
    }

    #[test]
    fn test_bulk_delete_requires_confirm() {
        let (_dir, core) = test_core();
        let err = bulk_delete(
            &core,
            BulkDeleteInput {
                tag: Some("x".to_string()),
                confirm: false,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_bulk_delete_requires_a_filter() {
        let (_dir, core) = test_core();
        let err = bulk_delete(
            &core,
            BulkDeleteInput {
                confirm: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_import_malformed_json_reports_one_error() {
        let (_dir, core) = test_core();
        let out = import(
            &core,
            ImportInput {
                data: "not json".to_string(),
                format: ExportFormat::Json,
                project: None,
            },
        )
        .unwrap();
        assert_eq!(out.imported, 0);
        assert_eq!(out.errors, 1);
    }

    #[test]
    fn test_get_missing_returns_not_found() {
        let (_dir, core) = test_core();
        let err = get(&core, "missing", None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_task_add_and_cancel() {
        let (_dir, core) = test_core();
        let added = task_add(
            &core,
            TaskAddInput {
                description: "review".to_string(),
                task_type: None,
                project: None,
                repo_url: None,
                priority: 5,
                scheduled_for: None,
                context: None,
                timeout_ms: None,
            },
        )
        .unwrap();
        assert!(task_cancel(&core, &added.id).unwrap());
        assert!(!task_cancel(&core, &added.id).unwrap());
    }

    #[test]
    fn test_task_add_rejects_invalid_priority() {
        let (_dir, core) = test_core();
        let err = task_add(
            &core,
            TaskAddInput {
                description: "review".to_string(),
                task_type: None,
                project: None,
                repo_url: None,
                priority: 99,
                scheduled_for: None,
                context: None,
                timeout_ms: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_search_empty_query_via_tools_returns_empty() {
        let (_dir, core) = test_core();
        let out = search(
            &core,
            SearchInput {
                query: "".to_string(),
                scope: SearchScope::Global,
                project: None,
                tags: Vec::new(),
                max_results: 10,
                min_score: 0.3,
                include_archived: false,
            },
        )
        .unwrap();
        assert!(out.results.is_empty());
    }
}
