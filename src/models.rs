//! Shared row/DTO types used across the repositories, search, store pipeline,
//! importance/tiering jobs, and the task scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Render a fresh id as lowercase hex (not RFC 4122 hyphenated text).
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Where a memory's content originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemorySource {
    User,
    SessionSummary,
    Automation,
    Hook,
    Extraction,
    Consolidation,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::User => "user",
            MemorySource::SessionSummary => "session-summary",
            MemorySource::Automation => "automation",
            MemorySource::Hook => "hook",
            MemorySource::Extraction => "extraction",
            MemorySource::Consolidation => "consolidation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "session-summary" => Some(Self::SessionSummary),
            "automation" => Some(Self::Automation),
            "hook" => Some(Self::Hook),
            "extraction" => Some(Self::Extraction),
            "consolidation" => Some(Self::Consolidation),
            _ => None,
        }
    }
}

/// The kind of content a memory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryType {
    General,
    Preference,
    Learning,
    Objective,
    Mistake,
    Rule,
    Episode,
}

impl Default for MemoryType {
    fn default() -> Self {
        MemoryType::General
    }
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::General => "general",
            MemoryType::Preference => "preference",
            MemoryType::Learning => "learning",
            MemoryType::Objective => "objective",
            MemoryType::Mistake => "mistake",
            MemoryType::Rule => "rule",
            MemoryType::Episode => "episode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(Self::General),
            "preference" => Some(Self::Preference),
            "learning" => Some(Self::Learning),
            "objective" => Some(Self::Objective),
            "mistake" => Some(Self::Mistake),
            "rule" => Some(Self::Rule),
            "episode" => Some(Self::Episode),
            _ => None,
        }
    }
}

/// Storage tier, gating visibility in search and eligibility for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Active,
    Working,
    Archive,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Active => "active",
            StorageTier::Working => "working",
            StorageTier::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "working" => Some(Self::Working),
            "archive" => Some(Self::Archive),
            _ => None,
        }
    }
}

/// The atomic unit of recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub source: Option<MemorySource>,
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub metadata: Option<Value>,
    pub memory_type: MemoryType,
    pub importance_score: f32,
    pub is_rule: bool,
    pub storage_tier: StorageTier,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A contiguous piece of a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub memory_id: String,
    pub content: String,
    pub chunk_index: u32,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when creating a new memory through the store pipeline.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub content: String,
    pub tags: Vec<String>,
    pub project_id: Option<String>,
    pub source: Option<MemorySource>,
    pub metadata: Option<Value>,
    pub memory_type: Option<MemoryType>,
    pub importance: Option<f32>,
    pub is_rule: bool,
}

/// Partial update accepted by `update`.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Value>,
    pub memory_type: Option<MemoryType>,
    pub importance_score: Option<f32>,
    pub is_rule: Option<bool>,
    pub storage_tier: Option<StorageTier>,
}

/// Filters accepted by the memory repository's `list`.
#[derive(Debug, Clone, Default)]
pub struct MemoryListFilters {
    pub project_id: Option<String>,
    pub tag: Option<String>,
    pub source: Option<MemorySource>,
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

/// Type of background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    CodeReview,
    TestRunner,
    DocUpdater,
    Refactor,
    Custom,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CodeReview => "code-review",
            TaskType::TestRunner => "test-runner",
            TaskType::DocUpdater => "doc-updater",
            TaskType::Refactor => "refactor",
            TaskType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code-review" => Some(Self::CodeReview),
            "test-runner" => Some(Self::TestRunner),
            "doc-updater" => Some(Self::DocUpdater),
            "refactor" => Some(Self::Refactor),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Task lifecycle state. See the state machine in spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A scheduled or queued background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i32,
    pub project_id: Option<String>,
    pub repo_url: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub context: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted by `task_add`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub description: String,
    pub task_type: TaskType,
    pub project_id: Option<String>,
    pub repo_url: Option<String>,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub context: Option<Value>,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

/// Filters accepted by `task_list`.
#[derive(Debug, Clone, Default)]
pub struct TaskListFilters {
    pub status: Option<TaskStatus>,
    pub project_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
}

/// The output of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub task_id: String,
    pub output: Option<String>,
    pub summary: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
    pub memory_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filters accepted by `task_results`.
#[derive(Debug, Clone, Default)]
pub struct TaskResultFilters {
    pub task_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
}

/// Filters accepted by the hybrid search operation (spec §4.5).
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub project_id: Option<String>,
    pub tags: Vec<String>,
    pub max_results: usize,
    pub min_score: f32,
    pub vector_weight: f32,
    pub fts_weight: f32,
    pub include_archived: bool,
}

/// One ranked hit from hybrid search: a memory plus its fused score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub memory: Memory,
    pub score: f32,
}
