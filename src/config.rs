//! Config module - loads and saves the memory store's TOML configuration.
//!
//! Unknown keys in an on-disk config file are silently ignored, since none
//! of these structs use `#[serde(deny_unknown_fields)]`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Chunking defaults (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

fn default_max_tokens() -> usize {
    500
}
fn default_overlap_tokens() -> usize {
    100
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

/// Hybrid search defaults (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_fts_weight")]
    pub fts_weight: f32,
}

fn default_max_results() -> usize {
    10
}
fn default_min_score() -> f32 {
    0.3
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_fts_weight() -> f32 {
    0.3
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_score: default_min_score(),
            vector_weight: default_vector_weight(),
            fts_weight: default_fts_weight(),
        }
    }
}

/// Embedding provider configuration (spec §4.3), in the shape the reference
/// codebase already used for its own provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_api_base() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_batch_size() -> usize {
    32
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            model: default_model(),
            batch_size: default_batch_size(),
        }
    }
}

/// Selects which `Runner` (spec §4.8) the scheduler dispatches tasks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskRunnerConfig {
    /// Posts the task to an HTTP endpoint speaking the runner request/response JSON.
    Http { endpoint: String, api_key: Option<String> },
    /// Invokes a local child process with the task description as its argument.
    Process { program: String, args: Vec<String> },
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        TaskRunnerConfig::Process {
            program: "codemem-runner".to_string(),
            args: Vec::new(),
        }
    }
}

fn default_embedding_dim() -> usize {
    768
}

fn default_task_timeout_ms() -> u64 {
    1_800_000
}

fn default_scheduler_cron() -> String {
    "0 0 */6 * * *".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("codemem"))
        .unwrap_or_else(|| PathBuf::from("./codemem-data"))
}

/// Top-level configuration for the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `global.db` and `projects/<id>/project.db`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Path to a native vector-search SQLite extension, if available.
    #[serde(default)]
    pub vec_extension_path: Option<PathBuf>,

    /// Embedding vector dimension (D in the spec).
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    #[serde(default)]
    pub chunk: ChunkConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Deadline applied to each scheduled task's execution.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Cron expression driving the scheduler's trigger.
    #[serde(default = "default_scheduler_cron")]
    pub scheduler_cron: String,

    /// Whether the scheduler runs at all.
    #[serde(default)]
    pub scheduler_enabled: bool,

    /// Which `Runner` the scheduler dispatches claimed tasks to.
    #[serde(default)]
    pub task_runner: TaskRunnerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            vec_extension_path: None,
            embedding_dim: default_embedding_dim(),
            chunk: ChunkConfig::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            task_timeout_ms: default_task_timeout_ms(),
            scheduler_cron: default_scheduler_cron(),
            scheduler_enabled: false,
            task_runner: TaskRunnerConfig::default(),
        }
    }
}

/// Default config directory (`~/.config/codemem/`).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("codemem"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default config file path.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("codemem.toml")
}

#[allow(dead_code)]
impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from an explicit path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("cannot parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from the default path, falling back to defaults if absent.
    pub fn load_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to an explicit path.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).with_context(|| "cannot serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("cannot write config file: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    pub fn save_default(&self) -> Result<PathBuf> {
        let path = default_config_path();
        self.save(&path)?;
        Ok(path)
    }

    /// Path to the global (project-less) database.
    pub fn global_db_path(&self) -> PathBuf {
        self.data_dir.join("global.db")
    }

    /// Path to a project-scoped database.
    pub fn project_db_path(&self, project_id: &str) -> PathBuf {
        self.data_dir
            .join("projects")
            .join(project_id)
            .join("project.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.embedding_dim, 768);
        assert!(!config.scheduler_enabled);
        assert_eq!(config.search.max_results, 10);
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("test.toml");

        let mut config = Config::new();
        config.scheduler_enabled = true;
        config.save(&config_path)?;

        let loaded = Config::load(&config_path)?;
        assert!(loaded.scheduler_enabled);

        Ok(())
    }

    #[test]
    fn test_unknown_keys_ignored() -> Result<()> {
        let toml_str = "data_dir = \"/tmp/x\"\nunknown_future_field = 42\n";
        let config: Config = toml::from_str(toml_str)?;
        assert_eq!(config.data_dir, PathBuf::from("/tmp/x"));
        Ok(())
    }

    #[test]
    fn test_project_db_path() {
        let mut config = Config::new();
        config.data_dir = PathBuf::from("/data");
        assert_eq!(
            config.project_db_path("abc123"),
            PathBuf::from("/data/projects/abc123/project.db")
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_save_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("test_perms.toml");

        let config = Config::new();
        config.save(&config_path)?;

        let metadata = std::fs::metadata(&config_path)?;
        let mode = metadata.permissions().mode();
        assert_eq!(
            mode & 0o777,
            0o600,
            "config file should have 0600 permissions"
        );

        Ok(())
    }
}
