//! Process-wide cached connection handles (C1, spec §4.1).
//!
//! Mirrors the reference codebase's `VaultDb::open` — WAL mode, a busy
//! timeout, and a best-effort extension load — but generalizes the single
//! global vault connection into a cache keyed by database path so the
//! global store and any number of project stores can be opened once and
//! reused across tool calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::schema;

/// A single opened database: its connection plus whether the native vector
/// extension loaded successfully for it.
pub struct Handle {
    pub conn: Mutex<Connection>,
    pub vec_available: bool,
    pub path: PathBuf,
}

impl Handle {
    fn open_at(path: &Path, vec_extension_path: Option<&Path>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening database: {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.pragma_update(None, "foreign_keys", true)?;

        let vec_available = match vec_extension_path {
            Some(ext_path) => match try_load_vec_extension(&conn, ext_path) {
                Ok(()) => {
                    info!(path = %ext_path.display(), "loaded native vector extension");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "native vector extension unavailable, falling back to brute-force vector search");
                    false
                }
            },
            None => false,
        };

        schema::migrate(&conn, vec_available)
            .with_context(|| format!("migrating database: {}", path.display()))?;

        info!(path = %path.display(), vec_available, "database opened");

        Ok(Handle {
            conn: Mutex::new(conn),
            vec_available,
            path: path.to_path_buf(),
        })
    }
}

fn try_load_vec_extension(conn: &Connection, ext_path: &Path) -> Result<()> {
    unsafe {
        let _guard = rusqlite::LoadExtensionGuard::new(conn)?;
        conn.load_extension(ext_path, None)?;
    }
    Ok(())
}

type HandleCache = Mutex<HashMap<PathBuf, Arc<Handle>>>;

fn cache() -> &'static HandleCache {
    static CACHE: OnceLock<HandleCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Open (or return the cached) handle for the database at `path`.
pub fn open(path: &Path, vec_extension_path: Option<&Path>) -> Result<Arc<Handle>> {
    let canonical = path.to_path_buf();
    let mut guard = cache().lock().expect("handle cache poisoned");

    if let Some(existing) = guard.get(&canonical) {
        debug!(path = %canonical.display(), "reusing cached database handle");
        return Ok(Arc::clone(existing));
    }

    let handle = Arc::new(Handle::open_at(&canonical, vec_extension_path)?);
    guard.insert(canonical, Arc::clone(&handle));
    Ok(handle)
}

/// Open the global (project-less) database.
pub fn global_handle(
    data_dir: &Path,
    vec_extension_path: Option<&Path>,
) -> Result<Arc<Handle>> {
    open(&data_dir.join("global.db"), vec_extension_path)
}

/// Open a project-scoped database.
pub fn project_handle(
    data_dir: &Path,
    project_id: &str,
    vec_extension_path: Option<&Path>,
) -> Result<Arc<Handle>> {
    open(
        &data_dir.join("projects").join(project_id).join("project.db"),
        vec_extension_path,
    )
}

/// Drop every cached handle, closing its connection. Used by tests and by
/// graceful shutdown.
pub fn close_all() {
    let mut guard = cache().lock().expect("handle cache poisoned");
    guard.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let handle = open(&dir.path().join("test.db"), None).unwrap();
        assert!(!handle.vec_available);

        let conn = handle.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='memories'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_is_cached() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cached.db");
        let a = open(&path, None).unwrap();
        let b = open(&path, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        close_all();
    }

    #[test]
    fn test_missing_extension_falls_back() {
        let dir = TempDir::new().unwrap();
        let handle = open(
            &dir.path().join("noext.db"),
            Some(Path::new("/nonexistent/ext.so")),
        )
        .unwrap();
        assert!(!handle.vec_available);
    }
}
