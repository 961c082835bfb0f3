//! Storage module - opens and migrates the SQLite databases backing the
//! memory store (one global database plus one per project).

pub mod handle;
pub mod schema;

pub use handle::{close_all, global_handle, open, project_handle, Handle};
