//! Importance scoring, tiering, and consolidation (C7, spec §4.7).
//!
//! Three periodic batch jobs over a single database: `recompute_importance`
//! (per-memory score), `run_tiering` (storage tier assignment), and
//! `run_consolidation` (merging old, rarely-accessed, similar memories).
//! None of these existed in the reference codebase in this shape; they are
//! grounded on its batch-processing style (`embed_vault`'s "load everything,
//! loop, report counts" structure) rather than on any single function.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;

use crate::chunker;
use crate::embedding::{self, EmbedKind, EmbeddingProvider};
use crate::models::{Memory, MemorySource, MemoryType, StorageTier};
use crate::repo::{chunk, memory};
use crate::search::best_score_per_memory;

const ACTIVE_RECENCY_DAYS: i64 = 7;
const ARCHIVE_RECENCY_DAYS: i64 = 30;
const ARCHIVE_IMPORTANCE_CEILING: f32 = 0.3;
const ACTIVE_IMPORTANCE_FLOOR: f32 = 0.7;

const CONSOLIDATION_MIN_AGE_DAYS: i64 = 30;
const CONSOLIDATION_MAX_ACCESS_COUNT: u64 = 3;
const CONSOLIDATION_SIMILARITY_THRESHOLD: f32 = 0.85;
const CONSOLIDATION_CANDIDATE_K: usize = 10;

fn source_weight(source: Option<MemorySource>) -> f32 {
    match source {
        Some(MemorySource::User) => 1.0,
        Some(MemorySource::Consolidation) => 0.8,
        Some(MemorySource::Extraction) => 0.7,
        Some(MemorySource::SessionSummary) => 0.6,
        Some(MemorySource::Automation) | Some(MemorySource::Hook) => 0.5,
        None => 0.5,
    }
}

fn type_weight(memory_type: MemoryType) -> f32 {
    match memory_type {
        MemoryType::Rule => 1.0,
        MemoryType::Mistake => 0.9,
        MemoryType::Learning => 0.8,
        MemoryType::Preference | MemoryType::Objective => 0.7,
        MemoryType::General => 0.6,
        MemoryType::Episode => 0.5,
    }
}

fn recency_factor(last_accessed_at: chrono::DateTime<Utc>) -> f32 {
    let days = (Utc::now() - last_accessed_at).num_seconds() as f32 / 86_400.0;
    let factor = 0.5f32.powf((days / 30.0).max(0.0));
    factor.clamp(0.1, 1.0)
}

fn access_factor(access_count: u64) -> f32 {
    let factor = 0.5 + 0.1 * (1.0 + access_count as f32).log2();
    factor.min(1.0)
}

/// Compute the importance score for a single memory (spec §4.7).
pub fn compute_importance(m: &Memory) -> f32 {
    let raw = source_weight(m.source)
        * type_weight(m.memory_type)
        * recency_factor(m.last_accessed_at)
        * access_factor(m.access_count);
    let clamped = raw.clamp(0.0, 1.0);
    if m.is_rule {
        clamped.max(0.9)
    } else {
        clamped
    }
}

/// Recompute `importance_score` for every memory in one transaction.
pub fn recompute_all(conn: &mut Connection) -> Result<usize> {
    let memories = memory::all(conn)?;
    let tx = conn.transaction()?;
    for m in &memories {
        let score = compute_importance(m);
        tx.execute(
            "UPDATE memories SET importance_score = ?2 WHERE id = ?1",
            rusqlite::params![m.id, score],
        )?;
    }
    tx.commit()?;
    Ok(memories.len())
}

/// Result of one tiering pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TieringCounts {
    pub promoted: usize,
    pub demoted: usize,
    pub archived: usize,
}

fn target_tier(m: &Memory) -> StorageTier {
    let now = Utc::now();
    let days_since_access = (now - m.last_accessed_at).num_days();

    let is_active = days_since_access < ACTIVE_RECENCY_DAYS
        || m.importance_score > ACTIVE_IMPORTANCE_FLOOR
        || m.is_rule;
    if is_active {
        return StorageTier::Active;
    }

    let is_archive = days_since_access >= ARCHIVE_RECENCY_DAYS
        && m.importance_score < ARCHIVE_IMPORTANCE_CEILING
        && !m.is_rule;
    if is_archive {
        StorageTier::Archive
    } else {
        StorageTier::Working
    }
}

/// Assign `storage_tier` for every memory, per the three disjoint rules of
/// spec §4.7. Returns counts of memories that actually changed tier.
pub fn run_tiering(conn: &mut Connection) -> Result<TieringCounts> {
    let memories = memory::all(conn)?;
    let mut counts = TieringCounts::default();

    let tx = conn.transaction()?;
    for m in &memories {
        let target = target_tier(m);
        if target == m.storage_tier {
            continue;
        }

        tx.execute(
            "UPDATE memories SET storage_tier = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![m.id, target.as_str(), Utc::now().to_rfc3339()],
        )?;

        match target {
            StorageTier::Active => counts.promoted += 1,
            StorageTier::Working => counts.demoted += 1,
            StorageTier::Archive => counts.archived += 1,
        }
    }
    tx.commit()?;

    Ok(counts)
}

/// Result of one consolidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationCounts {
    pub merged: usize,
    pub deleted: usize,
    pub skipped: usize,
}

/// Merge old, rarely-accessed memories into their best similar match (spec
/// §4.7 "Consolidation"). Note: candidate content is embedded with kind =
/// `query`, matching the spec's documented Open Question (b) -- preserved
/// rather than "fixed" to `document`.
pub fn run_consolidation(
    conn: &mut Connection,
    provider: &EmbeddingProvider,
    vec_available: bool,
    chunk_max_tokens: usize,
    chunk_overlap_tokens: usize,
    max_per_run: usize,
) -> Result<ConsolidationCounts> {
    let candidates = consolidation_candidates(conn, max_per_run * 2)?;
    let mut counts = ConsolidationCounts::default();
    let mut merged_this_run: HashSet<String> = HashSet::new();

    for candidate in candidates {
        if counts.merged >= max_per_run {
            break;
        }
        if merged_this_run.contains(&candidate.id) {
            continue;
        }

        let query_embedding = embedding::embed(provider, conn, &candidate.content, EmbedKind::Query)?;
        let hits = chunk::search_vector(conn, &query_embedding, CONSOLIDATION_CANDIDATE_K, vec_available)?;
        let ranked = best_score_per_memory(&hits);

        let best = ranked.into_iter().find(|(id, _)| {
            *id != candidate.id && !merged_this_run.contains(id)
        });

        match best {
            Some((target_id, score)) if score >= CONSOLIDATION_SIMILARITY_THRESHOLD => {
                let Some(target) = memory::peek(conn, &target_id)? else {
                    counts.skipped += 1;
                    continue;
                };

                let merged_content = format!("{}\n\n---\n\n{}", target.content, candidate.content);
                chunk::delete_by_memory(conn, &target_id, vec_available)?;
                memory::set_content(conn, &target_id, &merged_content)?;

                let pieces = chunker::chunk(&merged_content, chunk_max_tokens, chunk_overlap_tokens);
                let mut with_embeddings = Vec::with_capacity(pieces.len());
                for piece in pieces {
                    let vector = embedding::embed(provider, conn, &piece.content, EmbedKind::Document)?;
                    with_embeddings.push((piece, vector));
                }
                chunk::create_chunks(conn, &target_id, &with_embeddings, vec_available)?;

                chunk::delete_by_memory(conn, &candidate.id, vec_available)?;
                memory::delete(conn, &candidate.id, vec_available)?;

                merged_this_run.insert(candidate.id.clone());
                merged_this_run.insert(target_id);
                counts.merged += 1;
                counts.deleted += 1;
            }
            _ => {
                counts.skipped += 1;
            }
        }
    }

    Ok(counts)
}

fn consolidation_candidates(conn: &Connection, limit: usize) -> Result<Vec<Memory>> {
    let cutoff = Utc::now() - chrono::Duration::days(CONSOLIDATION_MIN_AGE_DAYS);
    let mut all = memory::all(conn)?;
    all.retain(|m| {
        !m.is_rule && m.access_count <= CONSOLIDATION_MAX_ACCESS_COUNT && m.created_at < cutoff
    });
    all.sort_by(|a, b| {
        a.access_count
            .cmp(&b.access_count)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    all.truncate(limit);
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_id, NewMemory};
    use crate::storage::schema;
    use chrono::Duration;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::migrate(&conn, false).unwrap();
        conn
    }

    fn sample_memory(overrides: impl FnOnce(&mut Memory)) -> Memory {
        let mut m = Memory {
            id: new_id(),
            content: "x".to_string(),
            source: None,
            project_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_accessed_at: Utc::now(),
            access_count: 0,
            metadata: None,
            memory_type: MemoryType::General,
            importance_score: 0.0,
            is_rule: false,
            storage_tier: StorageTier::Active,
            tags: Vec::new(),
        };
        overrides(&mut m);
        m
    }

    #[test]
    fn test_rule_importance_is_at_least_point_nine() {
        let m = sample_memory(|m| {
            m.source = Some(MemorySource::Automation);
            m.memory_type = MemoryType::General;
            m.is_rule = true;
            m.access_count = 0;
            m.last_accessed_at = Utc::now() - Duration::days(365);
        });
        let score = compute_importance(&m);
        assert!(score >= 0.9, "expected >= 0.9, got {score}");
    }

    #[test]
    fn test_importance_bounded_zero_to_one() {
        let m = sample_memory(|m| {
            m.source = Some(MemorySource::User);
            m.memory_type = MemoryType::Rule;
            m.access_count = 1_000_000;
            m.last_accessed_at = Utc::now();
        });
        let score = compute_importance(&m);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_recency_decays_with_age() {
        let fresh = sample_memory(|m| m.last_accessed_at = Utc::now());
        let stale = sample_memory(|m| m.last_accessed_at = Utc::now() - Duration::days(365));
        assert!(compute_importance(&fresh) > compute_importance(&stale));
    }

    #[test]
    fn test_tiering_assigns_three_tiers_correctly() {
        let mut conn = memory_conn();

        let fresh_id = new_id();
        memory::create(
            &conn,
            &fresh_id,
            &NewMemory {
                content: "fresh".to_string(),
                importance: Some(0.5),
                ..Default::default()
            },
        )
        .unwrap();

        let working_id = new_id();
        memory::create(
            &conn,
            &working_id,
            &NewMemory {
                content: "working".to_string(),
                importance: Some(0.5),
                ..Default::default()
            },
        )
        .unwrap();
        conn.execute(
            "UPDATE memories SET last_accessed_at = ?2 WHERE id = ?1",
            rusqlite::params![working_id, (Utc::now() - Duration::days(10)).to_rfc3339()],
        )
        .unwrap();

        let archive_id = new_id();
        memory::create(
            &conn,
            &archive_id,
            &NewMemory {
                content: "archive".to_string(),
                importance: Some(0.1),
                ..Default::default()
            },
        )
        .unwrap();
        conn.execute(
            "UPDATE memories SET last_accessed_at = ?2 WHERE id = ?1",
            rusqlite::params![archive_id, (Utc::now() - Duration::days(60)).to_rfc3339()],
        )
        .unwrap();

        let counts = run_tiering(&mut conn).unwrap();
        assert_eq!(counts.demoted, 1);
        assert_eq!(counts.archived, 1);

        assert_eq!(memory::peek(&conn, &fresh_id).unwrap().unwrap().storage_tier, StorageTier::Active);
        assert_eq!(memory::peek(&conn, &working_id).unwrap().unwrap().storage_tier, StorageTier::Working);
        assert_eq!(memory::peek(&conn, &archive_id).unwrap().unwrap().storage_tier, StorageTier::Archive);
    }

    #[test]
    fn test_consolidation_candidates_excludes_rules_and_recent() {
        let conn = memory_conn();

        let old_low_access = new_id();
        memory::create(
            &conn,
            &old_low_access,
            &NewMemory {
                content: "old".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        conn.execute(
            "UPDATE memories SET created_at = ?2 WHERE id = ?1",
            rusqlite::params![old_low_access, (Utc::now() - Duration::days(40)).to_rfc3339()],
        )
        .unwrap();

        let recent = new_id();
        memory::create(
            &conn,
            &recent,
            &NewMemory {
                content: "recent".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let rule = new_id();
        memory::create(
            &conn,
            &rule,
            &NewMemory {
                content: "rule".to_string(),
                is_rule: true,
                ..Default::default()
            },
        )
        .unwrap();
        conn.execute(
            "UPDATE memories SET created_at = ?2, is_rule = 1 WHERE id = ?1",
            rusqlite::params![rule, (Utc::now() - Duration::days(40)).to_rfc3339()],
        )
        .unwrap();

        let candidates = consolidation_candidates(&conn, 10).unwrap();
        let ids: Vec<_> = candidates.iter().map(|m| m.id.clone()).collect();
        assert!(ids.contains(&old_low_access));
        assert!(!ids.contains(&recent));
        assert!(!ids.contains(&rule));
    }
}
