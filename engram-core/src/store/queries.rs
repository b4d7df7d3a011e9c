//! Typed query accessors: one function per hot-path query, each taking
//! `&Connection` and returning strongly-typed rows. Answers DESIGN FLAG
//! "`any` and untyped rows from SQL" — no caller touches a raw
//! `libsql::Row` outside this module.

use super::{blob_to_embedding, embedding_to_blob};
use crate::error::Result;
use crate::types::{Chunk, Episode, Importance, Layer};
use libsql::{params, Connection};

/// A BM25 hit: the physical rowid and its (negative) BM25 score.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Hit {
    pub rowid: i64,
    pub score: f64,
}

fn layer_str(l: Layer) -> &'static str {
    match l {
        Layer::Global => "global",
        Layer::Project => "project",
    }
}

fn parse_layer(s: &str) -> Layer {
    if s == "project" {
        Layer::Project
    } else {
        Layer::Global
    }
}

fn importance_str(i: Importance) -> &'static str {
    match i {
        Importance::Normal => "normal",
        Importance::High => "high",
    }
}

fn parse_importance(s: &str) -> Importance {
    if s == "high" {
        Importance::High
    } else {
        Importance::Normal
    }
}

// ---------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------

/// Inserts a chunk, or replaces it (re-hashing and replacing the embedding
/// only when the content hash changed) if `(path, start_line, end_line)`
/// already exists — the natural key from spec §3.
pub async fn upsert_chunk(conn: &Connection, chunk: &Chunk) -> Result<()> {
    let existing_hash: Option<String> = {
        let mut rows = conn
            .query(
                "SELECT content_hash FROM chunks WHERE path = ?1 AND start_line = ?2 AND end_line = ?3",
                params![chunk.path.clone(), chunk.start_line, chunk.end_line],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Some(row.get::<String>(0)?),
            None => None,
        }
    };

    let embedding_blob = chunk.embedding.as_deref().map(embedding_to_blob);
    let hash_changed = existing_hash.as_deref() != Some(chunk.content_hash.as_str());

    conn.execute(
        "INSERT INTO chunks(id, path, layer, project, start_line, end_line, content_hash, text, embedding, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(path, start_line, end_line) DO UPDATE SET
            content_hash = excluded.content_hash,
            text = excluded.text,
            embedding = CASE WHEN ?11 THEN excluded.embedding ELSE chunks.embedding END,
            updated_at = excluded.updated_at",
        params![
            chunk.id.clone(),
            chunk.path.clone(),
            layer_str(chunk.layer),
            chunk.project.clone(),
            chunk.start_line,
            chunk.end_line,
            chunk.content_hash.clone(),
            chunk.text.clone(),
            embedding_blob,
            chunk.updated_at,
            hash_changed,
        ],
    )
    .await?;
    Ok(())
}

fn row_to_chunk(row: &libsql::Row) -> Result<Chunk> {
    let embedding_blob: Option<Vec<u8>> = row.get(8)?;
    Ok(Chunk {
        id: row.get(0)?,
        path: row.get(1)?,
        layer: parse_layer(&row.get::<String>(2)?),
        project: row.get(3)?,
        start_line: row.get(4)?,
        end_line: row.get(5)?,
        content_hash: row.get(6)?,
        text: row.get(7)?,
        embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
        updated_at: row.get(9)?,
    })
}

const CHUNK_COLUMNS: &str =
    "id, path, layer, project, start_line, end_line, content_hash, text, embedding, updated_at, rowid";

/// Fetches chunks by their physical rowid, preserving the caller's order.
pub async fn fetch_chunks_by_rowid(conn: &Connection, rowids: &[i64]) -> Result<Vec<(i64, Chunk)>> {
    let mut out = Vec::with_capacity(rowids.len());
    for &rowid in rowids {
        let mut rows = conn
            .query(
                &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE rowid = ?1"),
                params![rowid],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            out.push((rowid, row_to_chunk(&row)?));
        }
    }
    Ok(out)
}

/// Runs the BM25 lexical candidate query from spec §4.7 step 2.
pub async fn bm25_search_chunks(
    conn: &Connection,
    fts_query: &str,
    limit: usize,
) -> Result<Vec<Bm25Hit>> {
    let mut rows = conn
        .query(
            "SELECT rowid, bm25(chunks_fts) AS score FROM chunks_fts WHERE chunks_fts MATCH ?1
             ORDER BY bm25(chunks_fts) LIMIT ?2",
            params![fts_query.to_string(), limit as i64],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(Bm25Hit {
            rowid: row.get(0)?,
            score: row.get(1)?,
        });
    }
    Ok(out)
}

/// Loads up to `limit` recent chunks with a non-null embedding, for the
/// vector-only fallback in spec §4.7 step 4.
pub async fn recent_chunks_with_embedding(
    conn: &Connection,
    limit: usize,
) -> Result<Vec<Chunk>> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks WHERE embedding IS NOT NULL
                 ORDER BY updated_at DESC LIMIT ?1"
            ),
            params![limit as i64],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_chunk(&row)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Embedding cache
// ---------------------------------------------------------------------

/// Looks up a cached embedding by content hash (spec §4.2).
pub async fn get_cached_embedding(conn: &Connection, content_hash: &str) -> Result<Option<Vec<f32>>> {
    let mut rows = conn
        .query(
            "SELECT embedding FROM embedding_cache WHERE content_hash = ?1",
            params![content_hash.to_string()],
        )
        .await?;
    match rows.next().await? {
        Some(row) => {
            let blob: Vec<u8> = row.get(0)?;
            Ok(Some(blob_to_embedding(&blob)))
        }
        None => Ok(None),
    }
}

/// Inserts or replaces a cached embedding.
pub async fn put_cached_embedding(
    conn: &Connection,
    content_hash: &str,
    embedding: &[f32],
    now_ms: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO embedding_cache(content_hash, embedding, dims, updated_at)
         VALUES(?1, ?2, ?3, ?4)
         ON CONFLICT(content_hash) DO UPDATE SET
            embedding = excluded.embedding, dims = excluded.dims, updated_at = excluded.updated_at",
        params![
            content_hash.to_string(),
            embedding_to_blob(embedding),
            embedding.len() as i64,
            now_ms,
        ],
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Episodes
// ---------------------------------------------------------------------

fn row_to_episode(row: &libsql::Row) -> Result<Episode> {
    let entities_json: String = row.get(4)?;
    let embedding_blob: Option<Vec<u8>> = row.get(8)?;
    Ok(Episode {
        id: row.get(0)?,
        session_id: row.get(1)?,
        project: row.get(2)?,
        scope: parse_layer(&row.get::<String>(3)?),
        summary: row.get(9)?,
        entities: serde_json::from_str(&entities_json).unwrap_or_default(),
        importance: parse_importance(&row.get::<String>(5)?),
        source_type: row.get(6)?,
        full_content: row.get(7)?,
        embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
        created_at: row.get(10)?,
        accessed_at: row.get(11)?,
        access_count: row.get(12)?,
        graduated_at: row.get(13)?,
    })
}

const EPISODE_COLUMNS: &str = "id, session_id, project, scope, entities, importance, \
    source_type, full_content, embedding, summary, created_at, accessed_at, access_count, graduated_at";

/// Inserts a brand-new episode row. Callers MUST call
/// `Episode::validate_scope` first (spec invariant: the write is refused,
/// never silently corrected).
pub async fn insert_episode(conn: &Connection, ep: &Episode) -> Result<()> {
    ep.validate_scope()?;
    conn.execute(
        &format!("INSERT INTO episodes({EPISODE_COLUMNS}) VALUES(?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)"),
        params![
            ep.id.clone(),
            ep.session_id.clone(),
            ep.project.clone(),
            layer_str(ep.scope),
            serde_json::to_string(&ep.entities)?,
            importance_str(ep.importance),
            ep.source_type.clone(),
            ep.full_content.clone(),
            ep.embedding.as_deref().map(embedding_to_blob),
            ep.summary.clone(),
            ep.created_at,
            ep.accessed_at,
            ep.access_count,
            ep.graduated_at,
        ],
    )
    .await?;
    Ok(())
}

/// Overwrites the mutable fields of an existing episode (used by the
/// Extractor's merge path, the Consolidator's compression pass, and
/// accessed-at/access-count bumps).
pub async fn update_episode(conn: &Connection, ep: &Episode) -> Result<()> {
    ep.validate_scope()?;
    conn.execute(
        "UPDATE episodes SET
            summary = ?2, entities = ?3, importance = ?4, full_content = ?5,
            embedding = ?6, accessed_at = ?7, access_count = ?8, graduated_at = ?9
         WHERE id = ?1",
        params![
            ep.id.clone(),
            ep.summary.clone(),
            serde_json::to_string(&ep.entities)?,
            importance_str(ep.importance),
            ep.full_content.clone(),
            ep.embedding.as_deref().map(embedding_to_blob),
            ep.accessed_at,
            ep.access_count,
            ep.graduated_at,
        ],
    )
    .await?;
    Ok(())
}

/// Fetches one episode by id.
pub async fn get_episode(conn: &Connection, id: &str) -> Result<Option<Episode>> {
    let mut rows = conn
        .query(
            &format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE id = ?1"),
            params![id.to_string()],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_episode(&row)?)),
        None => Ok(None),
    }
}

/// Fetches episodes by physical rowid.
pub async fn fetch_episodes_by_rowid(conn: &Connection, rowids: &[i64]) -> Result<Vec<(i64, Episode)>> {
    let mut out = Vec::with_capacity(rowids.len());
    for &rowid in rowids {
        let mut rows = conn
            .query(
                &format!("SELECT {EPISODE_COLUMNS}, rowid FROM episodes WHERE rowid = ?1"),
                params![rowid],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            out.push((rowid, row_to_episode(&row)?));
        }
    }
    Ok(out)
}

/// A snapshot of existing episodes compatible with a given scope/project,
/// fetched once per extraction batch (spec §4.9: "A snapshot MUST be
/// fetched once per extraction batch, not per candidate").
///
/// When `project` is `Some`, this includes both that project's episodes and
/// global (`project IS NULL`) episodes: a batch's candidates can
/// independently carry `scope=Global` regardless of the session's own
/// project, and must have global rows to merge against rather than always
/// inserting duplicates.
pub async fn snapshot_compatible_episodes(
    conn: &Connection,
    project: Option<&str>,
) -> Result<Vec<Episode>> {
    let mut rows = match project {
        Some(p) => {
            conn.query(
                &format!(
                    "SELECT {EPISODE_COLUMNS} FROM episodes \
                     WHERE (project = ?1 OR project IS NULL) AND embedding IS NOT NULL"
                ),
                params![p.to_string()],
            )
            .await?
        }
        None => {
            conn.query(
                &format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE project IS NULL AND embedding IS NOT NULL"),
                (),
            )
            .await?
        }
    };
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_episode(&row)?);
    }
    Ok(out)
}

/// Runs the BM25 lexical candidate query over `episodes_fts`.
pub async fn bm25_search_episodes(
    conn: &Connection,
    fts_query: &str,
    limit: usize,
) -> Result<Vec<Bm25Hit>> {
    let mut rows = conn
        .query(
            "SELECT rowid, bm25(episodes_fts) AS score FROM episodes_fts WHERE episodes_fts MATCH ?1
             ORDER BY bm25(episodes_fts) LIMIT ?2",
            params![fts_query.to_string(), limit as i64],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(Bm25Hit {
            rowid: row.get(0)?,
            score: row.get(1)?,
        });
    }
    Ok(out)
}

/// The `limit` most-recently-accessed episodes that carry an embedding.
pub async fn recent_accessed_episodes(conn: &Connection, limit: usize) -> Result<Vec<(i64, Episode)>> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {EPISODE_COLUMNS}, rowid FROM episodes
                 WHERE embedding IS NOT NULL ORDER BY accessed_at DESC LIMIT ?1"
            ),
            params![limit as i64],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        let rowid: i64 = row.get(14)?;
        out.push((rowid, row_to_episode(&row)?));
    }
    Ok(out)
}

/// Bumps `accessed_at` without touching `access_count` (Retriever and
/// Recollector read-path access).
pub async fn touch_accessed_at(conn: &Connection, id: &str, now_ms: i64) -> Result<()> {
    conn.execute(
        "UPDATE episodes SET accessed_at = ?2 WHERE id = ?1",
        params![id.to_string(), now_ms],
    )
    .await?;
    Ok(())
}

/// Episodes eligible for graduation: high-importance, with `access_count >=
/// min_access` OR `age > min_age_days`, not yet graduated.
pub async fn graduation_candidates(
    conn: &Connection,
    now_ms: i64,
    min_access: i64,
    min_age_days: i64,
    limit: usize,
) -> Result<Vec<Episode>> {
    let min_age_ms = min_age_days * 86_400_000;
    let mut rows = conn
        .query(
            &format!(
                "SELECT {EPISODE_COLUMNS} FROM episodes
                 WHERE importance = 'high' AND graduated_at IS NULL
                   AND (access_count >= ?1 OR (?2 - created_at) > ?3)
                 LIMIT ?4"
            ),
            params![min_access, now_ms, min_age_ms, limit as i64],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_episode(&row)?);
    }
    Ok(out)
}

/// Episodes eligible for compression: normal importance, zero access,
/// older than `age_days`, still carrying `full_content`.
pub async fn compression_candidates(
    conn: &Connection,
    now_ms: i64,
    age_days: i64,
    limit: usize,
) -> Result<Vec<Episode>> {
    let age_ms = age_days * 86_400_000;
    let mut rows = conn
        .query(
            &format!(
                "SELECT {EPISODE_COLUMNS} FROM episodes
                 WHERE importance = 'normal' AND access_count = 0
                   AND full_content IS NOT NULL AND (?1 - created_at) > ?2
                 LIMIT ?3"
            ),
            params![now_ms, age_ms, limit as i64],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_episode(&row)?);
    }
    Ok(out)
}

/// Marks an episode graduated.
pub async fn set_graduated(conn: &Connection, id: &str, graduated_at: i64) -> Result<()> {
    conn.execute(
        "UPDATE episodes SET graduated_at = ?2 WHERE id = ?1",
        params![id.to_string(), graduated_at],
    )
    .await?;
    Ok(())
}

/// Nulls `full_content` (compression), retaining summary/embedding.
pub async fn compress_episode(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE episodes SET full_content = NULL WHERE id = ?1",
        params![id.to_string()],
    )
    .await?;
    Ok(())
}
