//! Schema DDL and the forward-only migration registry.
//!
//! Grounded on `memory-storage-turso/src/fts5_schema.rs`'s external-content
//! FTS5 + sync-trigger pattern, corrected per spec §3/§4.1: joins between an
//! FTS table and its base table MUST use the physical `rowid`, never a text
//! id column, so triggers here write `new.rowid`/`old.rowid` rather than the
//! teacher's `episode_id` join key.

/// One forward-only migration: bumps `schema_version` to `to_version` by
/// running `ddl` inside an `EXCLUSIVE` transaction.
pub struct Migration {
    pub to_version: i64,
    pub ddl: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    to_version: 1,
    ddl: MIGRATION_V1,
}];

const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id            TEXT PRIMARY KEY,
    path          TEXT NOT NULL,
    layer         TEXT NOT NULL,
    project       TEXT,
    start_line    INTEGER NOT NULL,
    end_line      INTEGER NOT NULL,
    content_hash  TEXT NOT NULL,
    text          TEXT NOT NULL,
    embedding     BLOB,
    updated_at    INTEGER NOT NULL,
    UNIQUE(path, start_line, end_line)
);

CREATE INDEX IF NOT EXISTS idx_chunks_project ON chunks(project);
CREATE INDEX IF NOT EXISTS idx_chunks_updated_at ON chunks(updated_at);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    text,
    content='chunks',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES('delete', old.rowid, old.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES('delete', old.rowid, old.text);
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TABLE IF NOT EXISTS embedding_cache (
    content_hash TEXT PRIMARY KEY,
    embedding    BLOB NOT NULL,
    dims         INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS episodes (
    id             TEXT PRIMARY KEY,
    session_id     TEXT NOT NULL,
    project        TEXT,
    scope          TEXT NOT NULL,
    summary        TEXT NOT NULL,
    entities       TEXT NOT NULL DEFAULT '[]',
    importance     TEXT NOT NULL DEFAULT 'normal',
    source_type    TEXT NOT NULL,
    full_content   TEXT,
    embedding      BLOB,
    created_at     INTEGER NOT NULL,
    accessed_at    INTEGER NOT NULL,
    access_count   INTEGER NOT NULL DEFAULT 0,
    graduated_at   INTEGER
);

CREATE INDEX IF NOT EXISTS idx_episodes_session ON episodes(session_id);
CREATE INDEX IF NOT EXISTS idx_episodes_project ON episodes(project);
CREATE INDEX IF NOT EXISTS idx_episodes_accessed_at ON episodes(accessed_at);
CREATE INDEX IF NOT EXISTS idx_episodes_created_at ON episodes(created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS episodes_fts USING fts5(
    summary,
    entities,
    content='episodes',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS episodes_ai AFTER INSERT ON episodes BEGIN
    INSERT INTO episodes_fts(rowid, summary, entities) VALUES (new.rowid, new.summary, new.entities);
END;

CREATE TRIGGER IF NOT EXISTS episodes_ad AFTER DELETE ON episodes BEGIN
    INSERT INTO episodes_fts(episodes_fts, rowid, summary, entities) VALUES('delete', old.rowid, old.summary, old.entities);
END;

CREATE TRIGGER IF NOT EXISTS episodes_au AFTER UPDATE ON episodes BEGIN
    INSERT INTO episodes_fts(episodes_fts, rowid, summary, entities) VALUES('delete', old.rowid, old.summary, old.entities);
    INSERT INTO episodes_fts(rowid, summary, entities) VALUES (new.rowid, new.summary, new.entities);
END;
"#;
