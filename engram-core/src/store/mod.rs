//! Opens the database, applies migrations, and exposes typed query
//! accessors. See spec §4.1.
//!
//! Driver: `libsql`, opened in local (embedded, file-backed) mode via
//! `libsql::Builder::new_local` — no remote sync, matching the spec's
//! single-process local file store. Grounded on
//! `memory-storage-turso/src/lib_impls/{constructors_basic,helpers}.rs`.

mod migrations;
pub mod queries;

use crate::error::{EngramError, Result};
use libsql::{Builder, Connection, Database};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub use queries::*;

/// An open Engram database: one libsql connection plus the migration
/// discipline described in spec §4.1.
pub struct Store {
    #[allow(dead_code)] // keeps the Database (and its file handle) alive
    db: Arc<Database>,
    conn: Connection,
}

impl Store {
    /// Opens (creating if absent) the database at `path`, sets WAL mode and
    /// the 5-second busy timeout, and runs any pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| EngramError::Config(format!("failed to open store at {path:?}: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| EngramError::Config(format!("failed to connect to store: {e}")))?;

        apply_pragmas(&conn).await?;

        let store = Store {
            db: Arc::new(db),
            conn,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Direct access to the underlying connection, for components (e.g. the
    /// Retriever) that need to issue their own prepared queries.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn schema_version(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT value FROM meta WHERE key = 'schema_version'", ())
            .await;
        match rows {
            Ok(ref mut rows) => match rows.next().await? {
                Some(row) => {
                    let v: String = row.get(0)?;
                    Ok(v.parse().unwrap_or(0))
                }
                None => Ok(0),
            },
            // `meta` table doesn't exist yet: version 0.
            Err(_) => Ok(0),
        }
    }

    /// Runs every migration after the current `schema_version`, each inside
    /// an `EXCLUSIVE` transaction. On "busy"/"locked" the process sleeps 6 s
    /// and re-reads the version; if another process has already advanced it
    /// past this migration's target, the migration is considered complete
    /// (spec §4.1, scenario 5 "Schema migration race").
    async fn migrate(&self) -> Result<()> {
        for migration in migrations::MIGRATIONS {
            loop {
                let current = self.schema_version().await?;
                if current >= migration.to_version {
                    break;
                }

                match self.run_one_migration(migration).await {
                    Ok(()) => break,
                    Err(e) if is_busy_or_locked(&e) => {
                        warn!(
                            target = migration.to_version,
                            "migration blocked by another process, retrying after backoff"
                        );
                        tokio::time::sleep(crate::constants::coordination::MIGRATION_RETRY_SLEEP)
                            .await;
                        let after = self.schema_version().await?;
                        if after >= migration.to_version {
                            break;
                        }
                        // still behind: loop and try again
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn run_one_migration(&self, migration: &migrations::Migration) -> Result<()> {
        self.conn.execute("BEGIN EXCLUSIVE", ()).await?;
        let result: Result<()> = async {
            self.conn.execute_batch(migration.ddl).await?;
            self.conn
                .execute(
                    "INSERT INTO meta(key, value) VALUES('schema_version', ?1)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    libsql::params![migration.to_version.to_string()],
                )
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.conn.execute("COMMIT", ()).await?;
                info!(version = migration.to_version, "applied migration");
                Ok(())
            }
            Err(e) => {
                let _ = self.conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }
}

async fn apply_pragmas(conn: &Connection) -> Result<()> {
    drain(conn.query("PRAGMA journal_mode=WAL", ()).await?).await?;
    drain(
        conn.query(
            &format!(
                "PRAGMA busy_timeout={}",
                crate::constants::coordination::DB_BUSY_TIMEOUT.as_millis()
            ),
            (),
        )
        .await?,
    )
    .await?;
    Ok(())
}

/// PRAGMA statements may return rows; they must be drained or libsql treats
/// the connection as having a pending result set.
async fn drain(mut rows: libsql::Rows) -> Result<()> {
    while rows.next().await?.is_some() {}
    Ok(())
}

fn is_busy_or_locked(e: &EngramError) -> bool {
    let msg = e.to_string().to_ascii_lowercase();
    msg.contains("busy") || msg.contains("locked")
}

/// Serializes an embedding vector to a little-endian f32 blob for BLOB
/// storage.
#[must_use]
pub fn embedding_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Deserializes a BLOB column back into an embedding vector.
#[must_use]
pub fn blob_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
