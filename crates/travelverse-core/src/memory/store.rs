// ============================================================================
// MemoryDb - Durable medium for user memory (redb)
// ============================================================================
// One JSON document per user in the `memories` table, keyed by user id.
// Default path: ~/.travelverse/memory.redb (override via TRAVELVERSE_DB_PATH)
// ============================================================================

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info};

use crate::types::PersistenceError;

// Table definitions
const MEMORIES: TableDefinition<&str, &[u8]> = TableDefinition::new("memories");
const HEALTH: TableDefinition<&str, &[u8]> = TableDefinition::new("health");

/// Storage medium the memory manager persists through.
/// Values are opaque serialized `UserMemory` documents.
pub trait MemoryBackend: Send + Sync {
    /// Every stored `(user id, document)` pair
    fn load_all(&self) -> Result<Vec<(String, Vec<u8>)>, PersistenceError>;

    /// Insert or replace the document for a user
    fn save(&self, user_id: &str, document: &[u8]) -> Result<(), PersistenceError>;

    /// Remove a user's document; returns whether one existed
    fn delete(&self, user_id: &str) -> Result<bool, PersistenceError>;

    /// Write, read back and remove a throwaway entry outside user data
    fn probe(&self) -> Result<(), PersistenceError>;
}

/// Embedded database holding user memory documents
pub struct MemoryDb {
    db: Database,
    path: PathBuf,
}

impl MemoryDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses TRAVELVERSE_DB_PATH env var or ~/.travelverse/memory.redb
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let db_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_db_path()?,
        };

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create {}: {}", parent.display(), e))?;
            }
        }

        info!("Opening memory database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn.open_table(MEMORIES).map_err(|e| anyhow!("Failed to create memories table: {}", e))?;
            let _ = write_txn.open_table(HEALTH).map_err(|e| anyhow!("Failed to create health table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        info!("Memory database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolve the database location from the environment or the home directory
pub fn default_db_path() -> Result<PathBuf> {
    if let Ok(env_path) = std::env::var("TRAVELVERSE_DB_PATH") {
        return Ok(PathBuf::from(env_path));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".travelverse").join("memory.redb"))
}

fn db_err(context: &str, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Database(format!("{}: {}", context, e))
}

impl MemoryBackend for MemoryDb {
    fn load_all(&self) -> Result<Vec<(String, Vec<u8>)>, PersistenceError> {
        let read_txn = self.db.begin_read()
            .map_err(|e| db_err("Failed to begin read", e))?;
        let table = read_txn.open_table(MEMORIES)
            .map_err(|e| db_err("Failed to open memories table", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| db_err("Failed to iterate memories", e))?;
        for entry in iter {
            let (key, value) = entry.map_err(|e| db_err("Failed to read entry", e))?;
            results.push((key.value().to_string(), value.value().to_vec()));
        }

        debug!("Loaded {} memory documents", results.len());
        Ok(results)
    }

    fn save(&self, user_id: &str, document: &[u8]) -> Result<(), PersistenceError> {
        let write_txn = self.db.begin_write()
            .map_err(|e| db_err("Failed to begin write", e))?;
        {
            let mut table = write_txn.open_table(MEMORIES)
                .map_err(|e| db_err("Failed to open memories table", e))?;
            table.insert(user_id, document)
                .map_err(|e| db_err("Failed to insert memory", e))?;
        }
        write_txn.commit().map_err(|e| db_err("Failed to commit", e))?;

        debug!("Stored memory for user: {}", user_id);
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<bool, PersistenceError> {
        let write_txn = self.db.begin_write()
            .map_err(|e| db_err("Failed to begin write", e))?;
        let removed;
        {
            let mut table = write_txn.open_table(MEMORIES)
                .map_err(|e| db_err("Failed to open memories table", e))?;
            removed = table.remove(user_id)
                .map_err(|e| db_err("Failed to remove memory", e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| db_err("Failed to commit delete", e))?;

        if removed {
            debug!("Deleted memory for user: {}", user_id);
        }
        Ok(removed)
    }

    fn probe(&self) -> Result<(), PersistenceError> {
        let key = format!("probe:{}", uuid::Uuid::new_v4());
        let payload = br#"{"test":true}"#;

        let write_txn = self.db.begin_write()
            .map_err(|e| PersistenceError::Probe(format!("begin write: {}", e)))?;
        {
            let mut table = write_txn.open_table(HEALTH)
                .map_err(|e| PersistenceError::Probe(format!("open health table: {}", e)))?;
            table.insert(key.as_str(), payload.as_slice())
                .map_err(|e| PersistenceError::Probe(format!("insert: {}", e)))?;
        }
        write_txn.commit().map_err(|e| PersistenceError::Probe(format!("commit: {}", e)))?;

        {
            let read_txn = self.db.begin_read()
                .map_err(|e| PersistenceError::Probe(format!("begin read: {}", e)))?;
            let table = read_txn.open_table(HEALTH)
                .map_err(|e| PersistenceError::Probe(format!("open health table: {}", e)))?;
            let stored = table.get(key.as_str())
                .map_err(|e| PersistenceError::Probe(format!("read: {}", e)))?
                .ok_or_else(|| PersistenceError::Probe("probe entry missing after write".into()))?;
            if stored.value() != payload.as_slice() {
                return Err(PersistenceError::Probe("probe entry read back differently".into()));
            }
        }

        let write_txn = self.db.begin_write()
            .map_err(|e| PersistenceError::Probe(format!("begin cleanup: {}", e)))?;
        {
            let mut table = write_txn.open_table(HEALTH)
                .map_err(|e| PersistenceError::Probe(format!("open health table: {}", e)))?;
            table.remove(key.as_str())
                .map_err(|e| PersistenceError::Probe(format!("remove: {}", e)))?;
        }
        write_txn.commit().map_err(|e| PersistenceError::Probe(format!("commit cleanup: {}", e)))?;

        Ok(())
    }
}
