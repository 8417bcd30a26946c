//! ============================================================================
//! Memory Manager - Cached, persisted per-user travel memory
//! ============================================================================
//! High-level API for reading and mutating user memory. The in-process cache
//! is authoritative; every mutation is applied to the cached object and then
//! written through to the durable backend. Write failures are logged and
//! never raised to the caller.
//!
//! Each change is stamped with a revision while the cache lock is held. The
//! disk write runs on the blocking pool after the lock is released, behind a
//! per-user gate that drops any write older than the last one applied.
//! ============================================================================

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::store::MemoryBackend;
use super::types::{
    BackupDocument, HealthReport, HealthStatus, InteractionRecord, MemoryHit, MemoryInsights,
    MemoryStats, PatternObservation, Preferences, TravelPattern, TripRecord, UserMemory,
    UserMemoryExport,
};
use crate::types::{CorruptRecordError, PersistenceError};

/// Default number of conversations returned by `get_conversation_history`
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
/// Default number of trips returned by `get_trip_memories`
pub const DEFAULT_TRIP_LIMIT: usize = 10;

/// Memory manager combining the in-process cache and the durable backend
pub struct MemoryManager {
    backend: Arc<dyn MemoryBackend>,
    cache: RwLock<HashMap<String, UserMemory>>,
    revision: AtomicU64,
    /// Last revision applied to the backend, per user
    written: Mutex<HashMap<String, Arc<Mutex<u64>>>>,
    backup_dir: PathBuf,
}

/// A durable change captured under the cache lock
struct PendingWrite {
    user_id: String,
    revision: u64,
    change: Change,
}

enum Change {
    Save(Vec<u8>),
    Delete,
}

impl MemoryManager {
    /// Create a manager and load every readable record from the backend.
    /// Corrupt records are skipped; an unreadable backend starts empty.
    pub fn new(backend: Arc<dyn MemoryBackend>, backup_dir: impl Into<PathBuf>) -> Self {
        let mut cache = HashMap::new();

        match backend.load_all() {
            Ok(records) => {
                for (key, bytes) in records {
                    match decode_record(&key, &bytes) {
                        Ok(memory) => {
                            cache.insert(key, memory);
                        }
                        Err(e) => warn!("Skipping record during load: {}", e),
                    }
                }
            }
            Err(e) => error!("Failed to load memories, starting empty: {}", e),
        }

        info!("Memory manager ready with {} users", cache.len());

        Self {
            backend,
            cache: RwLock::new(cache),
            revision: AtomicU64::new(0),
            written: Mutex::new(HashMap::new()),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Existing memory for the user, or a fresh default one.
    /// A freshly defaulted record is cached but not written.
    pub async fn get_user_memory(&self, user_id: &str) -> UserMemory {
        let mut cache = self.cache.write().await;
        cache
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!("Creating default memory for user {}", user_id);
                UserMemory::new(user_id)
            })
            .clone()
    }

    /// Read-modify-write against the live cached object. `apply` returns
    /// whether anything changed; only changes are persisted.
    async fn mutate<R>(
        &self,
        user_id: &str,
        apply: impl FnOnce(&mut UserMemory) -> (R, bool),
    ) -> R {
        let (result, pending) = {
            let mut cache = self.cache.write().await;
            let memory = cache
                .entry(user_id.to_string())
                .or_insert_with(|| UserMemory::new(user_id));

            let (result, changed) = apply(&mut *memory);
            let pending = if changed { self.snapshot(memory) } else { None };
            (result, pending)
        };

        if let Some(write) = pending {
            self.write_through(write).await;
        }
        result
    }

    /// Serialize the document and stamp it. Call with the cache lock held.
    fn snapshot(&self, memory: &UserMemory) -> Option<PendingWrite> {
        match memory.to_json_vec() {
            Ok(document) => Some(PendingWrite {
                user_id: memory.user_id.clone(),
                revision: self.next_revision(),
                change: Change::Save(document),
            }),
            Err(e) => {
                error!("Failed to serialize memory for user {}: {}", memory.user_id, e);
                None
            }
        }
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn gate(&self, user_id: &str) -> Arc<Mutex<u64>> {
        self.written
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Apply a change to the backend unless a newer one already landed
    async fn write_through(&self, write: PendingWrite) {
        let gate = self.gate(&write.user_id).await;
        let mut applied = gate.lock().await;
        if *applied > write.revision {
            debug!(
                "Dropping stale write r{} for user {} (at r{})",
                write.revision, write.user_id, *applied
            );
            return;
        }
        *applied = write.revision;

        let backend = self.backend.clone();
        let PendingWrite { user_id, change, .. } = write;
        let is_delete = matches!(change, Change::Delete);
        let task_user = user_id.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<bool, PersistenceError> {
            match change {
                Change::Save(document) => backend.save(&task_user, &document).map(|()| true),
                Change::Delete => backend.delete(&task_user),
            }
        })
        .await;

        match (outcome, is_delete) {
            (Ok(Ok(true)), true) => info!("Cleared memory for user {}", user_id),
            (Ok(Ok(false)), true) => debug!("No durable memory to clear for user {}", user_id),
            (Ok(Ok(_)), false) => {}
            (Ok(Err(e)), _) => error!("Failed to persist memory for user {}: {}", user_id, e),
            (Err(e), _) => error!("Write task for user {} did not finish: {}", user_id, e),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append an interaction (trimmed to the conversation cap) and persist
    pub async fn store_interaction(&self, user_id: &str, record: InteractionRecord) -> UserMemory {
        debug!("Storing {} interaction for user {}", record.intent, user_id);
        self.mutate(user_id, |memory| {
            memory.record_interaction(record);
            (memory.clone(), true)
        })
        .await
    }

    /// Merge preferences, overwriting per key
    pub async fn store_preferences(&self, user_id: &str, partial: Preferences) -> Preferences {
        self.mutate(user_id, |memory| {
            memory.merge_preferences(partial);
            (memory.preferences().clone(), true)
        })
        .await
    }

    /// Append a trip (trimmed to the trip cap) and persist
    pub async fn store_trip_memory(
        &self,
        user_id: &str,
        trip_data: serde_json::Map<String, serde_json::Value>,
    ) -> Vec<TripRecord> {
        let trip = TripRecord::from_data(trip_data);
        self.mutate(user_id, |memory| {
            memory.record_trip(trip);
            (memory.trips().to_vec(), true)
        })
        .await
    }

    /// Add the destination if absent; persists only when it was new
    pub async fn update_common_destinations(&self, user_id: &str, destination: &str) -> Vec<String> {
        self.mutate(user_id, |memory| {
            let changed = memory.add_common_destination(destination.to_string());
            (memory.common_destinations().to_vec(), changed)
        })
        .await
    }

    pub async fn update_travel_patterns(
        &self,
        user_id: &str,
        observation: PatternObservation,
    ) -> BTreeMap<String, TravelPattern> {
        self.mutate(user_id, |memory| {
            memory.observe_pattern(observation);
            (memory.travel_patterns().clone(), true)
        })
        .await
    }

    /// Replace a user's memory wholesale (cache and durable record)
    pub async fn import_user_memory(&self, user_id: &str, mut memory: UserMemory) {
        memory.user_id = user_id.to_string();
        memory.refresh_recent();

        let pending = {
            let mut cache = self.cache.write().await;
            let pending = self.snapshot(&memory);
            cache.insert(user_id.to_string(), memory);
            pending
        };
        if let Some(write) = pending {
            self.write_through(write).await;
        }
        info!("Imported memory for user {}", user_id);
    }

    /// Drop all in-process state for the user and delete the durable record
    pub async fn clear_user_memory(&self, user_id: &str) {
        let write = {
            let mut cache = self.cache.write().await;
            cache.remove(user_id);
            PendingWrite {
                user_id: user_id.to_string(),
                revision: self.next_revision(),
                change: Change::Delete,
            }
        };
        self.write_through(write).await;
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_conversation_history(&self, user_id: &str, limit: usize) -> Vec<InteractionRecord> {
        self.get_user_memory(user_id).await.conversations().tail(limit)
    }

    pub async fn get_user_preferences(&self, user_id: &str) -> Preferences {
        self.get_user_memory(user_id).await.preferences().clone()
    }

    pub async fn get_trip_memories(&self, user_id: &str, limit: usize) -> Vec<TripRecord> {
        self.get_user_memory(user_id).await.trips().tail(limit)
    }

    pub async fn get_recent_messages(&self, user_id: &str) -> Vec<InteractionRecord> {
        self.get_user_memory(user_id).await.recent_messages().to_vec()
    }

    pub async fn get_common_destinations(&self, user_id: &str) -> Vec<String> {
        self.get_user_memory(user_id).await.common_destinations().to_vec()
    }

    pub async fn get_travel_patterns(&self, user_id: &str) -> BTreeMap<String, TravelPattern> {
        self.get_user_memory(user_id).await.travel_patterns().clone()
    }

    pub async fn search_memories(&self, user_id: &str, keyword: &str) -> Vec<MemoryHit> {
        debug!("Searching memories for user {} with keyword: {}", user_id, keyword);
        self.get_user_memory(user_id).await.search(keyword)
    }

    pub async fn get_memory_insights(&self, user_id: &str) -> MemoryInsights {
        self.get_user_memory(user_id).await.insights()
    }

    pub async fn export_user_memory(&self, user_id: &str) -> UserMemoryExport {
        UserMemoryExport {
            user_id: user_id.to_string(),
            export_date: Utc::now(),
            data: self.get_user_memory(user_id).await,
        }
    }

    pub async fn get_memory_stats(&self) -> MemoryStats {
        let cache = self.cache.read().await;
        let total_users = cache.len();
        let total_conversations: usize = cache.values().map(|m| m.conversations().len()).sum();
        let total_trips: usize = cache.values().map(|m| m.trips().len()).sum();

        let average = |total: usize| {
            if total_users == 0 {
                0
            } else {
                (total as f64 / total_users as f64).round() as usize
            }
        };

        MemoryStats {
            total_users,
            total_conversations,
            total_trips,
            average_conversations_per_user: average(total_conversations),
            average_trips_per_user: average(total_trips),
        }
    }

    /// Verify the durable medium is writable and readable.
    /// User records are never touched.
    pub async fn health_check(&self) -> HealthReport {
        let (user_count, conversation_count) = {
            let cache = self.cache.read().await;
            let conversations = cache.values().map(|m| m.conversations().len()).sum();
            (cache.len(), conversations)
        };

        match self.backend.probe() {
            Ok(()) => HealthReport {
                status: HealthStatus::Healthy,
                user_count,
                conversation_count,
                error: None,
            },
            Err(e) => {
                warn!("Memory health check failed: {}", e);
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    user_count,
                    conversation_count,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    // ========================================================================
    // Backup / Restore
    // ========================================================================

    /// Write a snapshot of every user's memory to the backup directory
    pub async fn backup_memories(&self) -> Result<PathBuf> {
        let document = {
            let cache = self.cache.read().await;
            let mut users: Vec<(String, UserMemory)> = cache
                .iter()
                .map(|(id, memory)| (id.clone(), memory.clone()))
                .collect();
            users.sort_by(|a, b| a.0.cmp(&b.0));
            BackupDocument {
                timestamp: Utc::now(),
                users,
            }
        };

        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| anyhow!("Failed to create backup directory {}: {}", self.backup_dir.display(), e))?;

        let path = self
            .backup_dir
            .join(format!("backup_{}.json", document.timestamp.timestamp_millis()));
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| anyhow!("Failed to serialize backup: {}", e))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| anyhow!("Failed to write backup {}: {}", path.display(), e))?;

        info!("Backed up {} users to {}", document.users.len(), path.display());
        Ok(path)
    }

    /// Restore users from a backup file. The whole document is parsed before
    /// anything is applied; each user then fully replaces its current state.
    pub async fn restore_memories(&self, backup_file: &Path) -> Result<usize> {
        let bytes = tokio::fs::read(backup_file)
            .await
            .map_err(|e| anyhow!("Failed to read backup {}: {}", backup_file.display(), e))?;
        let document: BackupDocument = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow!("Invalid backup {}: {}", backup_file.display(), e))?;

        let count = document.users.len();
        for (user_id, memory) in document.users {
            self.import_user_memory(&user_id, memory).await;
        }

        info!("Restored {} users from {}", count, backup_file.display());
        Ok(count)
    }
}

fn decode_record(key: &str, bytes: &[u8]) -> Result<UserMemory, CorruptRecordError> {
    let mut memory = UserMemory::from_json_slice(bytes).map_err(|e| CorruptRecordError {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    if memory.user_id != key {
        debug!("Record key {} disagrees with userId {}, using key", key, memory.user_id);
        memory.user_id = key.to_string();
    }
    Ok(memory)
}
