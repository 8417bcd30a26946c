//! ============================================================================
//! Memory Module - Persistent per-user travel memory
//! ============================================================================
//! Keeps a bounded, persisted record per user: conversation log, trip log,
//! preferences, common destinations and travel pattern statistics.
//!
//! ## Architecture
//! ```text
//! Agent / Assembler ──► MemoryManager ──► cache (authoritative in-process)
//!                                   │
//!                                   └──► MemoryBackend (redb) ── write-through
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use travelverse_core::memory::{MemoryDb, MemoryManager};
//!
//! let db = Arc::new(MemoryDb::open(None)?);
//! let manager = MemoryManager::new(db, "backups");
//!
//! let memory = manager.get_user_memory("user-1").await;
//! let insights = manager.get_memory_insights("user-1").await;
//! ```
//! ============================================================================

mod bounded;
mod manager;
mod store;
mod types;

// Re-export public types
pub use bounded::BoundedVec;
pub use manager::{MemoryManager, DEFAULT_HISTORY_LIMIT, DEFAULT_TRIP_LIMIT};
pub use store::{default_db_path, MemoryBackend, MemoryDb};
pub use types::{
    ActivityEntry, BackupDocument, DestinationCount, HealthReport, HealthStatus,
    InteractionRecord, MemoryHit, MemoryHitKind, MemoryInsights, MemoryStats,
    PatternObservation, Preferences, Role, TopicCount, TravelPattern, TripRecord, UserMemory,
    UserMemoryExport, MAX_COMMON_DESTINATIONS, MAX_CONVERSATIONS, MAX_TRIPS, RECENT_MESSAGES,
};
