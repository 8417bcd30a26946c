//! ============================================================================
//! TRAVELVERSE-CORE: Agent orchestration for the travel assistant
//! ============================================================================
//! This crate handles the conversational core of TravelVerse:
//! - Intent classification via a pluggable completion collaborator
//! - Keyword fallback and exhaustive intent routing to pipelines
//! - Transient per-user conversation state
//! - Bounded, persisted per-user travel memory (redb)
//! ============================================================================

pub mod agent;
pub mod assembler;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod decode;
pub mod memory;
pub mod pipeline;
pub mod router;
pub mod state;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use agent::{AgentHealth, TravelAgent, UserContext};
pub use completion::{ChatCompletionClient, CompletionProvider};
pub use config::AgentConfig;
pub use memory::{MemoryDb, MemoryManager};
pub use state::{ConversationState, ConversationStateTracker};
