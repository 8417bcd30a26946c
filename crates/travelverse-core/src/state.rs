//! ============================================================================
//! Conversation State Tracker
//! ============================================================================
//! Transient per-user state: current intent, stage within that intent,
//! accumulated entities and last interaction time. In-process only; lost on
//! restart. Handed to the agent as a shared handle, never a global.
//! ============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::types::{Entities, Intent, IntentAnalysis};

/// Stage of a user who has not advanced any multi-turn flow
pub const INITIAL_STAGE: &str = "initial";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub current_intent: Option<Intent>,
    pub conversation_stage: String,
    pub extracted_entities: Entities,
    pub last_interaction: Option<DateTime<Utc>>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            current_intent: None,
            conversation_stage: INITIAL_STAGE.to_string(),
            extracted_entities: Entities::new(),
            last_interaction: None,
        }
    }
}

impl ConversationState {
    /// Shallow overwrite: new keys replace old ones, absent keys are kept
    pub fn merge_entities(&mut self, entities: &Entities) {
        for (key, value) in entities {
            self.extracted_entities.insert(key.clone(), value.clone());
        }
    }
}

/// Session store for conversation state, keyed by user id
#[derive(Debug, Default)]
pub struct ConversationStateTracker {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl ConversationStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a classified message for the user, creating state if needed
    pub async fn update(&self, user_id: &str, analysis: &IntentAnalysis) -> ConversationState {
        let mut states = self.states.write().await;
        let state = states.entry(user_id.to_string()).or_default();
        state.current_intent = Some(analysis.intent);
        state.merge_entities(&analysis.entities);
        state.last_interaction = Some(Utc::now());
        state.clone()
    }

    /// Advance the stage within the current intent
    pub async fn set_stage(&self, user_id: &str, stage: impl Into<String>) {
        let mut states = self.states.write().await;
        states.entry(user_id.to_string()).or_default().conversation_stage = stage.into();
    }

    pub async fn get(&self, user_id: &str) -> Option<ConversationState> {
        self.states.read().await.get(user_id).cloned()
    }

    /// Returns whether the user had any state
    pub async fn clear(&self, user_id: &str) -> bool {
        self.states.write().await.remove(user_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analysis(intent: Intent, entities: serde_json::Value) -> IntentAnalysis {
        let entities = match entities {
            serde_json::Value::Object(map) => map,
            _ => Entities::new(),
        };
        IntentAnalysis::new(intent, entities, 0.9)
    }

    #[tokio::test]
    async fn test_absent_user_has_no_state() {
        let tracker = ConversationStateTracker::new();
        assert!(tracker.get("nobody").await.is_none());
        assert!(!tracker.clear("nobody").await);
    }

    #[tokio::test]
    async fn test_update_creates_default_state() {
        let tracker = ConversationStateTracker::new();
        let state = tracker.update("u1", &analysis(Intent::Hotel, json!({}))).await;

        assert_eq!(state.current_intent, Some(Intent::Hotel));
        assert_eq!(state.conversation_stage, INITIAL_STAGE);
        assert!(state.last_interaction.is_some());
    }

    #[tokio::test]
    async fn test_entity_merge_is_last_write_wins_per_key() {
        let tracker = ConversationStateTracker::new();
        tracker.update("u1", &analysis(Intent::TripPlanning, json!({"a": 1, "b": 2}))).await;
        let state = tracker.update("u1", &analysis(Intent::Budget, json!({"b": 3, "c": 4}))).await;

        assert_eq!(serde_json::Value::Object(state.extracted_entities), json!({"a": 1, "b": 3, "c": 4}));
        assert_eq!(state.current_intent, Some(Intent::Budget));
    }

    #[tokio::test]
    async fn test_stage_survives_updates_until_clear() {
        let tracker = ConversationStateTracker::new();
        tracker.update("u1", &analysis(Intent::Onboarding, json!({}))).await;
        tracker.set_stage("u1", "preferences").await;
        tracker.update("u1", &analysis(Intent::Onboarding, json!({}))).await;

        assert_eq!(tracker.get("u1").await.unwrap().conversation_stage, "preferences");

        assert!(tracker.clear("u1").await);
        assert!(tracker.get("u1").await.is_none());
        assert_eq!(tracker.len().await, 0);
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let tracker = ConversationStateTracker::new();
        tracker.update("u1", &analysis(Intent::Sos, json!({"city": "Rome"}))).await;
        tracker.update("u2", &analysis(Intent::Hotel, json!({}))).await;

        assert!(tracker.get("u2").await.unwrap().extracted_entities.is_empty());
        assert_eq!(tracker.len().await, 2);
    }
}
