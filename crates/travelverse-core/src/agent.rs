//! ============================================================================
//! TravelAgent - Orchestrates one message end to end
//! ============================================================================
//! message -> memory (load) -> classifier -> state tracker -> router
//!         -> pipeline -> assembler -> memory (append)
//!
//! Every collaborator is injected. `process_message` never fails: classifier
//! problems fall back to keywords, pipeline problems become an apology.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::assembler::ResponseAssembler;
use crate::classifier::IntentClassifier;
use crate::completion::{complete_within, ChatMessage, CompletionProvider, CompletionRequest};
use crate::config::AgentConfig;
use crate::decode::decode;
use crate::memory::{HealthStatus, InteractionRecord, MemoryManager, Preferences, TripRecord, UserMemory, DEFAULT_TRIP_LIMIT};
use crate::pipeline::{PipelineContext, PipelineInput};
use crate::router::{self, PipelineSet, Router};
use crate::state::{ConversationState, ConversationStateTracker};
use crate::types::{Envelope, ResponseType};

const RECOMMENDATION_PROMPT: &str = "Generate personalized travel recommendations based on user \
preferences and history. Consider their budget, preferred travel style, and past destinations.";

const FLOW_ANALYSIS_PROMPT: &str = "Analyze the conversation flow and identify the main topic, \
user intent progression, and any unresolved questions or requests. \
Respond with a JSON object only.";

const MULTI_TURN_PROMPT: &str = "You are TravelVerse. Maintain context across multiple messages. \
Be consistent with previous responses and build upon the conversation naturally.";

/// Interactions replayed for a multi-turn reply (two messages each)
const MULTI_TURN_REPLAYED: usize = 5;

/// Everything known about a user, for personalization and the CLI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub memory: UserMemory,
    pub state: Option<ConversationState>,
    pub preferences: Preferences,
    pub recent_trips: Vec<TripRecord>,
    pub common_destinations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Connected,
    Operational,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthComponents {
    pub completion: ComponentStatus,
    pub memory: ComponentStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHealth {
    pub status: HealthStatus,
    pub components: HealthComponents,
    pub user_count: usize,
    pub conversation_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct TravelAgent {
    memory: Arc<MemoryManager>,
    state: Arc<ConversationStateTracker>,
    provider: Arc<dyn CompletionProvider>,
    classifier: IntentClassifier,
    router: Router,
    assembler: ResponseAssembler,
    probe_timeout: Duration,
    pipeline_timeout: Duration,
}

impl TravelAgent {
    /// Agent with completion-backed pipelines and default timeouts
    pub fn new(
        memory: Arc<MemoryManager>,
        state: Arc<ConversationStateTracker>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self::from_config(&AgentConfig::default(), memory, state, provider)
    }

    pub fn from_config(
        config: &AgentConfig,
        memory: Arc<MemoryManager>,
        state: Arc<ConversationStateTracker>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        let classifier = IntentClassifier::new(provider.clone())
            .with_temperature(config.classifier_temperature)
            .with_timeout(config.classify_timeout());
        let router = Router::new(PipelineSet::from_provider(provider.clone()))
            .with_timeout(config.pipeline_timeout());
        let assembler = ResponseAssembler::new(memory.clone(), state.clone());

        Self {
            memory,
            state,
            provider,
            classifier,
            router,
            assembler,
            probe_timeout: config.classify_timeout(),
            pipeline_timeout: config.pipeline_timeout(),
        }
    }

    /// Swap in a different set of pipeline collaborators
    pub fn with_pipelines(mut self, pipelines: PipelineSet) -> Self {
        self.router = Router::new(pipelines).with_timeout(self.pipeline_timeout);
        self
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Process one user message and return the envelope to show them
    pub async fn process_message(
        &self,
        user_id: &str,
        message: &str,
        trip_context: Option<Value>,
    ) -> Envelope {
        let memory = self.memory.get_user_memory(user_id).await;

        let classified = self.classifier.classify(message, &memory).await;
        let analysis = router::resolve(classified, message);

        let state = self.state.update(user_id, &analysis).await;

        let input = PipelineInput {
            message: message.to_string(),
            entities: analysis.entities.clone(),
            context: PipelineContext {
                user_memory: memory,
                conversation_state: Some(state),
                trip_context,
            },
        };
        let outcome = self.router.dispatch(analysis.intent, input).await;
        let envelope = self.assembler.assemble(user_id, message, &analysis, outcome).await;

        info!(
            "Processed message for user {} as {} (confidence {:.2})",
            user_id, envelope.kind, analysis.confidence
        );
        envelope
    }

    pub async fn get_conversation_state(&self, user_id: &str) -> Option<ConversationState> {
        self.state.get(user_id).await
    }

    /// Forget the user: conversation state and persisted memory
    pub async fn clear_conversation(&self, user_id: &str) {
        self.state.clear(user_id).await;
        self.memory.clear_user_memory(user_id).await;
    }

    pub async fn get_user_context(&self, user_id: &str) -> UserContext {
        let memory = self.memory.get_user_memory(user_id).await;
        UserContext {
            preferences: memory.preferences().clone(),
            recent_trips: self.memory.get_trip_memories(user_id, DEFAULT_TRIP_LIMIT).await,
            common_destinations: memory.common_destinations().to_vec(),
            state: self.state.get(user_id).await,
            memory,
        }
    }

    /// 3-5 recommendations from the user's history. Nothing is recorded.
    pub async fn generate_personalized_recommendations(&self, user_id: &str) -> Envelope {
        let context = self.get_user_context(user_id).await;
        let context_json = match serde_json::to_string(&context) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize context for user {}: {}", user_id, e);
                return ResponseAssembler::apology("recommendations_failed");
            }
        };

        let request = CompletionRequest::new()
            .with_message(ChatMessage::system(RECOMMENDATION_PROMPT))
            .with_message(ChatMessage::user(format!(
                "User Context: {}\n\nGenerate 3-5 personalized recommendations.",
                context_json
            )))
            .with_temperature(0.8)
            .with_max_tokens(400);

        match complete_within(self.provider.as_ref(), request, self.pipeline_timeout).await {
            Ok(content) if !content.trim().is_empty() => Envelope {
                content: content.trim().to_string(),
                kind: ResponseType::Recommendations,
                metadata: json!({ "personalized": true }),
            },
            Ok(_) => {
                warn!("Empty recommendations for user {}", user_id);
                ResponseAssembler::apology("recommendations_failed")
            }
            Err(e) => {
                warn!("Recommendations failed for user {}: {}", user_id, e);
                ResponseAssembler::apology("recommendations_failed")
            }
        }
    }

    /// Answer a batch of messages sent together. The flow of the batch is
    /// analyzed first and returned in `metadata.flowAnalysis`. Nothing is
    /// recorded.
    pub async fn handle_multi_turn_conversation(
        &self,
        user_id: &str,
        messages: &[String],
    ) -> Envelope {
        let memory = self.memory.get_user_memory(user_id).await;
        let recent = memory.recent_messages();
        let history = &recent[recent.len().saturating_sub(MULTI_TURN_REPLAYED)..];

        let flow_analysis = match self.analyze_conversation_flow(messages, history).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Flow analysis failed for user {}: {}", user_id, e);
                return ResponseAssembler::apology("multi_turn_failed");
            }
        };

        let replayed = history.iter().flat_map(|record| {
            [
                ChatMessage::user(record.message.clone()),
                ChatMessage::assistant(record.response.clone()),
            ]
        });
        let request = CompletionRequest::new()
            .with_message(ChatMessage::system(MULTI_TURN_PROMPT))
            .with_messages(replayed)
            .with_messages(messages.iter().map(|m| ChatMessage::user(m.clone())))
            .with_temperature(0.7)
            .with_max_tokens(500);

        match complete_within(self.provider.as_ref(), request, self.pipeline_timeout).await {
            Ok(content) if !content.trim().is_empty() => Envelope {
                content: content.trim().to_string(),
                kind: ResponseType::MultiTurn,
                metadata: json!({ "flowAnalysis": flow_analysis }),
            },
            Ok(_) => {
                warn!("Empty multi-turn reply for user {}", user_id);
                ResponseAssembler::apology("multi_turn_failed")
            }
            Err(e) => {
                warn!("Multi-turn reply failed for user {}: {}", user_id, e);
                ResponseAssembler::apology("multi_turn_failed")
            }
        }
    }

    async fn analyze_conversation_flow(
        &self,
        messages: &[String],
        history: &[InteractionRecord],
    ) -> anyhow::Result<serde_json::Map<String, Value>> {
        let request = CompletionRequest::new()
            .with_message(ChatMessage::system(FLOW_ANALYSIS_PROMPT))
            .with_message(ChatMessage::user(format!(
                "Recent Messages: {}\n\nHistory: {}",
                serde_json::to_string(messages)?,
                serde_json::to_string(history)?
            )))
            .with_temperature(0.3)
            .with_max_tokens(200);

        let reply = complete_within(self.provider.as_ref(), request, self.probe_timeout).await?;
        Ok(decode(&reply)?)
    }

    /// Probe the completion collaborator and the memory store
    pub async fn health_check(&self) -> AgentHealth {
        let probe = CompletionRequest::new()
            .with_message(ChatMessage::user("test"))
            .with_max_tokens(5);
        let completion = complete_within(self.provider.as_ref(), probe, self.probe_timeout).await;
        let memory = self.memory.health_check().await;

        let completion_status = match &completion {
            Ok(_) => ComponentStatus::Connected,
            Err(_) => ComponentStatus::Error,
        };
        let memory_status = match memory.status {
            HealthStatus::Healthy => ComponentStatus::Operational,
            HealthStatus::Unhealthy => ComponentStatus::Error,
        };

        let error = match (completion, memory.error) {
            (Err(e), _) => Some(e.to_string()),
            (Ok(_), Some(e)) => Some(e),
            (Ok(_), None) => None,
        };
        let status = if error.is_none() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        AgentHealth {
            status,
            components: HealthComponents {
                completion: completion_status,
                memory: memory_status,
            },
            user_count: memory.user_count,
            conversation_count: memory.conversation_count,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::types::{CompletionError, Intent, PersistenceError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies in order; repeats the last reply once the script runs out
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String, CompletionError>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, CompletionError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies) })
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, CompletionError> {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0].clone()
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    struct NullBackend {
        healthy: bool,
    }

    impl MemoryBackend for NullBackend {
        fn load_all(&self) -> Result<Vec<(String, Vec<u8>)>, PersistenceError> {
            Ok(Vec::new())
        }
        fn save(&self, _user_id: &str, _document: &[u8]) -> Result<(), PersistenceError> {
            Ok(())
        }
        fn delete(&self, _user_id: &str) -> Result<bool, PersistenceError> {
            Ok(true)
        }
        fn probe(&self) -> Result<(), PersistenceError> {
            if self.healthy {
                Ok(())
            } else {
                Err(PersistenceError::Probe("read-only medium".into()))
            }
        }
    }

    fn agent(provider: Arc<ScriptedProvider>, healthy: bool) -> TravelAgent {
        let memory = Arc::new(MemoryManager::new(Arc::new(NullBackend { healthy }), "backups"));
        TravelAgent::new(memory, Arc::new(ConversationStateTracker::new()), provider)
    }

    #[tokio::test]
    async fn test_classified_message_reaches_pipeline() {
        let provider = ScriptedProvider::new(vec![
            Ok(r#"{"intent":"hotel","entities":{"destination":"Goa"},"confidence":0.9}"#.into()),
            Ok(r#"{"content":"Try the beach resort.","recommendations":["Resort A"]}"#.into()),
        ]);
        let agent = agent(provider, true);

        let envelope = agent.process_message("u1", "hotels in Goa", None).await;
        assert_eq!(envelope.kind, ResponseType::Intent(Intent::Hotel));
        assert_eq!(envelope.content, "Try the beach resort.");

        let state = agent.get_conversation_state("u1").await.unwrap();
        assert_eq!(state.current_intent, Some(Intent::Hotel));
        assert_eq!(state.extracted_entities["destination"], "Goa");
    }

    #[tokio::test]
    async fn test_recommendations_envelope() {
        let provider = ScriptedProvider::new(vec![Ok("1. Kyoto in autumn".into())]);
        let envelope = agent(provider, true).generate_personalized_recommendations("u1").await;

        assert_eq!(envelope.kind, ResponseType::Recommendations);
        assert_eq!(envelope.metadata["personalized"], true);
    }

    #[tokio::test]
    async fn test_recommendations_degrade_to_apology() {
        let provider = ScriptedProvider::new(vec![Err(CompletionError::Failed("down".into()))]);
        let envelope = agent(provider, true).generate_personalized_recommendations("u1").await;
        assert!(envelope.is_error());
    }

    #[tokio::test]
    async fn test_multi_turn_carries_flow_analysis() {
        let provider = ScriptedProvider::new(vec![
            Ok(r#"{"mainTopic":"Lisbon trip","unresolved":["hotel"]} Happy to help further."#.into()),
            Ok("For three nights in Lisbon, stay in Alfama.".into()),
        ]);
        let messages = vec!["Planning Lisbon".to_string(), "Where should I stay?".to_string()];
        let envelope = agent(provider, true)
            .handle_multi_turn_conversation("u1", &messages)
            .await;

        assert_eq!(envelope.kind, ResponseType::MultiTurn);
        assert_eq!(envelope.content, "For three nights in Lisbon, stay in Alfama.");
        assert_eq!(envelope.metadata["flowAnalysis"]["mainTopic"], "Lisbon trip");
        assert_eq!(serde_json::to_value(&envelope).unwrap()["type"], "multi_turn");
    }

    #[tokio::test]
    async fn test_multi_turn_unreadable_analysis_is_apology() {
        let provider = ScriptedProvider::new(vec![Ok("The user is planning a trip.".into())]);
        let agent = agent(provider, true);
        let envelope = agent
            .handle_multi_turn_conversation("u1", &["hi".to_string()])
            .await;

        assert!(envelope.is_error());
        assert_eq!(envelope.metadata["error"], "multi_turn_failed");
        assert!(agent.memory().get_user_memory("u1").await.conversations().is_empty());
    }

    #[tokio::test]
    async fn test_user_context_collects_memory() {
        let provider = ScriptedProvider::new(vec![Ok("{}".into())]);
        let agent = agent(provider, true);
        agent.memory().update_common_destinations("u1", "Lisbon").await;

        let context = agent.get_user_context("u1").await;
        assert_eq!(context.common_destinations, vec!["Lisbon".to_string()]);
        assert!(context.state.is_none());
        assert!(context.recent_trips.is_empty());
    }

    #[tokio::test]
    async fn test_health_check_reports_components() {
        let healthy = agent(ScriptedProvider::new(vec![Ok("ok".into())]), true).health_check().await;
        assert_eq!(healthy.status, HealthStatus::Healthy);
        assert_eq!(healthy.components.completion, ComponentStatus::Connected);
        assert_eq!(healthy.components.memory, ComponentStatus::Operational);

        let broken = agent(ScriptedProvider::new(vec![Ok("ok".into())]), false).health_check().await;
        assert_eq!(broken.status, HealthStatus::Unhealthy);
        assert_eq!(broken.components.memory, ComponentStatus::Error);
        assert!(broken.error.unwrap().contains("read-only"));

        let offline = agent(
            ScriptedProvider::new(vec![Err(CompletionError::Failed("401".into()))]),
            true,
        )
        .health_check()
        .await;
        assert_eq!(offline.components.completion, ComponentStatus::Error);
        assert_eq!(offline.status, HealthStatus::Unhealthy);
    }
}
