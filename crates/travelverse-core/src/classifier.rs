//! ============================================================================
//! Intent Classifier
//! ============================================================================
//! Asks the completion collaborator what the user wants, given the message and
//! the user's recent conversation. Failures come back as typed
//! `ClassificationError`s; the router decides how to recover.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::completion::{complete_within, ChatMessage, CompletionProvider, CompletionRequest};
use crate::config::DEFAULT_CLASSIFY_TIMEOUT_SECS;
use crate::decode::decode;
use crate::memory::UserMemory;
use crate::types::{ClassificationError, Entities, Intent, IntentAnalysis};

const CLASSIFIER_MAX_TOKENS: u32 = 500;

/// Confidence assumed when the model leaves it out
const UNSTATED_CONFIDENCE: f32 = 0.5;

/// Reply shape the classifier prompt asks for
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassifierReply {
    intent: String,
    #[serde(default)]
    entities: Option<Entities>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default, alias = "suggestedNextAction")]
    next_action: Option<String>,
}

impl From<ClassifierReply> for IntentAnalysis {
    fn from(reply: ClassifierReply) -> Self {
        let analysis = IntentAnalysis::new(
            Intent::from_label(&reply.intent),
            reply.entities.unwrap_or_default(),
            reply.confidence.unwrap_or(UNSTATED_CONFIDENCE),
        );
        match reply.next_action.filter(|a| !a.trim().is_empty()) {
            Some(action) => analysis.with_next_action(action),
            None => analysis,
        }
    }
}

pub struct IntentClassifier {
    provider: Arc<dyn CompletionProvider>,
    temperature: f32,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            temperature: 0.3,
            timeout: Duration::from_secs(DEFAULT_CLASSIFY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Classify one message against the user's recent history
    pub async fn classify(
        &self,
        message: &str,
        memory: &UserMemory,
    ) -> Result<IntentAnalysis, ClassificationError> {
        let request = self.build_request(message, memory);
        let raw = complete_within(self.provider.as_ref(), request, self.timeout).await?;
        let reply: ClassifierReply = decode(&raw)?;
        let analysis = IntentAnalysis::from(reply);

        debug!(
            "Classified message as {} (confidence {:.2}, {} entities)",
            analysis.intent,
            analysis.confidence,
            analysis.entities.len()
        );
        Ok(analysis)
    }

    fn build_request(&self, message: &str, memory: &UserMemory) -> CompletionRequest {
        let history = serde_json::to_string(memory.recent_messages()).unwrap_or_else(|_| "[]".to_string());

        CompletionRequest::new()
            .with_message(ChatMessage::system(system_prompt()))
            .with_message(ChatMessage::user(format!(
                "Message: \"{}\"\n\nConversation History: {}",
                message, history
            )))
            .with_temperature(self.temperature)
            .with_max_tokens(CLASSIFIER_MAX_TOKENS)
    }
}

fn system_prompt() -> String {
    let vocabulary: Vec<&str> = Intent::ALL.iter().map(|i| i.as_str()).collect();
    format!(
        "You are an AI travel assistant. Analyze the user's message and determine:\n\
         1. Primary intent ({})\n\
         2. Extracted entities (source, destination, budget, travelers, dates, etc.)\n\
         3. Confidence level (0-1)\n\
         4. Suggested next action\n\n\
         Consider conversation history and context when analyzing intent.\n\
         Reply with a single JSON object: \
         {{\"intent\": string, \"entities\": object, \"confidence\": number, \"nextAction\": string}}",
        vocabulary.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InteractionRecord;
    use crate::types::{CompletionError, DecodeError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedProvider {
        reply: Result<String, CompletionError>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_string()), seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone()
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_classifies_structured_reply() {
        let provider = ScriptedProvider::replying(
            r#"{"intent":"booking","entities":{"destination":"Dubai","travelers":2},"confidence":0.92,"nextAction":"collect dates"}"#,
        );
        let classifier = IntentClassifier::new(provider.clone());

        let analysis = classifier.classify("book Dubai", &UserMemory::new("u1")).await.unwrap();
        assert_eq!(analysis.intent, Intent::Booking);
        assert_eq!(analysis.entities["destination"], "Dubai");
        assert_eq!(analysis.suggested_next_action.as_deref(), Some("collect dates"));

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].temperature, Some(0.3));
        assert_eq!(seen[0].max_tokens, Some(500));
        assert!(seen[0].messages[0].content.contains("trip_planning"));
    }

    #[tokio::test]
    async fn test_prompt_carries_recent_history() {
        let provider = ScriptedProvider::replying(r#"{"intent":"general"}"#);
        let classifier = IntentClassifier::new(provider.clone());

        let mut memory = UserMemory::new("u1");
        memory.record_interaction(InteractionRecord::new(
            "hotels in Goa".into(),
            "Here are some".into(),
            Intent::Hotel,
            Entities::new(),
        ));

        let analysis = classifier.classify("cheaper ones?", &memory).await.unwrap();
        assert_eq!(analysis.confidence, UNSTATED_CONFIDENCE);

        let seen = provider.seen.lock().unwrap();
        assert!(seen[0].messages[1].content.contains("hotels in Goa"));
    }

    #[tokio::test]
    async fn test_unknown_intent_maps_to_general() {
        let provider = ScriptedProvider::replying(r#"{"intent":"weather","confidence":2.5}"#);
        let analysis = IntentClassifier::new(provider)
            .classify("is it sunny", &UserMemory::new("u1"))
            .await
            .unwrap();
        assert_eq!(analysis.intent, Intent::General);
        assert_eq!(analysis.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_typed_error() {
        let provider = ScriptedProvider::replying("You probably want a flight.");
        let result = IntentClassifier::new(provider)
            .classify("book a flight", &UserMemory::new("u1"))
            .await;
        assert!(matches!(result, Err(ClassificationError::Decode(DecodeError::Syntax(_)))));
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_typed_error() {
        let provider = Arc::new(ScriptedProvider {
            reply: Err(CompletionError::Failed("503".into())),
            seen: Mutex::new(Vec::new()),
        });
        let result = IntentClassifier::new(provider)
            .classify("hi", &UserMemory::new("u1"))
            .await;
        assert!(matches!(result, Err(ClassificationError::Completion(CompletionError::Failed(_)))));
    }
}
