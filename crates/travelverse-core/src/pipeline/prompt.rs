// ============================================================================
// PromptPipeline - Completion-backed collaborator for one intent
// ============================================================================
// Sends an intent-specific system prompt plus the message, entities and
// stage, then decodes the reply into that intent's DomainFields.
// ============================================================================

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::{reply_fields, DomainFields, Pipeline, PipelineInput, PipelineOutput};
use crate::completion::{ChatMessage, CompletionProvider, CompletionRequest};
use crate::decode::decode;
use crate::types::{DecodeError, Intent};

const PIPELINE_TEMPERATURE: f32 = 0.7;
const PIPELINE_MAX_TOKENS: u32 = 2000;

/// Keys a reply may use for its user-facing text, in priority order
const CONTENT_KEYS: [&str; 4] = ["content", "response", "message", "reply"];

/// Onboarding sub-steps, in order
pub const ONBOARDING_STAGES: [&str; 5] = [
    "basic_details",
    "travel_preferences",
    "travel_documents",
    "emergency_contact",
    "consent",
];

pub struct PromptPipeline {
    intent: Intent,
    provider: Arc<dyn CompletionProvider>,
    temperature: f32,
    max_tokens: u32,
}

impl PromptPipeline {
    pub fn new(intent: Intent, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            intent,
            provider,
            temperature: PIPELINE_TEMPERATURE,
            max_tokens: PIPELINE_MAX_TOKENS,
        }
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    fn build_request(&self, input: &PipelineInput) -> CompletionRequest {
        let mut instructions = String::from(system_prompt(self.intent));
        instructions.push_str("\n\nReply with a single JSON object containing \"content\" (the text shown to the traveler)");
        let fields = reply_fields(self.intent);
        if !fields.is_empty() {
            instructions.push_str(" and the fields ");
            instructions.push_str(&fields.join(", "));
        }
        instructions.push('.');
        if self.intent == Intent::Onboarding {
            instructions.push_str(&format!(
                " Onboarding stages in order: {}. Set \"stage\" to the stage to ask about next and \"isComplete\" to true once consent is given.",
                ONBOARDING_STAGES.join(", ")
            ));
        }

        let entities = serde_json::to_string(&input.entities).unwrap_or_else(|_| "{}".to_string());
        let mut prompt = format!(
            "Message: \"{}\"\nEntities: {}\nConversation stage: {}",
            input.message,
            entities,
            input.conversation_stage()
        );
        if !input.context.user_memory.preferences().is_empty() {
            let prefs = serde_json::to_string(input.context.user_memory.preferences())
                .unwrap_or_else(|_| "{}".to_string());
            prompt.push_str(&format!("\nTraveler preferences: {}", prefs));
        }
        if let Some(trip) = &input.context.trip_context {
            prompt.push_str(&format!("\nCurrent trip: {}", trip));
        }

        CompletionRequest::new()
            .with_message(ChatMessage::system(instructions))
            .with_message(ChatMessage::user(prompt))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

#[async_trait]
impl Pipeline for PromptPipeline {
    async fn run(&self, input: PipelineInput) -> Result<PipelineOutput> {
        let request = self.build_request(&input);
        let raw = self.provider.complete(request).await?;

        let mut object: Map<String, Value> = decode(&raw)?;
        let content = take_content(&mut object)
            .ok_or_else(|| anyhow!("{} reply has no content", self.intent))?;
        let fields = DomainFields::from_object(self.intent, object)
            .map_err(|e| DecodeError::Schema(e.to_string()))?;

        debug!("{} pipeline answered ({} chars)", self.intent, content.len());
        Ok(PipelineOutput { content, fields })
    }
}

fn take_content(object: &mut Map<String, Value>) -> Option<String> {
    for key in CONTENT_KEYS {
        if let Some(Value::String(text)) = object.get(key) {
            if !text.trim().is_empty() {
                let text = text.clone();
                object.remove(key);
                return Some(text);
            }
        }
    }
    None
}

fn system_prompt(intent: Intent) -> &'static str {
    match intent {
        Intent::Onboarding => "You are TravelVerse, an intelligent AI travel assistant. Help users complete their onboarding process by collecting necessary information for travel planning. Be friendly, professional, and thorough.",
        Intent::TripPlanning => "You are TravelVerse's trip planning expert. Analyze user requests to extract travel details (source, destination, dates, budget, travelers) and provide intelligent travel recommendations. Consider factors like budget, time, group size, and preferences.",
        Intent::Transport => "You are TravelVerse's transport advisor. Recommend the best mode of travel (flight, train, bus) for the route, explain the choice, and compare cost and duration of the alternatives.",
        Intent::Booking => "You are TravelVerse's booking specialist. Help users book transport and accommodation based on their preferences and budget. Provide realistic booking simulations with pricing and availability.",
        Intent::Hotel => "You are TravelVerse's accommodation expert. Recommend hotels that fit the traveler's destination, budget and group, with alternatives and a cost breakdown.",
        Intent::Dashboard => "You are TravelVerse's travel companion. Provide real-time assistance during trips including itinerary planning, budget tracking, local recommendations, and emergency support.",
        Intent::Sos => "You are TravelVerse's emergency response system. Provide immediate assistance for travel emergencies including medical, security, and logistical support.",
        Intent::Budget => "You are TravelVerse's financial advisor. Help users plan and track their travel budget, providing spending recommendations and cost optimization strategies.",
        Intent::WhatIf => "You are TravelVerse's contingency planner. Generate alternative travel plans and backup options for various scenarios like weather changes, cancellations, or emergencies.",
        Intent::Translation => "You are TravelVerse's language assistant. Help users communicate in local languages by providing accurate translations and cultural context.",
        Intent::General => "You are TravelVerse, an intelligent AI travel assistant. Be helpful, friendly, and knowledgeable about travel.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::UserMemory;
    use crate::pipeline::PipelineContext;
    use crate::state::ConversationState;
    use crate::types::{CompletionError, Entities};
    use std::sync::Mutex;

    struct ScriptedProvider {
        reply: String,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
            self.seen.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn provider(reply: &str) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider { reply: reply.to_string(), seen: Mutex::new(Vec::new()) })
    }

    fn input(message: &str, state: Option<ConversationState>) -> PipelineInput {
        PipelineInput {
            message: message.to_string(),
            entities: Entities::new(),
            context: PipelineContext {
                user_memory: UserMemory::new("u1"),
                conversation_state: state,
                trip_context: None,
            },
        }
    }

    #[tokio::test]
    async fn test_reply_maps_to_intent_fields() {
        let provider = provider(
            r#"{"response": "Take the overnight train.", "suggestedMode": "train", "alternatives": ["flight"]}"#,
        );
        let pipeline = PromptPipeline::new(Intent::Transport, provider.clone());

        let output = pipeline.run(input("Chennai to Bangalore?", None)).await.unwrap();
        assert_eq!(output.content, "Take the overnight train.");
        match output.fields {
            DomainFields::Transport(fields) => assert_eq!(fields.suggested_mode.as_deref(), Some("train")),
            other => panic!("unexpected fields {:?}", other),
        }

        let seen = provider.seen.lock().unwrap();
        assert!(seen[0].messages[0].content.contains("suggestedMode"));
        assert!(seen[0].messages[1].content.contains("Conversation stage: initial"));
    }

    #[tokio::test]
    async fn test_onboarding_prompt_carries_stage() {
        let provider = provider(r#"{"content": "What is your travel mode?", "stage": "travel_preferences"}"#);
        let pipeline = PromptPipeline::new(Intent::Onboarding, provider.clone());
        let state = ConversationState {
            conversation_stage: "basic_details".to_string(),
            ..ConversationState::default()
        };

        pipeline.run(input("I'm Asha", Some(state))).await.unwrap();

        let seen = provider.seen.lock().unwrap();
        assert!(seen[0].messages[0].content.contains("emergency_contact"));
        assert!(seen[0].messages[1].content.contains("Conversation stage: basic_details"));
    }

    #[tokio::test]
    async fn test_reply_without_content_fails() {
        let pipeline = PromptPipeline::new(Intent::Hotel, provider(r#"{"recommendations": []}"#));
        assert!(pipeline.run(input("hotels", None)).await.is_err());
    }

    #[tokio::test]
    async fn test_non_json_reply_fails() {
        let pipeline = PromptPipeline::new(Intent::Budget, provider("Spend less on food."));
        assert!(pipeline.run(input("budget", None)).await.is_err());
    }
}
