//! ============================================================================
//! Response Assembler
//! ============================================================================
//! Turns a pipeline outcome into the envelope returned to the caller, applies
//! the state changes carried in the domain fields, and appends the one
//! interaction record for the message. It is the only writer of
//! `conversations`.
//! ============================================================================

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::memory::{InteractionRecord, MemoryManager, PatternObservation};
use crate::pipeline::{DomainFields, OnboardingFields, PipelineOutput, TransportFields, TripPlanningFields};
use crate::state::ConversationStateTracker;
use crate::types::{Entities, Envelope, IntentAnalysis, PipelineError, ResponseType};

/// Content of every error envelope
pub const APOLOGY: &str =
    "I apologize, but I'm experiencing some technical difficulties. Please try again in a moment.";

pub struct ResponseAssembler {
    memory: Arc<MemoryManager>,
    state: Arc<ConversationStateTracker>,
}

impl ResponseAssembler {
    pub fn new(memory: Arc<MemoryManager>, state: Arc<ConversationStateTracker>) -> Self {
        Self { memory, state }
    }

    /// Generic apology envelope. `code` is a short machine-readable reason.
    pub fn apology(code: &str) -> Envelope {
        Envelope {
            content: APOLOGY.to_string(),
            kind: ResponseType::Error,
            metadata: json!({ "error": code }),
        }
    }

    /// Build the envelope for one processed message and record the
    /// interaction exactly once, whether the pipeline succeeded or not
    pub async fn assemble(
        &self,
        user_id: &str,
        message: &str,
        analysis: &IntentAnalysis,
        outcome: Result<PipelineOutput, PipelineError>,
    ) -> Envelope {
        let envelope = match outcome {
            Ok(output) => {
                self.apply_domain_fields(user_id, &output.fields, &analysis.entities).await;
                Envelope {
                    content: output.content,
                    kind: ResponseType::Intent(analysis.intent),
                    metadata: output.fields.to_metadata(),
                }
            }
            Err(e) => {
                error!("Pipeline error for user {} (intent {}): {}", user_id, e.intent(), e);
                let mut envelope = Self::apology(error_code(&e));
                envelope.metadata["intent"] = Value::String(analysis.intent.to_string());
                envelope
            }
        };

        self.memory
            .store_interaction(
                user_id,
                InteractionRecord::new(
                    message.to_string(),
                    envelope.content.clone(),
                    analysis.intent,
                    analysis.entities.clone(),
                ),
            )
            .await;

        envelope
    }

    async fn apply_domain_fields(&self, user_id: &str, fields: &DomainFields, entities: &Entities) {
        match fields {
            DomainFields::Onboarding(onboarding) => self.apply_onboarding(user_id, onboarding).await,
            DomainFields::TripPlanning(trip) => self.apply_trip(user_id, trip).await,
            DomainFields::Transport(transport) => self.apply_transport(user_id, transport, entities).await,
            _ => {}
        }
    }

    async fn apply_onboarding(&self, user_id: &str, fields: &OnboardingFields) {
        if let Some(stage) = fields.stage.as_deref().filter(|s| !s.is_empty()) {
            self.state.set_stage(user_id, stage).await;
        }
        if fields.is_complete {
            if let Some(data) = fields.extracted_data.as_ref().filter(|d| !d.is_empty()) {
                self.memory.store_preferences(user_id, data.clone()).await;
                debug!("Onboarding complete for user {}, stored {} preferences", user_id, data.len());
            }
        }
    }

    async fn apply_trip(&self, user_id: &str, fields: &TripPlanningFields) {
        let Some(details) = fields.trip_details.as_ref() else {
            return;
        };
        let destination = match details.get("destination") {
            Some(Value::String(d)) if !d.trim().is_empty() => d.trim().to_string(),
            _ => return,
        };

        self.memory.store_trip_memory(user_id, details.clone()).await;
        self.memory.update_common_destinations(user_id, &destination).await;
    }

    async fn apply_transport(&self, user_id: &str, fields: &TransportFields, entities: &Entities) {
        let Some(mode) = fields.suggested_mode.as_deref().filter(|m| !m.is_empty()) else {
            return;
        };
        let Some(destination) = entities.get("destination").and_then(Value::as_str) else {
            return;
        };

        let season = entities
            .get("season")
            .and_then(Value::as_str)
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|| season_for_month(Utc::now().month()).to_string());

        self.memory
            .update_travel_patterns(
                user_id,
                PatternObservation {
                    mode: mode.to_lowercase(),
                    season,
                    destination: destination.to_string(),
                },
            )
            .await;
    }
}

fn error_code(error: &PipelineError) -> &'static str {
    match error {
        PipelineError::Failed { .. } => "pipeline_failed",
        PipelineError::Timeout { .. } => "pipeline_timeout",
        PipelineError::Panicked { .. } => "pipeline_panicked",
    }
}

/// Northern-hemisphere meteorological season
pub fn season_for_month(month: u32) -> &'static str {
    match month {
        3..=5 => "spring",
        6..=8 => "summer",
        9..=11 => "autumn",
        _ => "winter",
    }
}
