//! ============================================================================
//! Pipeline Collaborators - One handler per intent
//! ============================================================================
//! A pipeline receives the message, the classified entities and a read-only
//! snapshot of the user's context, and returns content plus the domain
//! fields for its intent. Pipelines never touch memory or conversation
//! state; state changes travel back in `DomainFields` and are applied by the
//! response assembler.
//! ============================================================================

mod general;
mod prompt;

pub use general::GeneralChatPipeline;
pub use prompt::{PromptPipeline, ONBOARDING_STAGES};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::memory::UserMemory;
use crate::state::ConversationState;
use crate::types::{Entities, Intent};

/// Read-only view of the user handed to a pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineContext {
    pub user_memory: UserMemory,
    pub conversation_state: Option<ConversationState>,
    pub trip_context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineInput {
    pub message: String,
    pub entities: Entities,
    pub context: PipelineContext,
}

impl PipelineInput {
    /// Stage within the current intent; "initial" when there is no state
    pub fn conversation_stage(&self) -> &str {
        self.context
            .conversation_state
            .as_ref()
            .map(|s| s.conversation_stage.as_str())
            .unwrap_or(crate::state::INITIAL_STAGE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub content: String,
    pub fields: DomainFields,
}

/// A collaborator that answers one intent
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self, input: PipelineInput) -> anyhow::Result<PipelineOutput>;
}

// ============================================================================
// Domain Fields
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnboardingFields {
    pub stage: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub is_complete: bool,
    pub extracted_data: Option<Entities>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TripPlanningFields {
    pub trip_details: Option<Entities>,
    pub recommendations: Value,
    pub budget_breakdown: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportFields {
    pub suggested_mode: Option<String>,
    pub alternatives: Value,
    pub cost_breakdown: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingFields {
    pub booking_type: Option<String>,
    pub confirmation: Value,
    pub next_steps: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HotelFields {
    pub recommendations: Value,
    pub alternatives: Value,
    pub cost_breakdown: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardFields {
    pub dashboard_type: Option<String>,
    pub data: Value,
    pub actions: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SosFields {
    pub emergency_type: Option<String>,
    pub actions: Value,
    pub contacts: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetFields {
    pub budget_plan: Value,
    pub recommendations: Value,
    pub breakdown: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhatIfFields {
    pub scenario: Value,
    pub alternatives: Value,
    pub impact: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranslationFields {
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub translation: Option<String>,
}

/// Models send `null` for flags they have no opinion on
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Result payload of a pipeline, one variant per intent
#[derive(Debug, Clone, PartialEq)]
pub enum DomainFields {
    Onboarding(OnboardingFields),
    TripPlanning(TripPlanningFields),
    Transport(TransportFields),
    Booking(BookingFields),
    Hotel(HotelFields),
    Dashboard(DashboardFields),
    Sos(SosFields),
    Budget(BudgetFields),
    WhatIf(WhatIfFields),
    Translation(TranslationFields),
    General,
}

impl DomainFields {
    pub fn intent(&self) -> Intent {
        match self {
            DomainFields::Onboarding(_) => Intent::Onboarding,
            DomainFields::TripPlanning(_) => Intent::TripPlanning,
            DomainFields::Transport(_) => Intent::Transport,
            DomainFields::Booking(_) => Intent::Booking,
            DomainFields::Hotel(_) => Intent::Hotel,
            DomainFields::Dashboard(_) => Intent::Dashboard,
            DomainFields::Sos(_) => Intent::Sos,
            DomainFields::Budget(_) => Intent::Budget,
            DomainFields::WhatIf(_) => Intent::WhatIf,
            DomainFields::Translation(_) => Intent::Translation,
            DomainFields::General => Intent::General,
        }
    }

    /// Decode the fields for `intent` out of a reply object
    pub fn from_object(intent: Intent, object: serde_json::Map<String, Value>) -> Result<Self, serde_json::Error> {
        let value = Value::Object(object);
        Ok(match intent {
            Intent::Onboarding => DomainFields::Onboarding(serde_json::from_value(value)?),
            Intent::TripPlanning => DomainFields::TripPlanning(serde_json::from_value(value)?),
            Intent::Transport => DomainFields::Transport(serde_json::from_value(value)?),
            Intent::Booking => DomainFields::Booking(serde_json::from_value(value)?),
            Intent::Hotel => DomainFields::Hotel(serde_json::from_value(value)?),
            Intent::Dashboard => DomainFields::Dashboard(serde_json::from_value(value)?),
            Intent::Sos => DomainFields::Sos(serde_json::from_value(value)?),
            Intent::Budget => DomainFields::Budget(serde_json::from_value(value)?),
            Intent::WhatIf => DomainFields::WhatIf(serde_json::from_value(value)?),
            Intent::Translation => DomainFields::Translation(serde_json::from_value(value)?),
            Intent::General => DomainFields::General,
        })
    }

    /// Envelope metadata for these fields
    pub fn to_metadata(&self) -> Value {
        let value = match self {
            DomainFields::Onboarding(f) => serde_json::to_value(f),
            DomainFields::TripPlanning(f) => serde_json::to_value(f),
            DomainFields::Transport(f) => serde_json::to_value(f),
            DomainFields::Booking(f) => serde_json::to_value(f),
            DomainFields::Hotel(f) => serde_json::to_value(f),
            DomainFields::Dashboard(f) => serde_json::to_value(f),
            DomainFields::Sos(f) => serde_json::to_value(f),
            DomainFields::Budget(f) => serde_json::to_value(f),
            DomainFields::WhatIf(f) => serde_json::to_value(f),
            DomainFields::Translation(f) => serde_json::to_value(f),
            DomainFields::General => return Value::Object(serde_json::Map::new()),
        };
        // Plain structs of JSON values always serialize
        value.unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
    }
}

/// Field names the reply for an intent should carry, besides `content`
pub fn reply_fields(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::Onboarding => &["stage", "isComplete", "extractedData"],
        Intent::TripPlanning => &["tripDetails", "recommendations", "budgetBreakdown"],
        Intent::Transport => &["suggestedMode", "alternatives", "costBreakdown"],
        Intent::Booking => &["bookingType", "confirmation", "nextSteps"],
        Intent::Hotel => &["recommendations", "alternatives", "costBreakdown"],
        Intent::Dashboard => &["dashboardType", "data", "actions"],
        Intent::Sos => &["emergencyType", "actions", "contacts"],
        Intent::Budget => &["budgetPlan", "recommendations", "breakdown"],
        Intent::WhatIf => &["scenario", "alternatives", "impact"],
        Intent::Translation => &["sourceLanguage", "targetLanguage", "translation"],
        Intent::General => &[],
    }
}
