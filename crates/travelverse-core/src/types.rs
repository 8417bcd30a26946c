//! ============================================================================
//! Core Types for the TravelVerse Agent
//! ============================================================================
//! Defines the intent vocabulary, the classifier output, the response
//! envelope returned to callers, and the error taxonomy of the core.
//! These types are serialized to JSON for the HTTP layer and the CLI.
//! ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Named pieces of structured data extracted from free text
/// (destination, budget, travelers, ...).
pub type Entities = serde_json::Map<String, serde_json::Value>;

/// Closed vocabulary of what the user wants.
/// Example: "book a flight from Chennai to Dubai" -> `Booking`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Onboarding,
    TripPlanning,
    Transport,
    Booking,
    Hotel,
    Dashboard,
    Sos,
    Budget,
    WhatIf,
    Translation,
    General,
}

impl Intent {
    /// Every intent, in the order the classifier prompt lists them
    pub const ALL: [Intent; 11] = [
        Intent::Onboarding,
        Intent::TripPlanning,
        Intent::Transport,
        Intent::Booking,
        Intent::Hotel,
        Intent::Dashboard,
        Intent::Sos,
        Intent::Budget,
        Intent::WhatIf,
        Intent::Translation,
        Intent::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Onboarding => "onboarding",
            Intent::TripPlanning => "trip_planning",
            Intent::Transport => "transport",
            Intent::Booking => "booking",
            Intent::Hotel => "hotel",
            Intent::Dashboard => "dashboard",
            Intent::Sos => "sos",
            Intent::Budget => "budget",
            Intent::WhatIf => "what_if",
            Intent::Translation => "translation",
            Intent::General => "general",
        }
    }

    /// Parse a label coming from outside the process.
    /// Anything outside the vocabulary becomes `General`.
    pub fn from_label(label: &str) -> Intent {
        label.parse().unwrap_or(Intent::General)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "onboarding" => Ok(Intent::Onboarding),
            "trip_planning" | "tripplanning" => Ok(Intent::TripPlanning),
            "transport" => Ok(Intent::Transport),
            "booking" => Ok(Intent::Booking),
            "hotel" => Ok(Intent::Hotel),
            "dashboard" => Ok(Intent::Dashboard),
            "sos" => Ok(Intent::Sos),
            "budget" => Ok(Intent::Budget),
            "what_if" | "whatif" => Ok(Intent::WhatIf),
            "translation" => Ok(Intent::Translation),
            "general" => Ok(Intent::General),
            _ => Err(format!("Unknown intent: {}", s)),
        }
    }
}

/// Classifier output for a single message. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAnalysis {
    pub intent: Intent,
    #[serde(default)]
    pub entities: Entities,
    /// Always within [0, 1]
    pub confidence: f32,
    #[serde(default)]
    pub suggested_next_action: Option<String>,
}

impl IntentAnalysis {
    pub fn new(intent: Intent, entities: Entities, confidence: f32) -> Self {
        Self {
            intent,
            entities,
            confidence: confidence.clamp(0.0, 1.0),
            suggested_next_action: None,
        }
    }

    pub fn with_next_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_next_action = Some(action.into());
        self
    }
}

// ============================================================================
// Response Envelope
// ============================================================================

/// `type` field of the envelope: the intent that answered, an agent-level
/// reply (`recommendations`, `multi_turn`), or `error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Intent(Intent),
    Recommendations,
    MultiTurn,
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Intent(intent) => intent.as_str(),
            ResponseType::Recommendations => "recommendations",
            ResponseType::MultiTurn => "multi_turn",
            ResponseType::Error => "error",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ResponseType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResponseType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        match label.as_str() {
            "error" => Ok(ResponseType::Error),
            "recommendations" => Ok(ResponseType::Recommendations),
            "multi_turn" => Ok(ResponseType::MultiTurn),
            other => other
                .parse::<Intent>()
                .map(ResponseType::Intent)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Normalized response returned to the caller regardless of which
/// pipeline produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: ResponseType,
    pub metadata: serde_json::Value,
}

impl Envelope {
    pub fn is_error(&self) -> bool {
        self.kind == ResponseType::Error
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Failure of the completion collaborator itself
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Completion failed: {0}")]
    Failed(String),
}

/// LLM reply that does not match the expected structure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Empty reply")]
    Empty,

    #[error("Reply is not valid JSON: {0}")]
    Syntax(String),

    #[error("Reply does not match schema: {0}")]
    Schema(String),
}

/// Intent classification failed; recovered by the router's keyword fallback
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassificationError {
    #[error("Classifier collaborator error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Classifier reply rejected: {0}")]
    Decode(#[from] DecodeError),
}

/// Pipeline collaborator failure; recovered at the router boundary
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("{intent} pipeline failed: {message}")]
    Failed { intent: Intent, message: String },

    #[error("{intent} pipeline timed out after {after:?}")]
    Timeout { intent: Intent, after: Duration },

    #[error("{intent} pipeline panicked")]
    Panicked { intent: Intent },
}

impl PipelineError {
    pub fn intent(&self) -> Intent {
        match self {
            PipelineError::Failed { intent, .. }
            | PipelineError::Timeout { intent, .. }
            | PipelineError::Panicked { intent } => *intent,
        }
    }
}

/// Durable store read/write failure; logged, never raised to callers
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage probe failed: {0}")]
    Probe(String),
}

/// A durable record that cannot be deserialized; skipped during load
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Corrupt memory record '{key}': {reason}")]
pub struct CorruptRecordError {
    pub key: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parsing() {
        assert_eq!("trip_planning".parse::<Intent>().unwrap(), Intent::TripPlanning);
        assert_eq!("What-If".parse::<Intent>().unwrap(), Intent::WhatIf);
        assert_eq!("SOS".parse::<Intent>().unwrap(), Intent::Sos);
        assert!("weather".parse::<Intent>().is_err());
        assert_eq!(Intent::from_label("weather"), Intent::General);
    }

    #[test]
    fn test_intent_labels_round_trip_through_serde() {
        for intent in Intent::ALL {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent.as_str()));
        }
    }

    #[test]
    fn test_envelope_serializes_type_as_string() {
        let envelope = Envelope {
            content: "Sorry".to_string(),
            kind: ResponseType::Error,
            metadata: serde_json::json!({}),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "error");

        let booking: Envelope = serde_json::from_value(serde_json::json!({
            "content": "Booked",
            "type": "booking",
            "metadata": {}
        }))
        .unwrap();
        assert_eq!(booking.kind, ResponseType::Intent(Intent::Booking));
    }

    #[test]
    fn test_confidence_is_clamped() {
        let analysis = IntentAnalysis::new(Intent::Hotel, Entities::new(), 1.7);
        assert_eq!(analysis.confidence, 1.0);
    }
}
