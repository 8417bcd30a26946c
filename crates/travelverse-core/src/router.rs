//! ============================================================================
//! Router / Dispatcher
//! ============================================================================
//! Maps every intent to exactly one pipeline collaborator and contains
//! collaborator failures at this boundary.
//!
//! When classification fails, `resolve` falls back to a deterministic
//! keyword scan so routing never depends on the model being well-behaved.
//! ============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::completion::CompletionProvider;
use crate::config::DEFAULT_PIPELINE_TIMEOUT_SECS;
use crate::pipeline::{GeneralChatPipeline, Pipeline, PipelineInput, PipelineOutput, PromptPipeline};
use crate::types::{ClassificationError, Entities, Intent, IntentAnalysis, PipelineError};

/// Confidence reported for keyword-based classification
pub const FALLBACK_CONFIDENCE: f32 = 0.6;

/// Ordered keyword sets; the first intent with any match wins.
/// Emergencies are checked first, onboarding last.
const KEYWORD_TABLE: &[(Intent, &[&str])] = &[
    (
        Intent::Sos,
        &[
            "sos", "emergency", "urgent", "ambulance", "hospital", "police", "accident",
            "injured", "stolen", "lost my passport",
        ],
    ),
    (
        Intent::Booking,
        &["book", "booking", "reserve", "reservation", "ticket", "tickets"],
    ),
    (
        Intent::Transport,
        &[
            "flight", "flights", "train", "trains", "bus", "buses", "taxi", "cab",
            "transport", "travel mode",
        ],
    ),
    (
        Intent::Hotel,
        &["hotel", "hotels", "hostel", "resort", "accommodation", "stay", "room"],
    ),
    (
        Intent::Budget,
        &["budget", "cost", "costs", "expense", "expenses", "spend", "spending", "afford"],
    ),
    (
        Intent::Translation,
        &["translate", "translation", "how do i say", "how do you say", "what does"],
    ),
    (
        Intent::WhatIf,
        &["what if", "suppose", "cancelled", "canceled", "backup plan", "plan b", "alternative"],
    ),
    (
        Intent::Dashboard,
        &["dashboard", "itinerary", "my trip", "my trips", "trip status", "nearby"],
    ),
    (
        Intent::TripPlanning,
        &["plan", "planning", "trip", "vacation", "holiday", "visit", "travel to"],
    ),
    (
        Intent::Onboarding,
        &["sign up", "signup", "register", "onboarding", "get started", "my profile", "my name is"],
    ),
];

/// Words that end a place name in "from X to Y"
const PLACE_STOP_WORDS: &[&str] = &[
    "for", "on", "with", "budget", "in", "by", "next", "this", "and", "under", "around", "at",
    "from", "to",
];

const TRAVELER_NOUNS: &[&str] = &[
    "people", "persons", "person", "adults", "adult", "travelers", "travellers", "pax", "guests",
];

// ============================================================================
// Fallback Classification
// ============================================================================

/// Use the classifier's answer, or fall back to keywords when it failed
pub fn resolve(
    classified: Result<IntentAnalysis, ClassificationError>,
    message: &str,
) -> IntentAnalysis {
    match classified {
        Ok(analysis) => analysis,
        Err(e) => {
            let analysis = fallback_analysis(message);
            warn!("Classification failed ({}), keyword fallback chose {}", e, analysis.intent);
            analysis
        }
    }
}

/// Deterministic keyword classification with simple entity extraction
pub fn fallback_analysis(message: &str) -> IntentAnalysis {
    IntentAnalysis::new(keyword_intent(message), extract_entities(message), FALLBACK_CONFIDENCE)
}

/// First intent in the table whose keywords appear as whole words
pub fn keyword_intent(message: &str) -> Intent {
    let words: Vec<String> = tokens(message).iter().map(|t| t.to_lowercase()).collect();
    let haystack = format!(" {} ", words.join(" "));

    KEYWORD_TABLE
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| haystack.contains(&format!(" {} ", keyword)))
        })
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::General)
}

/// Pull source/destination, travelers and budget out of plain text
pub fn extract_entities(message: &str) -> Entities {
    let tokens = tokens(message);
    let lower: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
    let mut entities = Entities::new();

    // "from X to Y"
    if let Some(from) = lower.iter().position(|w| w == "from") {
        if let Some(to) = lower[from + 1..].iter().position(|w| w == "to").map(|i| i + from + 1) {
            let source = place_name(&tokens[from + 1..to], &lower[from + 1..to]);
            let destination = place_name(&tokens[to + 1..], &lower[to + 1..]);
            if let (Some(source), Some(destination)) = (source, destination) {
                entities.insert("source".to_string(), Value::String(source));
                entities.insert("destination".to_string(), Value::String(destination));
            }
        }
    }

    // "for N people"
    for window in lower.windows(3) {
        if window[0] == "for" && TRAVELER_NOUNS.contains(&window[2].as_str()) {
            if let Ok(n) = window[1].parse::<u64>() {
                entities.insert("travelers".to_string(), Value::from(n));
                break;
            }
        }
    }

    // "budget N", "budget of N", "budget is N"
    if let Some(at) = lower.iter().position(|w| w == "budget") {
        let mut i = at + 1;
        while i < lower.len() && (lower[i] == "of" || lower[i] == "is" || lower[i] == "around") {
            i += 1;
        }
        if let Some(amount) = lower.get(i).and_then(|w| w.parse::<u64>().ok()) {
            entities.insert("budget".to_string(), Value::from(amount));
            if let Some(currency) = tokens.get(i + 1) {
                if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()) {
                    entities.insert("currency".to_string(), Value::String(currency.clone()));
                }
            }
        }
    }

    entities
}

/// Leading capitalized-or-not words up to the first stop word or number
fn place_name(tokens: &[String], lower: &[String]) -> Option<String> {
    let words: Vec<&str> = tokens
        .iter()
        .zip(lower)
        .take_while(|(_, l)| {
            !PLACE_STOP_WORDS.contains(&l.as_str()) && !l.chars().all(|c| c.is_ascii_digit())
        })
        .map(|(t, _)| t.as_str())
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Split on anything that is not alphanumeric. Thousands separators inside
/// numbers are dropped so "50,000" stays one token.
fn tokens(message: &str) -> Vec<String> {
    let chars: Vec<char> = message.chars().collect();
    let mut out = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() || c == '\'' {
            current.push(c);
            continue;
        }
        let digit_before = i > 0 && chars[i - 1].is_ascii_digit();
        let digit_after = chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if c == ',' && digit_before && digit_after {
            continue;
        }
        if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

// ============================================================================
// Pipeline Table
// ============================================================================

/// One collaborator per intent
#[derive(Clone)]
pub struct PipelineSet {
    onboarding: Arc<dyn Pipeline>,
    trip_planning: Arc<dyn Pipeline>,
    transport: Arc<dyn Pipeline>,
    booking: Arc<dyn Pipeline>,
    hotel: Arc<dyn Pipeline>,
    dashboard: Arc<dyn Pipeline>,
    sos: Arc<dyn Pipeline>,
    budget: Arc<dyn Pipeline>,
    what_if: Arc<dyn Pipeline>,
    translation: Arc<dyn Pipeline>,
    general: Arc<dyn Pipeline>,
}

impl PipelineSet {
    /// Completion-backed collaborators for every intent
    pub fn from_provider(provider: Arc<dyn CompletionProvider>) -> Self {
        let prompt = |intent: Intent| -> Arc<dyn Pipeline> {
            Arc::new(PromptPipeline::new(intent, provider.clone()))
        };
        Self {
            onboarding: prompt(Intent::Onboarding),
            trip_planning: prompt(Intent::TripPlanning),
            transport: prompt(Intent::Transport),
            booking: prompt(Intent::Booking),
            hotel: prompt(Intent::Hotel),
            dashboard: prompt(Intent::Dashboard),
            sos: prompt(Intent::Sos),
            budget: prompt(Intent::Budget),
            what_if: prompt(Intent::WhatIf),
            translation: prompt(Intent::Translation),
            general: Arc::new(GeneralChatPipeline::new(provider.clone())),
        }
    }

    /// The same collaborator behind every intent
    pub fn uniform(pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            onboarding: pipeline.clone(),
            trip_planning: pipeline.clone(),
            transport: pipeline.clone(),
            booking: pipeline.clone(),
            hotel: pipeline.clone(),
            dashboard: pipeline.clone(),
            sos: pipeline.clone(),
            budget: pipeline.clone(),
            what_if: pipeline.clone(),
            translation: pipeline.clone(),
            general: pipeline,
        }
    }

    /// Replace the collaborator for one intent
    pub fn with(mut self, intent: Intent, pipeline: Arc<dyn Pipeline>) -> Self {
        *self.slot_mut(intent) = pipeline;
        self
    }

    pub fn route(&self, intent: Intent) -> &Arc<dyn Pipeline> {
        match intent {
            Intent::Onboarding => &self.onboarding,
            Intent::TripPlanning => &self.trip_planning,
            Intent::Transport => &self.transport,
            Intent::Booking => &self.booking,
            Intent::Hotel => &self.hotel,
            Intent::Dashboard => &self.dashboard,
            Intent::Sos => &self.sos,
            Intent::Budget => &self.budget,
            Intent::WhatIf => &self.what_if,
            Intent::Translation => &self.translation,
            Intent::General => &self.general,
        }
    }

    fn slot_mut(&mut self, intent: Intent) -> &mut Arc<dyn Pipeline> {
        match intent {
            Intent::Onboarding => &mut self.onboarding,
            Intent::TripPlanning => &mut self.trip_planning,
            Intent::Transport => &mut self.transport,
            Intent::Booking => &mut self.booking,
            Intent::Hotel => &mut self.hotel,
            Intent::Dashboard => &mut self.dashboard,
            Intent::Sos => &mut self.sos,
            Intent::Budget => &mut self.budget,
            Intent::WhatIf => &mut self.what_if,
            Intent::Translation => &mut self.translation,
            Intent::General => &mut self.general,
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

pub struct Router {
    pipelines: PipelineSet,
    timeout: Duration,
}

impl Router {
    pub fn new(pipelines: PipelineSet) -> Self {
        Self {
            pipelines,
            timeout: Duration::from_secs(DEFAULT_PIPELINE_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the collaborator for `intent`. Errors, timeouts and panics all
    /// come back as `PipelineError`; nothing escapes.
    pub async fn dispatch(
        &self,
        intent: Intent,
        input: PipelineInput,
    ) -> Result<PipelineOutput, PipelineError> {
        let pipeline = self.pipelines.route(intent).clone();
        debug!("Dispatching to {} pipeline", intent);

        let run = AssertUnwindSafe(pipeline.run(input)).catch_unwind();
        match tokio::time::timeout(self.timeout, run).await {
            Err(_) => Err(PipelineError::Timeout { intent, after: self.timeout }),
            Ok(Err(_)) => Err(PipelineError::Panicked { intent }),
            Ok(Ok(Err(e))) => Err(PipelineError::Failed { intent, message: format!("{:#}", e) }),
            Ok(Ok(Ok(output))) => {
                if output.fields.intent() != intent {
                    return Err(PipelineError::Failed {
                        intent,
                        message: format!("returned {} fields", output.fields.intent()),
                    });
                }
                Ok(output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::UserMemory;
    use crate::pipeline::{BookingFields, DomainFields, PipelineContext};
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed(DomainFields);

    #[async_trait]
    impl Pipeline for Fixed {
        async fn run(&self, input: PipelineInput) -> anyhow::Result<PipelineOutput> {
            Ok(PipelineOutput {
                content: format!("handled: {}", input.message),
                fields: self.0.clone(),
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl Pipeline for Failing {
        async fn run(&self, _input: PipelineInput) -> anyhow::Result<PipelineOutput> {
            anyhow::bail!("upstream 500")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Pipeline for Panicking {
        async fn run(&self, _input: PipelineInput) -> anyhow::Result<PipelineOutput> {
            panic!("collaborator bug")
        }
    }

    struct Stalled;

    #[async_trait]
    impl Pipeline for Stalled {
        async fn run(&self, _input: PipelineInput) -> anyhow::Result<PipelineOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            anyhow::bail!("unreachable")
        }
    }

    fn input(message: &str) -> PipelineInput {
        PipelineInput {
            message: message.to_string(),
            entities: Entities::new(),
            context: PipelineContext {
                user_memory: UserMemory::new("u1"),
                conversation_state: None,
                trip_context: None,
            },
        }
    }

    #[test]
    fn test_booking_keywords_win_over_transport() {
        assert_eq!(keyword_intent("book a flight"), Intent::Booking);
        assert_eq!(keyword_intent("Any FLIGHTS tomorrow?"), Intent::Transport);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        // "facebook" must not match "book", "transportation" must not match "transport"
        assert_eq!(keyword_intent("I saw it on facebook"), Intent::General);
        assert_eq!(keyword_intent("Is public transportation good here"), Intent::General);
        assert_eq!(keyword_intent("hello there"), Intent::General);
    }

    #[test]
    fn test_keyword_order_is_deterministic() {
        assert_eq!(keyword_intent("Emergency! I need a hotel"), Intent::Sos);
        assert_eq!(keyword_intent("what if it rains, plan b?"), Intent::WhatIf);
        assert_eq!(keyword_intent("plan a trip to Goa"), Intent::TripPlanning);
        assert_eq!(keyword_intent("how do you say thank you in Thai"), Intent::Translation);
        assert_eq!(keyword_intent("I want to sign up"), Intent::Onboarding);
        for _ in 0..3 {
            assert_eq!(keyword_intent("book a flight"), Intent::Booking);
        }
    }

    #[test]
    fn test_entity_extraction() {
        let entities = extract_entities(
            "I want to book a flight from Chennai to Dubai for 2 people, budget 50,000 INR",
        );
        assert_eq!(
            Value::Object(entities),
            json!({
                "source": "Chennai",
                "destination": "Dubai",
                "travelers": 2,
                "budget": 50000,
                "currency": "INR"
            })
        );
    }

    #[test]
    fn test_multi_word_places() {
        let entities = extract_entities("train from New Delhi to Jaipur on Friday");
        assert_eq!(entities["source"], "New Delhi");
        assert_eq!(entities["destination"], "Jaipur");
        assert!(entities.get("travelers").is_none());
    }

    #[test]
    fn test_resolve_prefers_classifier() {
        let classified = IntentAnalysis::new(Intent::Hotel, Entities::new(), 0.95);
        let resolved = resolve(Ok(classified.clone()), "book a flight");
        assert_eq!(resolved, classified);
    }

    #[test]
    fn test_resolve_falls_back_on_error() {
        let error = ClassificationError::Decode(crate::types::DecodeError::Syntax("eof".into()));
        let resolved = resolve(Err(error), "book a flight");
        assert_eq!(resolved.intent, Intent::Booking);
        assert_eq!(resolved.confidence, FALLBACK_CONFIDENCE);
    }

    #[test]
    fn test_every_intent_routes() {
        let set = PipelineSet::uniform(Arc::new(Failing))
            .with(Intent::Booking, Arc::new(Fixed(DomainFields::Booking(BookingFields::default()))));
        for intent in Intent::ALL {
            let _ = set.route(intent);
        }
        assert!(!Arc::ptr_eq(set.route(Intent::Booking), set.route(Intent::Hotel)));
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let set = PipelineSet::uniform(Arc::new(Failing))
            .with(Intent::Booking, Arc::new(Fixed(DomainFields::Booking(BookingFields::default()))));
        let output = Router::new(set).dispatch(Intent::Booking, input("book")).await.unwrap();
        assert_eq!(output.content, "handled: book");
    }

    #[tokio::test]
    async fn test_dispatch_contains_failures() {
        let router = Router::new(PipelineSet::uniform(Arc::new(Failing)));
        let err = router.dispatch(Intent::Hotel, input("x")).await.unwrap_err();
        assert_eq!(err, PipelineError::Failed { intent: Intent::Hotel, message: "upstream 500".into() });
    }

    #[tokio::test]
    async fn test_dispatch_contains_panics() {
        let router = Router::new(PipelineSet::uniform(Arc::new(Panicking)));
        let err = router.dispatch(Intent::Sos, input("x")).await.unwrap_err();
        assert_eq!(err, PipelineError::Panicked { intent: Intent::Sos });
    }

    #[tokio::test]
    async fn test_dispatch_times_out() {
        let router = Router::new(PipelineSet::uniform(Arc::new(Stalled)))
            .with_timeout(Duration::from_millis(20));
        let err = router.dispatch(Intent::Budget, input("x")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { intent: Intent::Budget, .. }));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_mismatched_fields() {
        let router = Router::new(PipelineSet::uniform(Arc::new(Fixed(DomainFields::General))));
        let err = router.dispatch(Intent::Hotel, input("x")).await.unwrap_err();
        assert_eq!(err.intent(), Intent::Hotel);
    }
}
