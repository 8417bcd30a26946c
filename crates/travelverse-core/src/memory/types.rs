//! ============================================================================
//! Memory Types - Data structures for per-user travel memory
//! ============================================================================
//! Defines the persisted user memory document, interaction and trip records,
//! travel pattern aggregates, and the read models derived from them.
//! ============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bounded::BoundedVec;
use crate::types::{Entities, Intent};

/// Conversation log cap per user
pub const MAX_CONVERSATIONS: usize = 100;
/// Trip log cap per user
pub const MAX_TRIPS: usize = 50;
/// Common destinations cap per user
pub const MAX_COMMON_DESTINATIONS: usize = 10;
/// Size of the `recentMessages` view
pub const RECENT_MESSAGES: usize = 10;
/// Number of entries in each insights ranking
const INSIGHT_TOP_N: usize = 5;

/// Arbitrary preference keys, last write wins on merge
pub type Preferences = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One processed message and the answer the user saw. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub role: Role,
    pub message: String,
    pub response: String,
    pub intent: Intent,
    #[serde(default)]
    pub entities: Entities,
    pub timestamp: DateTime<Utc>,
}

impl InteractionRecord {
    pub fn new(message: String, response: String, intent: Intent, entities: Entities) -> Self {
        Self {
            role: Role::User,
            message,
            response,
            intent,
            entities,
            timestamp: Utc::now(),
        }
    }
}

/// Caller-supplied trip data plus the time it was recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl TripRecord {
    /// Build a record from free-form trip data. A string `destination` is
    /// lifted out; a structured one is kept as `destinationDetails`.
    pub fn from_data(mut data: serde_json::Map<String, serde_json::Value>) -> Self {
        let destination = match data.remove("destination") {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => {
                data.insert("destinationDetails".to_string(), other);
                None
            }
            None => None,
        };
        data.remove("timestamp");

        Self {
            destination,
            details: data,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregate for one `{mode}_{season}` key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TravelPattern {
    pub count: u64,
    pub destinations: Vec<String>,
}

/// A single observed trip shape, folded into `travelPatterns`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternObservation {
    pub mode: String,
    pub season: String,
    pub destination: String,
}

impl PatternObservation {
    pub fn key(&self) -> String {
        format!("{}_{}", self.mode, self.season)
    }
}

/// Durable, per-user aggregate of conversation, trip and preference history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMemory {
    pub user_id: String,
    #[serde(default)]
    conversations: BoundedVec<InteractionRecord, MAX_CONVERSATIONS>,
    #[serde(default)]
    trips: BoundedVec<TripRecord, MAX_TRIPS>,
    #[serde(default)]
    preferences: Preferences,
    #[serde(default)]
    recent_messages: Vec<InteractionRecord>,
    #[serde(default)]
    common_destinations: BoundedVec<String, MAX_COMMON_DESTINATIONS>,
    #[serde(default)]
    travel_patterns: BTreeMap<String, TravelPattern>,
    pub last_updated: DateTime<Utc>,
}

impl UserMemory {
    /// Empty memory for a user seen for the first time
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversations: BoundedVec::new(),
            trips: BoundedVec::new(),
            preferences: Preferences::new(),
            recent_messages: Vec::new(),
            common_destinations: BoundedVec::new(),
            travel_patterns: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Decode a persisted record. `recentMessages` is rebuilt from
    /// `conversations` rather than trusted.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut memory: UserMemory = serde_json::from_slice(bytes)?;
        memory.refresh_recent();
        Ok(memory)
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn conversations(&self) -> &BoundedVec<InteractionRecord, MAX_CONVERSATIONS> {
        &self.conversations
    }

    pub fn trips(&self) -> &BoundedVec<TripRecord, MAX_TRIPS> {
        &self.trips
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn recent_messages(&self) -> &[InteractionRecord] {
        &self.recent_messages
    }

    pub fn common_destinations(&self) -> &BoundedVec<String, MAX_COMMON_DESTINATIONS> {
        &self.common_destinations
    }

    pub fn travel_patterns(&self) -> &BTreeMap<String, TravelPattern> {
        &self.travel_patterns
    }

    // ========================================================================
    // Mutations (every one stamps `last_updated`)
    // ========================================================================

    pub fn record_interaction(&mut self, record: InteractionRecord) {
        self.conversations.push(record);
        self.refresh_recent();
        self.touch();
    }

    pub fn merge_preferences(&mut self, partial: Preferences) {
        for (key, value) in partial {
            self.preferences.insert(key, value);
        }
        self.touch();
    }

    pub fn record_trip(&mut self, trip: TripRecord) {
        self.trips.push(trip);
        self.touch();
    }

    /// Returns whether the destination was new
    pub fn add_common_destination(&mut self, destination: String) -> bool {
        let changed = self.common_destinations.push_unique(destination);
        if changed {
            self.touch();
        }
        changed
    }

    pub fn observe_pattern(&mut self, observation: PatternObservation) {
        let pattern = self.travel_patterns.entry(observation.key()).or_default();
        pattern.count += 1;
        if !pattern.destinations.contains(&observation.destination) {
            pattern.destinations.push(observation.destination);
        }
        self.touch();
    }

    pub(crate) fn refresh_recent(&mut self) {
        self.recent_messages = self.conversations.tail(RECENT_MESSAGES);
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    // ========================================================================
    // Read models
    // ========================================================================

    /// Case-insensitive substring scan; conversations first, then trips
    pub fn search(&self, keyword: &str) -> Vec<MemoryHit> {
        let needle = keyword.to_lowercase();
        let mut hits = Vec::new();

        for conv in self.conversations.iter() {
            if conv.message.to_lowercase().contains(&needle) {
                hits.push(MemoryHit {
                    kind: MemoryHitKind::Conversation,
                    content: conv.message.clone(),
                    timestamp: conv.timestamp,
                });
            }
        }

        for trip in self.trips.iter() {
            if let Some(destination) = &trip.destination {
                if destination.to_lowercase().contains(&needle) {
                    hits.push(MemoryHit {
                        kind: MemoryHitKind::Trip,
                        content: destination.clone(),
                        timestamp: trip.timestamp,
                    });
                }
            }
        }

        hits
    }

    pub fn insights(&self) -> MemoryInsights {
        let favorite_destinations = rank_by_frequency(
            self.trips.iter().filter_map(|t| t.destination.clone()),
        )
        .into_iter()
        .map(|(destination, count)| DestinationCount { destination, count })
        .collect();

        let common_topics = rank_by_frequency(self.conversations.iter().map(|c| c.intent))
            .into_iter()
            .map(|(topic, count)| TopicCount { topic, count })
            .collect();

        let recent_activity = self
            .conversations
            .tail(INSIGHT_TOP_N)
            .into_iter()
            .map(|c| ActivityEntry {
                intent: c.intent,
                timestamp: c.timestamp,
            })
            .collect();

        MemoryInsights {
            total_conversations: self.conversations.len(),
            total_trips: self.trips.len(),
            favorite_destinations,
            common_topics,
            travel_preferences: self.preferences.clone(),
            recent_activity,
        }
    }
}

/// Count occurrences and keep the top entries by count descending.
/// Ties keep first-seen order (the sort is stable).
fn rank_by_frequency<K: PartialEq>(items: impl Iterator<Item = K>) -> Vec<(K, usize)> {
    let mut counts: Vec<(K, usize)> = Vec::new();
    for item in items {
        match counts.iter_mut().find(|(k, _)| *k == item) {
            Some((_, count)) => *count += 1,
            None => counts.push((item, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(INSIGHT_TOP_N);
    counts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryHitKind {
    Conversation,
    Trip,
}

/// One keyword search match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    #[serde(rename = "type")]
    pub kind: MemoryHitKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationCount {
    pub destination: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: Intent,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub intent: Intent,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInsights {
    pub total_conversations: usize,
    pub total_trips: usize,
    pub favorite_destinations: Vec<DestinationCount>,
    pub common_topics: Vec<TopicCount>,
    pub travel_preferences: Preferences,
    pub recent_activity: Vec<ActivityEntry>,
}

/// Aggregate counts across every cached user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_users: usize,
    pub total_conversations: usize,
    pub total_trips: usize,
    pub average_conversations_per_user: usize,
    pub average_trips_per_user: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub user_count: usize,
    pub conversation_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full snapshot of every user's memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub timestamp: DateTime<Utc>,
    pub users: Vec<(String, UserMemory)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMemoryExport {
    pub user_id: String,
    pub export_date: DateTime<Utc>,
    pub data: UserMemory,
}
