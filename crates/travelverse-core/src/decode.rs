//! ============================================================================
//! LLM Reply Decoder
//! ============================================================================
//! The one place model output is turned into typed values. The classifier
//! and every prompt pipeline go through `decode`; nothing else calls
//! `serde_json::from_str` on a completion.
//! ============================================================================

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::DecodeError;

/// Decode a completion into `T`.
///
/// Accepts bare JSON, JSON inside a ``` fence, or JSON surrounded by prose.
/// Syntax problems and shape mismatches are reported separately.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    let body = json_body(raw);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }

    // First complete value wins; anything after it is ignored
    let value = match serde_json::Deserializer::from_str(body).into_iter::<Value>().next() {
        Some(Ok(value)) => value,
        Some(Err(e)) => return Err(DecodeError::Syntax(e.to_string())),
        None => return Err(DecodeError::Empty),
    };
    serde_json::from_value(value).map_err(|e| DecodeError::Schema(e.to_string()))
}

/// Narrow a reply down to where the JSON starts
fn json_body(raw: &str) -> &str {
    let text = strip_fence(raw);
    if text.starts_with('[') {
        return text;
    }

    match text.find('{') {
        Some(start) => &text[start..],
        None => text,
    }
}

fn strip_fence(raw: &str) -> &str {
    if let Some(start) = raw.find("```") {
        let after_start = &raw[start + 3..];
        // Skip language identifier if present
        let body_start = after_start.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_start[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    raw.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        intent: String,
        confidence: f32,
    }

    #[test]
    fn test_bare_json() {
        let reply: Reply = decode(r#"{"intent":"hotel","confidence":0.9}"#).unwrap();
        assert_eq!(reply.intent, "hotel");
    }

    #[test]
    fn test_fenced_json() {
        let raw = "Here you go:\n```json\n{\"intent\": \"sos\", \"confidence\": 1}\n```\nStay safe.";
        let reply: Reply = decode(raw).unwrap();
        assert_eq!(reply, Reply { intent: "sos".into(), confidence: 1.0 });
    }

    #[test]
    fn test_json_inside_prose() {
        let raw = "Sure! {\"intent\": \"budget\", \"confidence\": 0.4} Hope that helps.";
        let reply: Reply = decode(raw).unwrap();
        assert_eq!(reply.intent, "budget");
    }

    #[test]
    fn test_json_followed_by_prose() {
        let raw = "{\"intent\": \"hotel\", \"confidence\": 0.7}\nLet me know if you need more help! {:}";
        let reply: Reply = decode(raw).unwrap();
        assert_eq!(reply, Reply { intent: "hotel".into(), confidence: 0.7 });
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(decode::<Reply>("   "), Err(DecodeError::Empty));
        assert!(matches!(decode::<Reply>("I think you want a hotel"), Err(DecodeError::Syntax(_))));
        assert!(matches!(decode::<Reply>(r#"{"intent": 3}"#), Err(DecodeError::Schema(_))));
    }
}
