// ============================================================================
// GeneralChatPipeline - Free-form chat with recent history replayed
// ============================================================================

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{DomainFields, Pipeline, PipelineInput, PipelineOutput};
use crate::completion::{ChatMessage, CompletionProvider, CompletionRequest};

/// Interactions replayed ahead of the new message
const REPLAYED_INTERACTIONS: usize = 5;

const SYSTEM_PROMPT: &str = "You are TravelVerse, an intelligent AI travel assistant. \
Be helpful, friendly, and knowledgeable about travel. \
Use the conversation history to provide contextual responses.";

pub struct GeneralChatPipeline {
    provider: Arc<dyn CompletionProvider>,
}

impl GeneralChatPipeline {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    fn build_request(&self, input: &PipelineInput) -> CompletionRequest {
        let recent = input.context.user_memory.recent_messages();
        let start = recent.len().saturating_sub(REPLAYED_INTERACTIONS);
        let history = recent[start..].iter().flat_map(|record| {
            [
                ChatMessage::user(record.message.clone()),
                ChatMessage::assistant(record.response.clone()),
            ]
        });

        CompletionRequest::new()
            .with_message(ChatMessage::system(SYSTEM_PROMPT))
            .with_messages(history)
            .with_message(ChatMessage::user(input.message.clone()))
            .with_temperature(0.7)
            .with_max_tokens(300)
    }
}

#[async_trait]
impl Pipeline for GeneralChatPipeline {
    async fn run(&self, input: PipelineInput) -> Result<PipelineOutput> {
        let reply = self.provider.complete(self.build_request(&input)).await?;
        let content = reply.trim();
        if content.is_empty() {
            bail!("general chat returned an empty reply");
        }

        Ok(PipelineOutput {
            content: content.to_string(),
            fields: DomainFields::General,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InteractionRecord, UserMemory};
    use crate::pipeline::PipelineContext;
    use crate::types::{CompletionError, Entities, Intent};
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoProvider {
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionProvider for EchoProvider {
        async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.seen.lock().unwrap().push(request);
            Ok(format!("  You said: {}  ", last))
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_replays_last_five_interactions() {
        let mut memory = UserMemory::new("u1");
        for i in 0..8 {
            memory.record_interaction(InteractionRecord::new(
                format!("question {}", i),
                format!("answer {}", i),
                Intent::General,
                Entities::new(),
            ));
        }

        let provider = Arc::new(EchoProvider::default());
        let pipeline = GeneralChatPipeline::new(provider.clone());
        let output = pipeline
            .run(PipelineInput {
                message: "thanks".to_string(),
                entities: Entities::new(),
                context: PipelineContext {
                    user_memory: memory,
                    conversation_state: None,
                    trip_context: None,
                },
            })
            .await
            .unwrap();

        assert_eq!(output.content, "You said: thanks");
        assert_eq!(output.fields, DomainFields::General);

        let seen = provider.seen.lock().unwrap();
        let messages = &seen[0].messages;
        // system + 5 * (user, assistant) + new message
        assert_eq!(messages.len(), 12);
        assert_eq!(messages[1].content, "question 3");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[10].content, "answer 7");
        assert_eq!(seen[0].max_tokens, Some(300));
    }
}
