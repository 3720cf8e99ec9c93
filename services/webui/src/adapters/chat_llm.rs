//! services/webui/src/adapters/chat_llm.rs
//!
//! This module contains the adapter that produces assistant replies.
//! It implements the `AssistantService` port from the `core` crate on top of any
//! OpenAI-compatible chat completion endpoint.

const SYSTEM_INSTRUCTIONS: &str = "You are a capable general-purpose assistant. \
Answer the user's latest message directly, using the earlier turns of the conversation \
as context. Tool results that appear in the conversation were produced on the user's \
behalf and can be relied upon.";

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use chat_core::domain::{Message, MessageRole};
use chat_core::ports::{AssistantService, PortError, PortResult};
use tracing::{debug, error};

use crate::llm_config::LlmSettings;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `AssistantService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter` pointed at the provider described by `settings`.
    pub fn new(settings: &LlmSettings) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(settings.api_key.clone())
            .with_api_base(settings.base_url.trim_end_matches('/').to_string());
        Self {
            client: Client::with_config(openai_config),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    /// Converts stored history plus the new prompt into a chat completion transcript.
    ///
    /// The assistant's own tool-call requests are not replayed, so tool results are
    /// folded into the transcript as assistant-side notes rather than `tool` messages,
    /// which the API would reject without a matching call.
    fn build_messages(
        history: &[Message],
        prompt: &str,
    ) -> PortResult<Vec<ChatCompletionRequestMessage>> {
        let build_err = |e: async_openai::error::OpenAIError| PortError::Unexpected(e.to_string());

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(build_err)?,
        ));

        for turn in history {
            let message = match turn.role {
                MessageRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.content.clone())
                        .build()
                        .map_err(build_err)?,
                ),
                MessageRole::Assistant if turn.content.trim().is_empty() => continue,
                MessageRole::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.content.clone())
                        .build()
                        .map_err(build_err)?,
                ),
                MessageRole::Tool => {
                    let note = match &turn.tool_call_id {
                        Some(id) => format!("Tool result ({}): {}", id, turn.content),
                        None => format!("Tool result: {}", turn.content),
                    };
                    ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(note)
                            .build()
                            .map_err(build_err)?,
                    )
                }
            };
            messages.push(message);
        }

        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(build_err)?,
        ));
        Ok(messages)
    }
}

//=========================================================================================
// `AssistantService` Trait Implementation
//=========================================================================================

#[async_trait]
impl AssistantService for OpenAiChatAdapter {
    async fn reply(&self, history: &[Message], prompt: &str) -> PortResult<String> {
        let messages = Self::build_messages(history, prompt)?;
        debug!(model = %self.model, turns = messages.len(), "Requesting chat completion");

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            error!("Chat completion failed: {}", e);
            PortError::Unexpected(e.to_string())
        })?;

        let reply = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok(reply.trim().to_string())
    }
}
