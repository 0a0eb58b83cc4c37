use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting reported by the model, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub prompt_cached_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// A language model that turns instructions plus history into a reply.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Short identifier used in logs and metrics.
    fn label(&self) -> &str;

    async fn reply(&self, instructions: &str, history: &[ChatMessage]) -> Result<LlmReply>;
}

/// An implementation of `LanguageModel` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The chat model identifier to use (e.g., "gpt-4o-mini").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAICompatibleClient {
    fn label(&self) -> &str {
        &self.model
    }

    async fn reply(&self, instructions: &str, history: &[ChatMessage]) -> Result<LlmReply> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(instructions.to_string())
                .build()?
                .into(),
        ];
        for msg in history {
            messages.push(match msg.role {
                ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
                ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            });
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;

        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;

        let text = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .context("No content in LLM response")?;

        let usage = response.usage.as_ref().map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens.into(),
            prompt_cached_tokens: u
                .prompt_tokens_details
                .as_ref()
                .and_then(|d| d.cached_tokens)
                .unwrap_or(0)
                .into(),
            completion_tokens: u.completion_tokens.into(),
        });

        Ok(LlmReply { text, usage })
    }
}

/// A `LanguageModel` that plays back fixed lines, in order, wrapping around.
///
/// Deterministic and offline, for local runs and tests.
pub struct ScriptedLanguageModel {
    lines: Vec<String>,
    next: AtomicUsize,
}

impl ScriptedLanguageModel {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            next: AtomicUsize::new(0),
        }
    }

    /// A short interview script.
    pub fn interview() -> Self {
        Self::new(vec![
            "Hello! I'm ready to start the interview. How are you doing today?".to_string(),
            "Great. Could you walk me through your most recent role?".to_string(),
            "What was the hardest technical problem you solved there?".to_string(),
            "Thanks. How did you measure whether that solution worked?".to_string(),
            "That's all my questions. Do you have any for me?".to_string(),
        ])
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    fn label(&self) -> &str {
        "scripted"
    }

    async fn reply(&self, instructions: &str, history: &[ChatMessage]) -> Result<LlmReply> {
        anyhow::ensure!(!self.lines.is_empty(), "Scripted model has no lines");
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.lines.len();
        let text = self.lines[index].clone();
        let prompt_chars: usize =
            instructions.len() + history.iter().map(|m| m.content.len()).sum::<usize>();
        Ok(LlmReply {
            usage: Some(TokenUsage {
                // Roughly four characters per token.
                prompt_tokens: prompt_chars.div_ceil(4) as u64,
                prompt_cached_tokens: 0,
                completion_tokens: text.len().div_ceil(4) as u64,
            }),
            text,
        })
    }
}
