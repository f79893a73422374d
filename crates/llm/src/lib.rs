//! LLM client abstraction for weft
//!
//! Provides a unified interface for reasoning/embedding providers and the
//! transport-level [`Provider`] trait the sync engine is written against.

use anyhow::{Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        CreateEmbeddingRequestArgs, EmbeddingInput,
    },
    Client as OpenAIClient,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (openai, or an OpenAI-compatible endpoint)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model to use for chat completions
    #[serde(default = "default_model")]
    pub model: String,
    /// Model to use for embeddings; empty disables the embedding capability
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// API key (optional if using env var or local provider)
    pub api_key: Option<String>,
    /// Base URL override (for custom endpoints)
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            api_key: None,
            base_url: None,
        }
    }
}

/// A message in a chat conversation
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Transport-level contract the sync engine consumes.
///
/// Implemented by [`LlmClient`]; tests substitute in-memory fakes returning
/// canned responses. Capability gating: a scope with no bound provider has no
/// reasoning tier, and a provider with an empty embedding model reports
/// `supports_embedding() == false`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Completion with a system prompt and a user message.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Generate embeddings for a list of texts, order-aligned with the input.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Whether this provider has an embedding model configured.
    fn supports_embedding(&self) -> bool;
}

/// LLM client abstraction
pub struct LlmClient {
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    /// Generate a chat completion
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        match self.config.provider.as_str() {
            "openai" => self.chat_openai(messages).await,
            provider => Err(common::Error::NotConfigured(format!(
                "Unsupported LLM provider: {provider}"
            ))
            .into()),
        }
    }

    /// Simple completion with a system prompt and user message
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.chat(vec![Message::system(system), Message::user(user)])
            .await
    }

    /// Generate embeddings for a list of texts
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if self.config.embedding_model.is_empty() {
            return Err(common::Error::NotConfigured(
                "No embedding model configured".to_string(),
            )
            .into());
        }
        match self.config.provider.as_str() {
            "openai" => self.embed_openai(texts).await,
            provider => Err(common::Error::NotConfigured(format!(
                "Unsupported embedding provider: {provider}"
            ))
            .into()),
        }
    }

    /// Generate embedding for a single text
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed(vec![text.to_string()]).await?;
        results.into_iter().next().context("No embedding returned")
    }

    async fn embed_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let client = self.openai_client();

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.config.embedding_model)
            .input(EmbeddingInput::StringArray(texts))
            .build()
            .context("Failed to build embedding request")?;

        let response = client
            .embeddings()
            .create(request)
            .await
            .context("Failed to create embeddings")?;

        let embeddings = response.data.into_iter().map(|e| e.embedding).collect();

        Ok(embeddings)
    }

    async fn chat_openai(&self, messages: Vec<Message>) -> Result<String> {
        let client = self.openai_client();

        let openai_messages: Vec<ChatCompletionRequestMessage> = messages
            .into_iter()
            .map(|msg| match msg.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(msg.content)
                    .build()
                    .unwrap()
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content)
                    .build()
                    .unwrap()
                    .into(),
            })
            .collect();

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(openai_messages)
            .build()
            .context("Failed to build chat completion request")?;

        let response = client
            .chat()
            .create(request)
            .await
            .context("Failed to create chat completion")?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    fn openai_client(&self) -> OpenAIClient<OpenAIConfig> {
        let mut openai_config = OpenAIConfig::new();

        if let Some(api_key) = &self.config.api_key {
            openai_config = openai_config.with_api_key(api_key);
        }

        if let Some(base_url) = &self.config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        OpenAIClient::with_config(openai_config)
    }

    /// Get the configured model name
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Get the configured provider name
    pub fn provider(&self) -> &str {
        &self.config.provider
    }
}

#[async_trait]
impl Provider for LlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        LlmClient::complete(self, system, user).await
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        LlmClient::embed(self, texts).await
    }

    fn supports_embedding(&self) -> bool {
        !self.config.embedding_model.is_empty()
    }
}
