//! Completion provider trait: the abstraction over LLM backends.
//!
//! The engine never talks to a specific provider. It only needs
//! `complete(messages, options) -> content` to attempt an improvement of a
//! block under review; whoever embeds the engine supplies the backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// The role of a message sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionRole {
    System,
    User,
    Assistant,
}

/// A single prompt message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: CompletionRole,
    pub content: String,
}

impl CompletionMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: CompletionRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: CompletionRole::User,
            content: content.into(),
        }
    }
}

/// Generation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// The core completion trait.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// The provider name (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Produce content for the given prompt.
    async fn complete(
        &self,
        messages: Vec<CompletionMessage>,
        options: CompletionOptions,
    ) -> Result<String, ProviderError>;
}
