//! Provider trait: the abstraction over streaming LLM backends.
//!
//! A Provider turns a conversation snapshot into a stream of incremental
//! [`GenerationEvent`]s. The turn controller consumes that stream and may
//! walk away from it at any point (fallback, second tool call, deadline).
//!
//! Implementations: OpenAI-compatible endpoints (OpenAI, Fireworks, Groq, ...).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-3.5-turbo", "accounts/fireworks/models/llama-v3-70b-instruct")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One incremental delta from a generation stream.
///
/// Carries a content fragment, a tool-call fragment, or neither. Events
/// carrying neither are ignored by consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallDelta>,
}

impl GenerationEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            tool_call: None,
        }
    }

    /// First fragment of a function call: carries the id and name.
    pub fn tool_start(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            content: None,
            tool_call: Some(ToolCallDelta {
                id: Some(id.into()),
                kind: Some("function".into()),
                name: Some(name.into()),
                arguments: None,
            }),
        }
    }

    /// A continuation fragment carrying only argument text.
    pub fn tool_arguments(fragment: impl Into<String>) -> Self {
        Self {
            content: None,
            tool_call: Some(ToolCallDelta {
                arguments: Some(fragment.into()),
                ..Default::default()
            }),
        }
    }
}

/// Partial tool-call state as it appears in a stream.
///
/// `id`, `kind` and `name` normally appear only on the first fragment of a
/// call; later fragments carry argument text only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Receiving half of a generation stream.
///
/// Dropping it abandons the stream. Producers must observe the closed
/// channel and release the upstream connection instead of draining it.
pub type EventStream = mpsc::Receiver<Result<GenerationEvent, ProviderError>>;

/// The core Provider trait.
///
/// The turn controller calls `stream()` without knowing which backend is
/// behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "fireworks").
    fn name(&self) -> &str;

    /// Start a streaming completion.
    ///
    /// The returned receiver yields events in generation order and closes
    /// when the completion ends. Implementations must stop reading and drop
    /// the upstream connection as soon as the receiver is dropped.
    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

/// A model bound to the provider that serves it.
#[derive(Clone)]
pub struct ModelRoute {
    pub provider: Arc<dyn Provider>,
    pub model: String,
}

impl ModelRoute {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl std::fmt::Debug for ModelRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRoute")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}
