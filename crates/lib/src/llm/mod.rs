//! Upstream completion service abstraction and the Azure OpenAI client.
//!
//! A backend turns a list of chat messages into an ordered stream of text fragments.

mod azure_openai;
mod sse;

pub use azure_openai::AzureOpenAiClient;
pub use sse::{SseDecoder, SseEvent};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// One chat message in the request (`role` is "system" or "user" here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream api error: {status} {body}")]
    Api { status: u16, body: String },
    #[error("upstream stream error: {0}")]
    Stream(String),
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
    #[error("upstream did not respond within {0:?}")]
    Timeout(std::time::Duration),
}

/// Ordered text fragments; ends after the last fragment or at the first error.
pub type ChunkStream = BoxStream<'static, Result<String, LlmError>>;

/// A streaming chat completion service.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Open a streaming completion. Errors establishing the stream are returned here; errors
    /// while consuming it arrive as items.
    async fn chat_stream(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream, LlmError>;
}
