use anyhow::Result;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Incremental text fragments of a streaming completion, in arrival order.
/// The stream is finite and pull-based: dropping it abandons the request.
pub type CompletionStream = BoxStream<'static, Result<String>>;

/// Base trait for chat-completion providers
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message for the conversation in one round trip.
    /// Tool specs are offered to the model with tool choice left to it.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)>;

    /// Generate the next message as a stream of text fragments. No tool
    /// specs are offered, so the model cannot request further tool calls.
    async fn complete_streaming(
        &self,
        system: &str,
        messages: &[Message],
    ) -> Result<CompletionStream>;
}
