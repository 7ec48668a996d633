use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, error, warn};

use crate::models::message::{Message, ToolRequest};
use crate::models::tool::Tool;
use crate::providers::base::Provider;
use crate::tools::Toolkit;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// One step of a reply turn, yielded in order over the reply stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    /// The model asked for tools; carries the assistant message recording
    /// the raw requests (its text content may be empty).
    ToolCalls(Message),
    /// The results of executing every requested tool, in request order.
    ToolResults(Message),
    /// An incremental text fragment of the final answer.
    Chunk(String),
    /// The completed answer, carrying the full accumulated text so callers
    /// can store it in their conversation history.
    Answer(Message),
}

/// Agent pairing a chat-completion provider with the tools it may pilot
pub struct Agent {
    provider: Box<dyn Provider>,
    toolkits: Vec<Box<dyn Toolkit>>,
    system: String,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            provider,
            toolkits: Vec::new(),
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the system directive prepended to every model request
    pub fn with_system_prompt<S: Into<String>>(mut self, system: S) -> Self {
        self.system = system.into();
        self
    }

    /// Add a toolkit to the agent
    pub fn add_toolkit(&mut self, toolkit: Box<dyn Toolkit>) {
        self.toolkits.push(toolkit);
    }

    /// All tool specs across toolkits, offered on the deciding call
    fn tools(&self) -> Vec<Tool> {
        self.toolkits
            .iter()
            .flat_map(|toolkit| toolkit.tools().iter().cloned())
            .collect()
    }

    /// Execute a single requested tool call, always producing text output.
    /// Failures stay inside the tool boundary: unknown names, rejected
    /// parameters, and execution errors all come back as ordinary tool
    /// output the model can reason about.
    async fn dispatch_tool_call(&self, request: &ToolRequest) -> String {
        let call = match &request.tool_call {
            Ok(call) => call.clone(),
            Err(e) => return e.to_string(),
        };

        let toolkit = self
            .toolkits
            .iter()
            .find(|toolkit| toolkit.tools().iter().any(|tool| tool.name == call.name));

        let toolkit = match toolkit {
            Some(toolkit) => toolkit,
            None => {
                warn!("model requested unregistered tool {:?}", call.name);
                return format!("Unknown function: {}", call.name);
            }
        };

        match toolkit.call(call).await {
            Ok(output) => output,
            Err(e) => e.to_string(),
        }
    }

    /// Run one reply turn over the conversation.
    ///
    /// A turn makes at most two model calls: one non-streaming call with
    /// tool specs to let the model decide whether it needs tools, and -- only
    /// if it requested any -- a second, streaming call over the extended
    /// conversation with no tool specs. The returned stream is finite, lazy,
    /// and pull-based; dropping it abandons whatever call is in flight.
    ///
    /// Model-call failures do not surface as errors: the turn ends with a
    /// single empty `Chunk` and an empty `Answer`.
    pub fn reply(&self, messages: &[Message]) -> BoxStream<'_, ReplyEvent> {
        let tools = self.tools();
        let mut conversation = messages.to_vec();

        Box::pin(stream! {
            let response = match self
                .provider
                .complete(&self.system, &conversation, &tools)
                .await
            {
                Ok((response, usage)) => {
                    debug!(?usage, "deciding call finished");
                    response
                }
                Err(e) => {
                    error!("model call failed: {:#}", e);
                    yield ReplyEvent::Chunk(String::new());
                    yield ReplyEvent::Answer(Message::assistant().with_text(""));
                    return;
                }
            };

            let tool_requests: Vec<ToolRequest> = response
                .tool_requests()
                .into_iter()
                .cloned()
                .collect();

            if tool_requests.is_empty() {
                // No tools needed: the deciding call's content is the final
                // answer, emitted directly without a second call.
                let text = response.text();
                yield ReplyEvent::Chunk(text);
                yield ReplyEvent::Answer(response);
                return;
            }

            yield ReplyEvent::ToolCalls(response.clone());
            conversation.push(response);

            // Tools run one at a time, in the order the model asked for them
            let mut results = Message::user();
            for request in &tool_requests {
                let output = self.dispatch_tool_call(request).await;
                results = results.with_tool_response(request.id.clone(), Ok(output));
            }

            yield ReplyEvent::ToolResults(results.clone());
            conversation.push(results);

            let mut fragments = match self
                .provider
                .complete_streaming(&self.system, &conversation)
                .await
            {
                Ok(fragments) => fragments,
                Err(e) => {
                    error!("model call failed: {:#}", e);
                    yield ReplyEvent::Chunk(String::new());
                    yield ReplyEvent::Answer(Message::assistant().with_text(""));
                    return;
                }
            };

            let mut answer = String::new();
            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(fragment) => {
                        answer.push_str(&fragment);
                        yield ReplyEvent::Chunk(fragment);
                    }
                    Err(e) => {
                        error!("answer stream failed: {:#}", e);
                        yield ReplyEvent::Chunk(String::new());
                        break;
                    }
                }
            }

            yield ReplyEvent::Answer(Message::assistant().with_text(answer));
        })
    }
}
