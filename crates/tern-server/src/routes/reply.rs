use crate::state::AppState;
use axum::{
    extract::State,
    http::{self, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tern::{
    agent::{Agent, ReplyEvent},
    models::message::{Message, MessageContent},
    models::tool::ToolCall,
    providers::openai::OpenAiProvider,
    tools::WebToolkit,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// Types matching the incoming JSON structure
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    content: String,
    #[serde(default)]
    #[serde(rename = "toolInvocations")]
    tool_invocations: Vec<ToolInvocation>,
}

#[derive(Debug, Deserialize)]
struct ToolInvocation {
    state: String,
    #[serde(rename = "toolCallId")]
    tool_call_id: String,
    #[serde(rename = "toolName")]
    tool_name: String,
    args: Value,
    result: Option<String>,
}

// Custom SSE response type that implements the Vercel AI SDK data-stream
// protocol
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let stream = self;
        let body = axum::body::Body::from_stream(stream);

        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .header("x-vercel-ai-data-stream", "v1")
            .body(body)
            .unwrap()
    }
}

// Convert incoming messages to our internal Message type
fn convert_messages(incoming: Vec<IncomingMessage>) -> Vec<Message> {
    let mut messages = Vec::new();

    for msg in incoming {
        match msg.role.as_str() {
            "user" => {
                messages.push(Message::user().with_text(msg.content));
            }
            "assistant" => {
                // First replay any tool invocations - each represents a
                // complete request/response cycle from an earlier turn
                for tool in msg.tool_invocations {
                    if tool.state == "result" {
                        let tool_call = ToolCall::new(tool.tool_name, tool.args);
                        messages.push(
                            Message::assistant()
                                .with_tool_request(tool.tool_call_id.clone(), Ok(tool_call)),
                        );

                        if let Some(result) = tool.result {
                            messages.push(
                                Message::user().with_tool_response(tool.tool_call_id, Ok(result)),
                            );
                        }
                    }
                }

                // Then add the assistant's text response after tool interactions
                if !msg.content.is_empty() {
                    messages.push(Message::assistant().with_text(msg.content));
                }
            }
            _ => {
                tracing::warn!("Unknown role: {}", msg.role);
            }
        }
    }

    messages
}

// Protocol-specific frame formatting
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_text(text: &str) -> String {
        let encoded_text = serde_json::to_string(text).unwrap_or_else(|_| String::new());
        format!("0:{}\n", encoded_text)
    }

    fn format_tool_call(id: &str, name: &str, args: &Value) -> String {
        // Tool calls start with "9:"
        let tool_call = json!({
            "toolCallId": id,
            "toolName": name,
            "args": args
        });
        format!("9:{}\n", tool_call)
    }

    fn format_tool_response(id: &str, result: &str) -> String {
        // Tool responses start with "a:"
        let response = json!({
            "toolCallId": id,
            "result": result,
        });
        format!("a:{}\n", response)
    }

    fn format_finish(reason: &str) -> String {
        // Finish messages start with "d:"
        let finish = json!({
            "finishReason": reason,
            "usage": {
                "promptTokens": 0,
                "completionTokens": 0
            }
        });
        format!("d:{}\n", finish)
    }
}

/// Render one pipeline event as protocol frames. `Answer` produces nothing:
/// its text already went out as chunks.
fn event_frames(event: &ReplyEvent) -> Vec<String> {
    match event {
        ReplyEvent::ToolCalls(message) => message
            .tool_requests()
            .into_iter()
            .map(|request| match &request.tool_call {
                Ok(call) => {
                    ProtocolFormatter::format_tool_call(&request.id, &call.name, &call.arguments)
                }
                // an unreadable tool call still has to reach the interface;
                // its response frame carries the error text
                Err(_) => ProtocolFormatter::format_tool_call(&request.id, "invalid name", &json!({})),
            })
            .collect(),
        ReplyEvent::ToolResults(message) => message
            .content
            .iter()
            .filter_map(|content| match content {
                MessageContent::ToolResponse(response) => Some(match &response.tool_result {
                    Ok(result) => ProtocolFormatter::format_tool_response(&response.id, result),
                    Err(err) => ProtocolFormatter::format_tool_response(
                        &response.id,
                        &format!("Error {}", err),
                    ),
                }),
                _ => None,
            })
            .collect(),
        ReplyEvent::Chunk(fragment) => {
            if fragment.is_empty() {
                Vec::new()
            } else {
                vec![ProtocolFormatter::format_text(fragment)]
            }
        }
        ReplyEvent::Answer(_) => Vec::new(),
    }
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, StatusCode> {
    // Check protocol header (optional in our case)
    if let Some(protocol) = headers.get("x-protocol") {
        if protocol.to_str().map(|p| p != "data").unwrap_or(true) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    let stream = ReceiverStream::new(rx);

    // Setup agent with the web toolkit
    let provider = OpenAiProvider::new(state.provider_config)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut agent = Agent::new(Box::new(provider));
    agent.add_toolkit(Box::new(WebToolkit::new()));

    // Convert incoming messages
    let messages = convert_messages(request.messages);

    // Spawn task to handle streaming
    tokio::spawn(async move {
        let mut events = agent.reply(&messages);
        let mut produced = false;

        'turn: while let Some(event) = events.next().await {
            for frame in event_frames(&event) {
                produced = true;
                if tx.send(frame).await.is_err() {
                    // Client disconnected; dropping the stream abandons any
                    // in-flight model call
                    tracing::debug!("client disconnected mid-reply");
                    break 'turn;
                }
            }
        }

        // A turn that produced nothing is what a swallowed model failure
        // looks like from here
        let reason = if produced { "stop" } else { "error" };
        let _ = tx.send(ProtocolFormatter::format_finish(reason)).await;
    });

    Ok(SseResponse::new(stream))
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/reply", post(handler)).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde_json::json;
    use tern::providers::configs::OpenAiProviderConfig;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_convert_messages_replays_tool_cycles() {
        let incoming = vec![
            IncomingMessage {
                role: "user".to_string(),
                content: "What is the weather in Tokyo today?".to_string(),
                tool_invocations: vec![],
            },
            IncomingMessage {
                role: "assistant".to_string(),
                content: "It is sunny.".to_string(),
                tool_invocations: vec![ToolInvocation {
                    state: "result".to_string(),
                    tool_call_id: "call_1".to_string(),
                    tool_name: "web_search".to_string(),
                    args: json!({"query": "Tokyo weather today"}),
                    result: Some("1. **Tokyo Weather**...".to_string()),
                }],
            },
        ];

        let messages = convert_messages(incoming);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].text(), "What is the weather in Tokyo today?");
        assert_eq!(messages[1].tool_requests()[0].id, "call_1");
        let response = messages[2].content[0].as_tool_response().unwrap();
        assert_eq!(response.id, "call_1");
        assert_eq!(messages[3].text(), "It is sunny.");
    }

    #[test]
    fn test_convert_messages_skips_unknown_roles() {
        let incoming = vec![IncomingMessage {
            role: "tool".to_string(),
            content: "raw tool output".to_string(),
            tool_invocations: vec![],
        }];

        assert!(convert_messages(incoming).is_empty());
    }

    #[test]
    fn test_protocol_frames() {
        assert_eq!(
            ProtocolFormatter::format_text("hello\nworld"),
            "0:\"hello\\nworld\"\n"
        );
        assert_eq!(
            ProtocolFormatter::format_tool_call("1", "web_search", &json!({"query": "q"})),
            "9:{\"args\":{\"query\":\"q\"},\"toolCallId\":\"1\",\"toolName\":\"web_search\"}\n"
        );
        assert!(ProtocolFormatter::format_tool_response("1", "out").starts_with("a:"));
        assert!(ProtocolFormatter::format_finish("stop").starts_with("d:"));
    }

    #[tokio::test]
    async fn test_reply_route_streams_frames() {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hello there!"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
            })))
            .mount(&llm)
            .await;

        let state = AppState {
            provider_config: OpenAiProviderConfig::new(llm.uri(), "test_api_key", "gpt-4o"),
        };
        let app = routes(state);

        let request = http::Request::builder()
            .method("POST")
            .uri("/reply")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"messages": [{"role": "user", "content": "Hi"}]}).to_string(),
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-vercel-ai-data-stream").unwrap(),
            "v1"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();

        assert!(body.contains("0:\"Hello there!\"\n"));
        assert!(body.contains("\"finishReason\":\"stop\""));
    }

    #[tokio::test]
    async fn test_reply_route_rejects_wrong_protocol() {
        let state = AppState {
            provider_config: OpenAiProviderConfig::new("http://localhost:0", "key", "gpt-4o"),
        };
        let app = routes(state);

        let request = http::Request::builder()
            .method("POST")
            .uri("/reply")
            .header("content-type", "application/json")
            .header("x-protocol", "text")
            .body(Body::from(json!({"messages": []}).to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
