use anyhow::{anyhow, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{CompletionStream, Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{messages_to_openai_spec, openai_response_to_message, tools_to_openai_spec};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

/// Server-sent chunk of a streaming chat completion
#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        )
    }

    fn get_usage(data: &Value) -> Usage {
        let usage = match data.get("usage") {
            Some(usage) => usage,
            None => return Usage::default(),
        };

        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let total_tokens = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn build_payload(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        stream: bool,
    ) -> Result<Value> {
        let system_message = json!({
            "role": "system",
            "content": system
        });

        let messages_spec = messages_to_openai_spec(messages);
        let tools_spec = if !tools.is_empty() {
            tools_to_openai_spec(tools)?
        } else {
            vec![]
        };

        // create messages array with system message first
        let mut messages_array = vec![system_message];
        messages_array.extend(messages_spec);

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array
        });

        if !tools_spec.is_empty() {
            payload
                .as_object_mut()
                .unwrap()
                .insert("tools".to_string(), json!(tools_spec));
            payload
                .as_object_mut()
                .unwrap()
                .insert("tool_choice".to_string(), json!("auto"));
        }
        if let Some(temp) = self.config.temperature {
            payload
                .as_object_mut()
                .unwrap()
                .insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            payload
                .as_object_mut()
                .unwrap()
                .insert("max_tokens".to_string(), json!(tokens));
        }
        if stream {
            payload
                .as_object_mut()
                .unwrap()
                .insert("stream".to_string(), json!(true));
        }

        Ok(payload)
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            _ => Err(anyhow!(
                "Request failed: {}\nPayload: {}",
                response.status(),
                payload
            )),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let payload = self.build_payload(system, messages, tools, false)?;
        let response = self.post(payload).await?;

        if let Some(error) = response.get("error") {
            return Err(anyhow!("OpenAI API error: {}", error));
        }

        let message = openai_response_to_message(response.clone())?;
        let usage = Self::get_usage(&response);

        Ok((message, usage))
    }

    async fn complete_streaming(
        &self,
        system: &str,
        messages: &[Message],
    ) -> Result<CompletionStream> {
        let payload = self.build_payload(system, messages, &[], true)?;

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(anyhow!("Request failed: {}\n{}", status, body));
        }

        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer: Vec<u8> = Vec::new();

            'receive: while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                buffer.extend_from_slice(&chunk);

                // SSE events are newline-delimited; a chunk may carry a
                // partial line, so scan and drain up to each newline
                while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let line = String::from_utf8_lossy(&buffer[..newline]).trim().to_string();
                    buffer.drain(..=newline);

                    let payload = match line.strip_prefix("data:") {
                        Some(rest) => rest.trim_start().to_string(),
                        None => continue,
                    };

                    if payload == "[DONE]" {
                        break 'receive;
                    }
                    if payload.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<StreamResponse>(&payload) {
                        Ok(parsed) => {
                            if let Some(content) = parsed
                                .choices
                                .first()
                                .and_then(|choice| choice.delta.content.clone())
                            {
                                yield content;
                            }
                        }
                        Err(_) => {
                            // anything that is not a delta is an API error payload
                            Err(anyhow!("OpenAI API error: {}", payload))?;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_mock_server(response_body: Value) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let config = OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: Some(0.7),
            max_tokens: None,
        };

        let provider = OpenAiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_complete_basic() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello! How can I assist you today?",
                    "tool_calls": null
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 15,
                "total_tokens": 27
            }
        });

        let (_, provider) = setup_mock_server(response_body).await;

        let messages = vec![Message::user().with_text("Hello?")];
        let (message, usage) = provider
            .complete("You are a helpful assistant.", &messages, &[])
            .await?;

        assert_eq!(message.text(), "Hello! How can I assist you today?");
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(15));
        assert_eq!(usage.total_tokens, Some(27));

        Ok(())
    }

    #[tokio::test]
    async fn test_complete_tool_request() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-tool",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "web_search",
                            "arguments": "{\"query\":\"Tokyo weather today\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 20,
                "completion_tokens": 15,
                "total_tokens": 35
            }
        });

        let (_, provider) = setup_mock_server(response_body).await;

        let messages = vec![Message::user().with_text("What is the weather in Tokyo today?")];
        let tool = Tool::new(
            "web_search",
            "Search the internet for information",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search keywords or question"
                    }
                },
                "required": ["query"]
            }),
        );

        let (message, usage) = provider
            .complete("You are a helpful assistant.", &messages, &[tool])
            .await?;

        let requests = message.tool_requests();
        assert_eq!(requests.len(), 1);
        let tool_call = requests[0].tool_call.as_ref().unwrap();
        assert_eq!(tool_call.name, "web_search");
        assert_eq!(tool_call.arguments, json!({"query": "Tokyo weather today"}));
        assert_eq!(usage.total_tokens, Some(35));

        Ok(())
    }

    #[tokio::test]
    async fn test_complete_sends_tool_choice_auto() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"tool_choice": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "ok"},
                    "finish_reason": "stop"
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(OpenAiProviderConfig::new(
            mock_server.uri(),
            "test_api_key",
            "gpt-4o",
        ))?;

        let tool = Tool::new("web_search", "search", json!({"type": "object"}));
        let messages = vec![Message::user().with_text("hi")];
        provider.complete("system", &messages, &[tool]).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_complete_streaming() -> Result<()> {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"It is \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"sunny in Tokyo.\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{}}]}\n\n",
            "data: [DONE]\n\n",
        );

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(OpenAiProviderConfig::new(
            mock_server.uri(),
            "test_api_key",
            "gpt-4o",
        ))?;

        let messages = vec![Message::user().with_text("What is the weather in Tokyo today?")];
        let mut stream = provider.complete_streaming("system", &messages).await?;

        let mut fragments = Vec::new();
        while let Some(fragment) = stream.next().await {
            fragments.push(fragment?);
        }

        assert_eq!(fragments, vec!["It is ", "sunny in Tokyo."]);
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_streaming_error_status() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(OpenAiProviderConfig::new(
            mock_server.uri(),
            "bad_key",
            "gpt-4o",
        ))?;

        let messages = vec![Message::user().with_text("hi")];
        assert!(provider.complete_streaming("system", &messages).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_streaming_error_payload() -> Result<()> {
        let body = "data: {\"error\":{\"message\":\"model overloaded\"}}\n\n";

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(OpenAiProviderConfig::new(
            mock_server.uri(),
            "test_api_key",
            "gpt-4o",
        ))?;

        let messages = vec![Message::user().with_text("hi")];
        let mut stream = provider.complete_streaming("system", &messages).await?;

        let first = stream.next().await.expect("expected an item");
        assert!(first.is_err());
        Ok(())
    }
}
