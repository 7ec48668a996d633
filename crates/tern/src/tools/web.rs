use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{fetch, search, Toolkit};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};

pub const DEFAULT_NUM_RESULTS: usize = 5;

/// Upper bound on requested results, to keep tool output bounded
pub const MAX_NUM_RESULTS: usize = 20;

/// The fixed two-tool registry offered to the model: live web search and
/// webpage-content retrieval. The tool list is built once and immutable for
/// the life of the toolkit.
pub struct WebToolkit {
    client: Client,
    search_endpoint: String,
    tools: Vec<Tool>,
}

impl WebToolkit {
    pub fn new() -> Self {
        Self::with_search_endpoint(search::SEARCH_ENDPOINT)
    }

    /// Use a different search backend endpoint; also how tests point the
    /// toolkit at a local server.
    pub fn with_search_endpoint<S: Into<String>>(endpoint: S) -> Self {
        let web_search_tool = Tool::new(
            "web_search",
            "Search the internet for information when the user asks for the latest \
             information, real-time data, or needs to find specific materials",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search keywords or question"
                    },
                    "num_results": {
                        "type": "integer",
                        "description": "Number of search results to return, default is 5",
                        "default": 5
                    }
                },
                "required": ["query"]
            }),
        );

        let webpage_tool = Tool::new(
            "get_webpage_content",
            "Retrieve detailed content from a specified webpage",
            json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL of the webpage to retrieve content from"
                    }
                },
                "required": ["url"]
            }),
        );

        Self {
            client: Client::new(),
            search_endpoint: endpoint.into(),
            tools: vec![web_search_tool, webpage_tool],
        }
    }

    async fn web_search(&self, params: Value) -> AgentResult<String> {
        let query = params
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| {
                AgentError::InvalidParameters("'query' must be a non-empty string".into())
            })?;

        let num_results = match params.get("num_results") {
            None | Some(Value::Null) => DEFAULT_NUM_RESULTS,
            Some(value) => value
                .as_u64()
                .filter(|&n| n >= 1)
                .ok_or_else(|| {
                    AgentError::InvalidParameters(
                        "'num_results' must be a positive integer".into(),
                    )
                })? as usize,
        };
        let num_results = num_results.min(MAX_NUM_RESULTS);

        debug!("web_search for {:?} ({} results)", query, num_results);
        Ok(search::run(&self.client, &self.search_endpoint, query, num_results).await)
    }

    async fn get_webpage_content(&self, params: Value) -> AgentResult<String> {
        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                AgentError::InvalidParameters("'url' must be a non-empty string".into())
            })?;

        let max_chars = match params.get("max_chars") {
            None | Some(Value::Null) => fetch::DEFAULT_MAX_CHARS,
            Some(value) => value
                .as_u64()
                .filter(|&n| n >= 1)
                .ok_or_else(|| {
                    AgentError::InvalidParameters("'max_chars' must be a positive integer".into())
                })? as usize,
        };

        debug!("get_webpage_content for {:?}", url);
        Ok(fetch::run(&self.client, url, max_chars).await)
    }
}

impl Default for WebToolkit {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Toolkit for WebToolkit {
    fn name(&self) -> &str {
        "web"
    }

    fn description(&self) -> &str {
        "Live web search and webpage content retrieval"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<String> {
        match tool_call.name.as_str() {
            "web_search" => self.web_search(tool_call.arguments).await,
            "get_webpage_content" => self.get_webpage_content(tool_call.arguments).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}
