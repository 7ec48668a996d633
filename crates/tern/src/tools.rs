use async_trait::async_trait;

use crate::errors::AgentResult;
use crate::models::tool::{Tool, ToolCall};

pub mod fetch;
pub mod search;
pub mod web;

pub use web::WebToolkit;

/// Browser-like user agent sent with outbound tool requests; some backends
/// refuse requests that arrive without one.
pub(crate) const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// A fixed set of tools an agent can offer to the model.
///
/// Implementations declare their specs once at construction and dispatch
/// calls by exact tool name. Argument validation happens before any work:
/// malformed parameters are rejected with `InvalidParameters` rather than
/// passed through.
#[async_trait]
pub trait Toolkit: Send + Sync {
    /// Get the name of the toolkit
    fn name(&self) -> &str;

    /// Get the toolkit description
    fn description(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with the given parameters, returning its text output
    async fn call(&self, tool_call: ToolCall) -> AgentResult<String>;
}
