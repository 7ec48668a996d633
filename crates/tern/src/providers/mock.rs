use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{CompletionStream, Provider, Usage};

/// A mock provider that returns pre-configured responses for testing.
/// Streaming pops the next response and yields one fragment per text
/// content item, so multi-fragment streams are scripted with repeated
/// `with_text` calls.
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    complete_calls: Arc<AtomicUsize>,
    streaming_calls: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            complete_calls: Arc::new(AtomicUsize::new(0)),
            streaming_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of non-streaming completions issued so far
    pub fn complete_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.complete_calls)
    }

    /// Number of streaming completions issued so far
    pub fn streaming_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.streaming_calls)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return empty response if no more pre-configured responses
            Ok((Message::assistant().with_text(""), Usage::default()))
        } else {
            Ok((responses.remove(0), Usage::default()))
        }
    }

    async fn complete_streaming(
        &self,
        _system: &str,
        _messages: &[Message],
    ) -> Result<CompletionStream> {
        self.streaming_calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        let fragments: Vec<String> = if responses.is_empty() {
            Vec::new()
        } else {
            responses
                .remove(0)
                .content
                .iter()
                .filter_map(|content| content.as_text().map(String::from))
                .collect()
        };

        Ok(futures::stream::iter(fragments.into_iter().map(Ok)).boxed())
    }
}
