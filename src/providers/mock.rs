//! Mock provider for testing.
//!
//! Returns predefined responses in sequence, cycling through them, and
//! records every request it receives so tests can assert on the exact
//! message lists the engine produced.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt as _;

use crate::chat::{ChatProvider, ChatRequest, ChatResponse, ChunkStream, StopReason};
use crate::error::Result;
use crate::stream::StreamChunk;

/// A scripted provider.
#[derive(Debug)]
pub struct MockProvider {
    responses: Vec<ChatResponse>,
    cursor: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    /// Create a provider that cycles through `responses`.
    #[must_use]
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses,
            cursor: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of provider calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// The most recent request, if any.
    #[must_use]
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// All recorded requests.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self, request: &ChatRequest) -> ChatResponse {
        self.requests.lock().unwrap().push(request.clone());
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(index % self.responses.len().max(1))
            .cloned()
            .unwrap_or_else(|| ChatResponse::from_text("(no scripted response)"))
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        Ok(self.next_response(request))
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let response = self.next_response(request);

        let mut chunks: Vec<Result<StreamChunk>> = Vec::new();
        if !response.message.content.is_empty() {
            // Split the text so consumers see more than one delta.
            let content = response.message.content.clone();
            let mid = content.len() / 2;
            let split = (0..=mid)
                .rev()
                .find(|i| content.is_char_boundary(*i))
                .unwrap_or(0);
            let (head, tail) = content.split_at(split);
            if !head.is_empty() {
                chunks.push(Ok(StreamChunk::TextDelta(head.to_owned())));
            }
            if !tail.is_empty() {
                chunks.push(Ok(StreamChunk::TextDelta(tail.to_owned())));
            }
        }
        for (index, call) in response.message.tool_calls().iter().enumerate() {
            chunks.push(Ok(StreamChunk::ToolCallStart {
                index,
                id: call.id.clone(),
                name: call.name.clone(),
            }));
            chunks.push(Ok(StreamChunk::ToolCallDelta {
                index,
                arguments: call.arguments.to_string(),
            }));
        }
        chunks.push(Ok(StreamChunk::Done {
            stop_reason: if response.message.has_tool_calls() {
                StopReason::ToolCalls
            } else {
                response.stop_reason
            },
            usage: response.usage,
        }));

        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, ToolCall};
    use crate::stream::StreamAggregator;
    use serde_json::json;

    #[tokio::test]
    async fn cycles_scripted_responses() {
        let provider = MockProvider::new(vec![
            ChatResponse::from_text("first"),
            ChatResponse::from_text("second"),
        ]);
        let request = ChatRequest::default();

        assert_eq!(provider.chat(&request).await.unwrap().message.content, "first");
        assert_eq!(provider.chat(&request).await.unwrap().message.content, "second");
        assert_eq!(provider.chat(&request).await.unwrap().message.content, "first");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn stream_round_trips_through_aggregator() {
        let scripted = ChatResponse::new(Message::assistant_with_tool_calls(
            "thinking",
            vec![ToolCall::new("c1", "upper", json!({"text": "x"}))],
        ));
        let provider = MockProvider::new(vec![scripted]);

        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();
        let mut aggregator = StreamAggregator::new();
        while let Some(chunk) = stream.next().await {
            aggregator.apply(&chunk.unwrap());
        }

        let rebuilt = aggregator.into_response();
        assert_eq!(rebuilt.message.content, "thinking");
        assert_eq!(rebuilt.message.tool_calls()[0].arguments, json!({"text": "x"}));
    }
}
