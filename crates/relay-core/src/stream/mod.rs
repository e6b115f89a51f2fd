//! Upstream SSE translation: byte stream in, structured events out.

mod collector;
mod sse;
mod think_tag;

pub use collector::CollectedResponse;
pub use collector::ResponseCollector;
pub use sse::SseTransformer;
pub use think_tag::ThinkTagSplitter;

/// One structured item produced while consuming the upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Answer text.
    Text(String),
    /// Reasoning text, from `thought` parts or `<think>` segments.
    Thinking(String),
    /// All tool calls of the turn, emitted once at finish.
    ToolCalls(Vec<ToolCall>),
    /// Token accounting, emitted once at stream end when upstream sent it.
    Usage(Usage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub index: usize,
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments object.
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub(crate) fn from_metadata(value: &serde_json::Value) -> Option<Self> {
        let prompt = value.get("promptTokenCount").and_then(|v| v.as_u64());
        let completion = value.get("candidatesTokenCount").and_then(|v| v.as_u64());
        let total = value.get("totalTokenCount").and_then(|v| v.as_u64());
        if prompt.is_none() && completion.is_none() && total.is_none() {
            return None;
        }
        let prompt_tokens = prompt.unwrap_or(0);
        let completion_tokens = completion.unwrap_or(0);
        Some(Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total.unwrap_or(prompt_tokens + completion_tokens),
        })
    }
}
