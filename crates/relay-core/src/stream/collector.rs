//! Event-stream accumulation for non-streaming responses.

use crate::config::ThinkingOutput;

use super::{StreamEvent, ToolCall, Usage};

/// Consumes the `on_event` callback into one complete response.
pub struct ResponseCollector {
    policy: ThinkingOutput,
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectedResponse {
    pub content: String,
    /// Populated only under the `reasoning_content` policy.
    pub reasoning_content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

impl ResponseCollector {
    pub fn new(policy: ThinkingOutput) -> Self {
        Self {
            policy,
            content: String::new(),
            reasoning: String::new(),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    pub fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Text(text) => self.content.push_str(&text),
            StreamEvent::Thinking(text) => match self.policy {
                ThinkingOutput::ReasoningContent => self.reasoning.push_str(&text),
                ThinkingOutput::Raw => self.content.push_str(&text),
                ThinkingOutput::Filter => {},
            },
            StreamEvent::ToolCalls(calls) => self.tool_calls.extend(calls),
            StreamEvent::Usage(usage) => self.usage = Some(usage),
        }
    }

    pub fn finish(self) -> CollectedResponse {
        CollectedResponse {
            content: self.content,
            reasoning_content: if self.reasoning.is_empty() { None } else { Some(self.reasoning) },
            tool_calls: self.tool_calls,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(policy: ThinkingOutput, events: Vec<StreamEvent>) -> CollectedResponse {
        let mut collector = ResponseCollector::new(policy);
        for event in events {
            collector.on_event(event);
        }
        collector.finish()
    }

    fn sample_events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::Text("A".into()),
            StreamEvent::Thinking("B".into()),
            StreamEvent::Text("C".into()),
        ]
    }

    #[test]
    fn test_reasoning_content_policy() {
        let resp = collect(ThinkingOutput::ReasoningContent, sample_events());
        assert_eq!(resp.content, "AC");
        assert_eq!(resp.reasoning_content.as_deref(), Some("B"));
    }

    #[test]
    fn test_raw_policy_concatenates() {
        let resp = collect(ThinkingOutput::Raw, sample_events());
        assert_eq!(resp.content, "ABC");
        assert_eq!(resp.reasoning_content, None);
    }

    #[test]
    fn test_filter_policy_drops() {
        let resp = collect(ThinkingOutput::Filter, sample_events());
        assert_eq!(resp.content, "AC");
        assert_eq!(resp.reasoning_content, None);
    }

    #[test]
    fn test_tool_calls_and_usage_carried() {
        let resp = collect(
            ThinkingOutput::ReasoningContent,
            vec![
                StreamEvent::ToolCalls(vec![ToolCall {
                    index: 0,
                    id: "call_1".into(),
                    name: "f".into(),
                    arguments: "{}".into(),
                }]),
                StreamEvent::Usage(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 2,
                    total_tokens: 3,
                }),
            ],
        );
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.usage.unwrap().total_tokens, 3);
    }
}
