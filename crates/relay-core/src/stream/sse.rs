//! Upstream SSE frame parsing.
//!
//! Tolerates two independent fragmentations: a byte chunk may split an SSE
//! line anywhere (handled by the line buffer), and a `<think>` marker may
//! span two payloads (handled by the tag splitter).

use bytes::BytesMut;
use serde_json::Value;

use crate::now_ms;

use super::think_tag::ThinkTagSplitter;
use super::{StreamEvent, ToolCall, Usage};

pub struct SseTransformer {
    line_buffer: BytesMut,
    splitter: ThinkTagSplitter,
    tool_calls: Vec<ToolCall>,
    tool_seq: u64,
    usage: Option<Usage>,
}

impl Default for SseTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl SseTransformer {
    pub fn new() -> Self {
        Self {
            line_buffer: BytesMut::new(),
            splitter: ThinkTagSplitter::new(),
            tool_calls: Vec::new(),
            tool_seq: 0,
            usage: None,
        }
    }

    /// Feed one chunk of upstream bytes.
    pub fn push(&mut self, chunk: &[u8], out: &mut (dyn FnMut(StreamEvent) + Send)) {
        self.line_buffer.extend_from_slice(chunk);
        while let Some(pos) = self.line_buffer.iter().position(|&b| b == b'\n') {
            let line_raw = self.line_buffer.split_to(pos + 1);
            if let Ok(line) = std::str::from_utf8(&line_raw) {
                self.handle_line(line.trim(), out);
            }
        }
    }

    /// End of stream: flush the splitter, any unfired tool calls, and usage.
    pub fn finish(&mut self, out: &mut (dyn FnMut(StreamEvent) + Send)) {
        // A final line without a trailing newline still counts.
        if !self.line_buffer.is_empty() {
            let rest = self.line_buffer.split();
            if let Ok(line) = std::str::from_utf8(&rest) {
                let line = line.trim().to_string();
                self.handle_line(&line, out);
            }
        }
        self.splitter.flush(out);
        if !self.tool_calls.is_empty() {
            out(StreamEvent::ToolCalls(std::mem::take(&mut self.tool_calls)));
        }
        if let Some(usage) = self.usage.take() {
            out(StreamEvent::Usage(usage));
        }
    }

    fn handle_line(&mut self, line: &str, out: &mut (dyn FnMut(StreamEvent) + Send)) {
        let Some(payload) = line.strip_prefix("data: ") else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return;
        }
        let Ok(mut json) = serde_json::from_str::<Value>(payload) else {
            tracing::debug!("Skipping unparsable SSE payload ({} bytes)", payload.len());
            return;
        };

        // v1internal wraps the generate response in a `response` envelope.
        let data = match json.get_mut("response").map(Value::take) {
            Some(inner) => inner,
            None => json,
        };

        if let Some(usage) = data.get("usageMetadata").and_then(Usage::from_metadata) {
            self.usage = Some(usage);
        }

        let Some(candidates) = data.get("candidates").and_then(|c| c.as_array()) else {
            return;
        };

        if let Some(parts) = candidates
            .first()
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                self.handle_part(part, out);
            }
        }

        let finished = candidates.iter().any(|c| c.get("finishReason").is_some());
        if finished && !self.tool_calls.is_empty() {
            out(StreamEvent::ToolCalls(std::mem::take(&mut self.tool_calls)));
        }
    }

    fn handle_part(&mut self, part: &Value, out: &mut (dyn FnMut(StreamEvent) + Send)) {
        let is_thought = part.get("thought").and_then(|v| v.as_bool()).unwrap_or(false);

        if is_thought {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                // Keep ordering: tagged reasoning buffered in the splitter
                // must come out before this flagged segment.
                self.splitter.flush(out);
                out(StreamEvent::Thinking(text.to_string()));
            }
            return;
        }

        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            self.splitter.push(text, out);
            return;
        }

        if let Some(call) = part.get("functionCall") {
            self.collect_tool_call(call, part);
        }
    }

    fn collect_tool_call(&mut self, call: &Value, part: &Value) {
        let name = call.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
        let mut id = match call.get("id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                let id = format!("call_{}_{}", now_ms(), self.tool_seq);
                self.tool_seq += 1;
                id
            },
        };
        let signature = call
            .get("thoughtSignature")
            .or_else(|| call.get("thought_signature"))
            .or_else(|| part.get("thoughtSignature"))
            .or_else(|| part.get("thought_signature"))
            .and_then(|v| v.as_str());
        if let Some(sig) = signature {
            id = format!("{id}::{sig}");
        }
        let arguments = call
            .get("args")
            .map(|args| args.to_string())
            .unwrap_or_else(|| "{}".to_string());

        self.tool_calls.push(ToolCall {
            index: self.tool_calls.len(),
            id,
            name: name.to_string(),
            arguments,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> Vec<u8> {
        format!("data: {json}\n\n").into_bytes()
    }

    fn run(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut transformer = SseTransformer::new();
        let mut events = Vec::new();
        let mut out = |e: StreamEvent| events.push(e);
        for chunk in chunks {
            transformer.push(chunk, &mut out);
        }
        transformer.finish(&mut out);
        events
    }

    #[test]
    fn test_simple_text_frame() {
        let data = frame(
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"Hello"}]},"finishReason":"STOP"}]}}"#,
        );
        let events = run(&[&data]);
        assert_eq!(events, vec![StreamEvent::Text("Hello".into())]);
    }

    #[test]
    fn test_unwrapped_payload_accepted() {
        let data = frame(r#"{"candidates":[{"content":{"parts":[{"text":"Hi"}]}}]}"#);
        let events = run(&[&data]);
        assert_eq!(events, vec![StreamEvent::Text("Hi".into())]);
    }

    #[test]
    fn test_line_split_mid_frame() {
        let data = frame(r#"{"response":{"candidates":[{"content":{"parts":[{"text":"Hello"}]}}]}}"#);
        let (a, b) = data.split_at(25);
        let events = run(&[a, b]);
        assert_eq!(events, vec![StreamEvent::Text("Hello".into())]);
    }

    #[test]
    fn test_thought_flag_part() {
        let data = frame(
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"plan","thought":true},{"text":"answer"}]}}]}}"#,
        );
        let events = run(&[&data]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Thinking("plan".into()),
                StreamEvent::Text("answer".into()),
            ]
        );
    }

    #[test]
    fn test_think_tags_across_frames() {
        // Spec scenario 2: "A<thi" then "nk>B</think>C".
        let f1 = frame(r#"{"response":{"candidates":[{"content":{"parts":[{"text":"A<thi"}]}}]}}"#);
        let f2 = frame(
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"nk>B</think>C"}]},"finishReason":"STOP"}]}}"#,
        );
        let events = run(&[&f1, &f2]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Text("A".into()),
                StreamEvent::Thinking("B".into()),
                StreamEvent::Text("C".into()),
            ]
        );
    }

    #[test]
    fn test_tool_call_collection_and_single_emission() {
        let f1 = frame(
            r#"{"response":{"candidates":[{"content":{"parts":[{"functionCall":{"name":"get_weather","args":{"city":"Oslo"}}}]}}]}}"#,
        );
        let f2 = frame(
            r#"{"response":{"candidates":[{"content":{"parts":[{"functionCall":{"id":"call_x","name":"get_time","args":{}}}]},"finishReason":"STOP"}]}}"#,
        );
        let events = run(&[&f1, &f2]);
        assert_eq!(events.len(), 1);
        let StreamEvent::ToolCalls(calls) = &events[0] else {
            panic!("expected tool calls, got {:?}", events[0]);
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[0].name, "get_weather");
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&calls[0].arguments).unwrap()["city"],
            "Oslo"
        );
        assert_eq!(calls[1].index, 1);
        assert_eq!(calls[1].id, "call_x");
        assert_eq!(calls[1].arguments, "{}");
    }

    #[test]
    fn test_thought_signature_appended_to_id() {
        let data = frame(
            r#"{"response":{"candidates":[{"content":{"parts":[{"functionCall":{"id":"call_1","name":"f","args":{},"thoughtSignature":"sig123"}}]},"finishReason":"STOP"}]}}"#,
        );
        let events = run(&[&data]);
        let StreamEvent::ToolCalls(calls) = &events[0] else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].id, "call_1::sig123");
    }

    #[test]
    fn test_snake_case_signature_field() {
        let data = frame(
            r#"{"response":{"candidates":[{"content":{"parts":[{"functionCall":{"id":"c","name":"f","args":{},"thought_signature":"s"}}]},"finishReason":"STOP"}]}}"#,
        );
        let events = run(&[&data]);
        let StreamEvent::ToolCalls(calls) = &events[0] else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].id, "c::s");
    }

    #[test]
    fn test_usage_emitted_last() {
        let f1 = frame(
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"hi"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":7,"totalTokenCount":10}}}"#,
        );
        let events = run(&[&f1]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Usage(Usage {
                prompt_tokens: 3,
                completion_tokens: 7,
                total_tokens: 10
            }))
        );
    }

    #[test]
    fn test_garbage_lines_ignored() {
        let events = run(&[
            b": keepalive\n",
            b"event: ping\n",
            b"data: {broken json\n",
            &frame(r#"{"response":{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}}"#),
        ]);
        assert_eq!(events, vec![StreamEvent::Text("ok".into())]);
    }

    #[test]
    fn test_final_line_without_newline() {
        let data =
            br#"data: {"response":{"candidates":[{"content":{"parts":[{"text":"tail"}]}}]}}"#;
        let events = run(&[data]);
        assert_eq!(events, vec![StreamEvent::Text("tail".into())]);
    }
}
