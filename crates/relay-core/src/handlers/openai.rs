//! The OpenAI-compatible surface: `/v1/models` and `/v1/chat/completions`.

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::ThinkingOutput;
use crate::error::RelayError;
use crate::mappers::openai::ChatRequest;
use crate::server::AppState;
use crate::stream::{ResponseCollector, StreamEvent, ToolCall, Usage};
use crate::upstream::models;

pub async fn handle_list_models() -> impl IntoResponse {
    let created = chrono::Utc::now().timestamp();
    let data: Vec<Value> = models::model_ids()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "google",
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let request: ChatRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return RelayError::Validation(format!("invalid request body: {e}")).into_response()
        },
    };
    if request.messages.as_deref().map_or(true, |m| m.is_empty()) {
        return RelayError::Validation("messages is required".into()).into_response();
    }
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| models::model_ids()[0].to_string());

    let timeout = state.queue.timeout();
    let slot = match tokio::time::timeout(timeout, state.queue.admit()).await {
        Err(_) => return RelayError::Timeout.into_response(),
        Ok(Err(e)) => return e.into_response(),
        Ok(Ok(slot)) => slot,
    };

    tracing::info!(model = %model, stream = request.stream, "Chat completion admitted");

    if request.stream {
        handle_streaming(state, request, model, slot).await
    } else {
        let response = handle_non_streaming(&state, &request, &model).await;
        slot.release();
        response
    }
}

async fn handle_non_streaming(state: &AppState, request: &ChatRequest, model: &str) -> Response {
    let policy = state.config.thinking.output;
    let mut collector = ResponseCollector::new(policy);

    let generated = tokio::time::timeout(
        state.queue.timeout(),
        state.engine.generate(request, model, &mut |event| collector.on_event(event)),
    )
    .await;

    match generated {
        Err(_) => RelayError::Timeout.into_response(),
        Ok(Err(e)) => e.into_response(),
        Ok(Ok(())) => {
            let collected = collector.finish();
            let finish_reason =
                if collected.tool_calls.is_empty() { "stop" } else { "tool_calls" };

            let mut message = json!({"role": "assistant"});
            if collected.content.is_empty() && !collected.tool_calls.is_empty() {
                message["content"] = Value::Null;
            } else {
                message["content"] = json!(collected.content);
            }
            if let Some(reasoning) = &collected.reasoning_content {
                message["reasoning_content"] = json!(reasoning);
            }
            if !collected.tool_calls.is_empty() {
                // Non-streaming tool calls carry no per-call index.
                message["tool_calls"] = Value::Array(
                    collected.tool_calls.iter().map(tool_call_json_without_index).collect(),
                );
            }

            let mut response = json!({
                "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
                "object": "chat.completion",
                "created": chrono::Utc::now().timestamp(),
                "model": model,
                "choices": [{
                    "index": 0,
                    "message": message,
                    "finish_reason": finish_reason,
                }],
            });
            if let Some(usage) = collected.usage {
                response["usage"] = usage_json(usage);
            }
            Json(response).into_response()
        },
    }
}

async fn handle_streaming(
    state: AppState,
    request: ChatRequest,
    model: String,
    slot: crate::queue::AdmissionSlot,
) -> Response {
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<StreamEvent, RelayError>>();

    let engine = state.engine.clone();
    let timeout = state.queue.timeout();
    let task_model = model.clone();
    tokio::spawn(async move {
        // The admission slot lives exactly as long as the generation: it is
        // freed on completion, on error, and on client disconnect alike.
        let _slot = slot;
        let events = tx.clone();
        let result = tokio::time::timeout(
            timeout,
            engine.generate(&request, &task_model, &mut |event| {
                let _ = events.send(Ok(event));
            }),
        )
        .await;
        match result {
            Err(_) => {
                let _ = tx.send(Err(RelayError::Timeout));
            },
            Ok(Err(e)) => {
                let _ = tx.send(Err(e));
            },
            Ok(Ok(())) => {},
        }
    });

    // Hold the response until the first event so pre-stream failures still
    // map to proper HTTP statuses.
    let first = match rx.recv().await {
        Some(Err(e)) => return e.into_response(),
        other => other,
    };

    let policy = state.config.thinking.output;
    let stream_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created = chrono::Utc::now().timestamp();

    let body_stream = async_stream::stream! {
        let mut saw_tool_calls = false;
        let mut usage: Option<Usage> = None;
        let mut pending = first;

        loop {
            let event = match pending.take() {
                Some(event) => event,
                None => match rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                Ok(StreamEvent::Text(text)) => {
                    yield Ok(chunk_bytes(&stream_id, created, &model, json!({"content": text}), None));
                },
                Ok(StreamEvent::Thinking(text)) => match policy {
                    ThinkingOutput::ReasoningContent => {
                        yield Ok(chunk_bytes(
                            &stream_id,
                            created,
                            &model,
                            json!({"role": "assistant", "content": Value::Null, "reasoning_content": text}),
                            None,
                        ));
                    },
                    ThinkingOutput::Raw => {
                        yield Ok(chunk_bytes(&stream_id, created, &model, json!({"content": text}), None));
                    },
                    ThinkingOutput::Filter => {},
                },
                Ok(StreamEvent::ToolCalls(calls)) => {
                    saw_tool_calls = true;
                    let calls: Vec<Value> = calls.iter().map(tool_call_json_with_index).collect();
                    yield Ok(chunk_bytes(
                        &stream_id,
                        created,
                        &model,
                        json!({"role": "assistant", "tool_calls": calls}),
                        None,
                    ));
                },
                Ok(StreamEvent::Usage(u)) => {
                    usage = Some(u);
                },
                Err(e) => {
                    // Headers already sent: terminate the connection.
                    tracing::error!("Stream failed mid-flight: {e}");
                    yield Err(std::io::Error::other(e.to_string()));
                    return;
                },
            }
        }

        let finish = if saw_tool_calls { "tool_calls" } else { "stop" };
        yield Ok(chunk_bytes(&stream_id, created, &model, json!({}), Some(finish)));
        if let Some(u) = usage {
            let usage_chunk = json!({
                "id": &stream_id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": &model,
                "choices": [],
                "usage": usage_json(u),
            });
            yield Ok(sse_bytes(&usage_chunk));
        }
        yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| RelayError::Stream("failed to build response".into()).into_response())
}

fn chunk_bytes(
    id: &str,
    created: i64,
    model: &str,
    delta: Value,
    finish_reason: Option<&str>,
) -> Bytes {
    let chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    });
    sse_bytes(&chunk)
}

fn sse_bytes(value: &Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", value))
}

fn tool_call_json_with_index(call: &ToolCall) -> Value {
    json!({
        "index": call.index,
        "id": call.id,
        "type": "function",
        "function": {"name": call.name, "arguments": call.arguments},
    })
}

fn tool_call_json_without_index(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {"name": call.name, "arguments": call.arguments},
    })
}

fn usage_json(usage: Usage) -> Value {
    json!({
        "prompt_tokens": usage.prompt_tokens,
        "completion_tokens": usage.completion_tokens,
        "total_tokens": usage.total_tokens,
    })
}
