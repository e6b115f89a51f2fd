//! OpenAI request → CloudCode `v1internal` generate body.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::config::GenerationDefaults;
use crate::store::Credential;

use super::models::{ChatMessage, ChatRequest};

/// Build the upstream body for one attempt.
///
/// Rebuilt per selected credential: the envelope carries the credential's
/// `project_id` and per-process `session_id`.
pub fn build_upstream_request(
    request: &ChatRequest,
    model: &str,
    credential: &Credential,
    defaults: &GenerationDefaults,
) -> Value {
    let messages: &[ChatMessage] = request.messages.as_deref().unwrap_or(&[]);

    let mut system_texts: Vec<String> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    // tool_call_id -> function name, for mapping tool results back.
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in messages {
        match message.role.as_str() {
            "system" | "developer" => {
                let text = message.text();
                if !text.is_empty() {
                    system_texts.push(text);
                }
            },
            "assistant" => {
                let mut parts: Vec<Value> = Vec::new();
                let text = message.text();
                if !text.is_empty() {
                    parts.push(json!({"text": text}));
                }
                for call in message.tool_calls.as_deref().unwrap_or(&[]) {
                    if let Some(part) = tool_call_to_part(call, &mut call_names) {
                        parts.push(part);
                    }
                }
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
            },
            "tool" => {
                let name = message
                    .tool_call_id
                    .as_deref()
                    .map(strip_signature)
                    .and_then(|id| call_names.get(id).cloned())
                    .unwrap_or_else(|| "unknown".to_string());
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": {"result": message.text()}
                        }
                    }]
                }));
            },
            _ => {
                contents.push(json!({
                    "role": "user",
                    "parts": [{"text": message.text()}]
                }));
            },
        }
    }

    let generation_config = json!({
        "temperature": request.temperature.unwrap_or(defaults.temperature),
        "topP": request.top_p.unwrap_or(defaults.top_p),
        "topK": request.top_k.unwrap_or(defaults.top_k),
        "maxOutputTokens": request.max_tokens.unwrap_or(defaults.max_tokens),
    });

    let mut inner = Map::new();
    inner.insert("contents".to_string(), Value::Array(contents));
    if !system_texts.is_empty() {
        inner.insert(
            "systemInstruction".to_string(),
            json!({"role": "user", "parts": [{"text": system_texts.join("\n\n")}]}),
        );
    }
    inner.insert("generationConfig".to_string(), generation_config);
    if let Some(declarations) = tool_declarations(request.tools.as_deref()) {
        inner.insert("tools".to_string(), json!([{"functionDeclarations": declarations}]));
    }
    inner.insert("session_id".to_string(), json!(credential.session_id));

    json!({
        "model": model,
        "project": credential.project_id,
        "request": Value::Object(inner),
    })
}

/// An assistant tool call, as echoed back by the client, turned into a
/// `functionCall` part. Ids of the form `<id>::<signature>` get their
/// signature restored onto the part.
fn tool_call_to_part(call: &Value, call_names: &mut HashMap<String, String>) -> Option<Value> {
    let function = call.get("function")?;
    let name = function.get("name").and_then(|n| n.as_str())?;
    let arguments = function
        .get("arguments")
        .and_then(|a| a.as_str())
        .and_then(|a| serde_json::from_str::<Value>(a).ok())
        .unwrap_or_else(|| json!({}));

    let raw_id = call.get("id").and_then(|i| i.as_str()).unwrap_or_default();
    let (id, signature) = match raw_id.split_once("::") {
        Some((id, sig)) => (id, Some(sig)),
        None => (raw_id, None),
    };
    if !id.is_empty() {
        call_names.insert(id.to_string(), name.to_string());
    }

    let mut part = Map::new();
    let mut function_call = Map::new();
    if !id.is_empty() {
        function_call.insert("id".to_string(), json!(id));
    }
    function_call.insert("name".to_string(), json!(name));
    function_call.insert("args".to_string(), arguments);
    part.insert("functionCall".to_string(), Value::Object(function_call));
    if let Some(sig) = signature {
        part.insert("thoughtSignature".to_string(), json!(sig));
    }
    Some(Value::Object(part))
}

fn strip_signature(id: &str) -> &str {
    id.split_once("::").map(|(id, _)| id).unwrap_or(id)
}

fn tool_declarations(tools: Option<&[Value]>) -> Option<Vec<Value>> {
    let declarations: Vec<Value> = tools?
        .iter()
        .filter(|t| t.get("type").and_then(|ty| ty.as_str()) == Some("function"))
        .filter_map(|t| t.get("function").cloned())
        .map(|mut f| {
            // OpenAI calls the schema `parameters`; CloudCode wants it too,
            // but rejects `strict` and friends.
            if let Some(obj) = f.as_object_mut() {
                obj.retain(|k, _| matches!(k.as_str(), "name" | "description" | "parameters"));
            }
            f
        })
        .collect();
    if declarations.is_empty() {
        None
    } else {
        Some(declarations)
    }
}
