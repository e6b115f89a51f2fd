//! Application configuration.
//!
//! A single JSON document, every field defaulted so a missing file still
//! yields a runnable server. Key names are the external contract; do not
//! rename them.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub defaults: GenerationDefaults,
    pub security: SecurityConfig,
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
    pub thinking: ThinkingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 7601, host: "0.0.0.0".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Upstream generate endpoint, called with `?alt=sse`.
    pub url: String,
    /// Upstream model listing endpoint. Kept for operators who point the
    /// relay at a sandbox upstream; the model table itself ships with the
    /// binary.
    #[serde(rename = "modelsUrl")]
    pub models_url: String,
    /// Value of the `Host` header on upstream calls.
    pub host: String,
    /// Fixed User-Agent sent upstream.
    #[serde(rename = "userAgent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "https://cloudcode-pa.googleapis.com/v1internal:streamGenerateContent"
                .to_string(),
            models_url: "https://cloudcode-pa.googleapis.com/v1internal:fetchAvailableModels"
                .to_string(),
            host: "cloudcode-pa.googleapis.com".to_string(),
            user_agent: "GeminiCLI/0.1.5 (Linux; x86_64)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_tokens: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self { temperature: 1.0, top_p: 0.95, top_k: 64, max_tokens: 65536 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Ingress body limit in bytes.
    #[serde(rename = "maxRequestSize")]
    pub max_request_size: usize,
    /// Static bearer key required on `/v1/*` when set.
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { max_request_size: 50 * 1024 * 1024, api_key: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Credential rotations per request for retryable failures.
    #[serde(rename = "maxRetries")]
    pub max_retries: u32,
    /// Delay between rotations in milliseconds.
    #[serde(rename = "baseDelay")]
    pub base_delay: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Global in-flight cap, or `"auto"` to derive it from the pool size.
    #[serde(rename = "maxConcurrent")]
    pub max_concurrent: MaxConcurrent,
    /// Per-credential in-flight cap.
    #[serde(rename = "perTokenConcurrency")]
    pub per_token_concurrency: u32,
    /// Waiting requests beyond which the ingress answers 503.
    #[serde(rename = "queueLimit")]
    pub queue_limit: usize,
    /// Admission-level request timeout in milliseconds.
    pub timeout: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: MaxConcurrent::Auto,
            per_token_concurrency: 2,
            queue_limit: 100,
            timeout: 300_000,
        }
    }
}

/// `maxConcurrent` accepts an integer or the literal string `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxConcurrent {
    Fixed(usize),
    #[default]
    Auto,
}

impl MaxConcurrent {
    /// Resolve to a concrete limit for `enabled_count` credentials.
    pub fn resolve(self, enabled_count: usize, per_token: u32) -> usize {
        match self {
            MaxConcurrent::Fixed(n) => n.max(1),
            MaxConcurrent::Auto => (enabled_count * per_token as usize).clamp(1, 100),
        }
    }
}

impl Serialize for MaxConcurrent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MaxConcurrent::Fixed(n) => serializer.serialize_u64(*n as u64),
            MaxConcurrent::Auto => serializer.serialize_str("auto"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxConcurrent {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(|n| MaxConcurrent::Fixed(n as usize))
                .ok_or_else(|| D::Error::custom("maxConcurrent must be a positive integer")),
            serde_json::Value::String(s) if s == "auto" => Ok(MaxConcurrent::Auto),
            other => Err(D::Error::custom(format!(
                "maxConcurrent must be an integer or \"auto\", got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkingConfig {
    pub output: ThinkingOutput,
}

/// Where extracted reasoning segments end up in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingOutput {
    /// Separate `reasoning_content` field on the message.
    #[default]
    ReasoningContent,
    /// Concatenated into `content` as-is.
    Raw,
    /// Dropped.
    Filter,
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when the file is missing.
    /// A present-but-unparsable file is an error: silently running with
    /// defaults would mask an operator typo.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        serde_json::from_str(&content).map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }
}
