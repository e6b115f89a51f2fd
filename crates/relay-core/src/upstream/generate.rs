//! One chat completion against the upstream, retried across credentials.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;

use crate::config::{GenerationDefaults, RetryConfig};
use crate::error::{RelayError, RelayResult};
use crate::mappers::openai::{build_upstream_request, ChatRequest};
use crate::sched::{retry_after, CredentialScheduler, UpstreamFailure};
use crate::store::token_prefix;
use crate::stream::{SseTransformer, StreamEvent};

use super::client::UpstreamClient;

pub struct UpstreamEngine {
    scheduler: Arc<CredentialScheduler>,
    client: Arc<UpstreamClient>,
    retry: RetryConfig,
    defaults: GenerationDefaults,
}

impl UpstreamEngine {
    pub fn new(
        scheduler: Arc<CredentialScheduler>,
        client: Arc<UpstreamClient>,
        retry: RetryConfig,
        defaults: GenerationDefaults,
    ) -> Self {
        Self { scheduler, client, retry, defaults }
    }

    pub fn scheduler(&self) -> &Arc<CredentialScheduler> {
        &self.scheduler
    }

    /// Execute one generation, feeding structured events to `on_event`.
    ///
    /// Pre-stream failures rotate to another credential while the retry
    /// budget lasts; once the streaming phase has begun nothing is retried,
    /// because bytes may already have reached the client.
    pub async fn generate(
        &self,
        request: &ChatRequest,
        model: &str,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> RelayResult<()> {
        let mut tried: HashSet<String> = HashSet::new();
        let mut retries = 0u32;
        let mut last_retry_after: Option<u64> = None;

        loop {
            let lease = self.scheduler.acquire(&mut tried).await?;
            let token = lease.credential.refresh_token.clone();
            let body = build_upstream_request(request, model, &lease.credential, &self.defaults);

            let response = match self.client.post_generate(&lease.credential.access_token, &body).await
            {
                Ok(response) => response,
                Err(e) => {
                    let failure = UpstreamFailure::Network(e.to_string());
                    tracing::warn!(
                        "Upstream transport failure on credential {}: {e}",
                        token_prefix(&token)
                    );
                    self.scheduler.record_failure(&token, &failure).await;
                    drop(lease);
                    tried.insert(token);
                    retries += 1;
                    if retries >= self.retry.max_retries {
                        return Err(RelayError::Network(format!(
                            "upstream unreachable after {retries} attempts: {e}"
                        )));
                    }
                    self.backoff().await;
                    continue;
                },
            };

            let status = response.status();
            if status.is_success() {
                return self.consume_stream(response, &token, on_event).await;
            }

            let status = status.as_u16();
            let retry_after_header = response
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string);
            let body_text = response.text().await.unwrap_or_default();
            let retry_after_ms = if status == 429 {
                retry_after::extract_retry_after_ms(retry_after_header.as_deref(), &body_text)
            } else {
                None
            };

            tracing::warn!(
                "Upstream HTTP {status} on credential {}: {}",
                token_prefix(&token),
                body_text.chars().take(200).collect::<String>()
            );
            let failure =
                UpstreamFailure::Http { status, body: body_text.clone(), retry_after_ms };
            self.scheduler.record_failure(&token, &failure).await;
            drop(lease);

            match status {
                401 | 403 => {
                    return Err(RelayError::Authentication(format!(
                        "upstream rejected the credential (HTTP {status})"
                    )));
                },
                429 => {
                    last_retry_after = retry_after_ms.or(last_retry_after);
                    tried.insert(token);
                    retries += 1;
                    if retries >= self.retry.max_retries {
                        return Err(RelayError::RateLimited {
                            message: format!("rate limited on {retries} credential(s)"),
                            retry_after_secs: last_retry_after.map(|ms| ms.div_ceil(1000)),
                        });
                    }
                    self.backoff().await;
                },
                500..=599 => {
                    tried.insert(token);
                    retries += 1;
                    if retries >= self.retry.max_retries {
                        return Err(RelayError::Api { status, body: body_text });
                    }
                    self.backoff().await;
                },
                _ => {
                    return Err(RelayError::Api { status, body: body_text });
                },
            }
        }
    }

    /// Streaming phase. The lease has already reserved the credential; it is
    /// released when this frame returns, success or not.
    async fn consume_stream(
        &self,
        response: reqwest::Response,
        token: &str,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> RelayResult<()> {
        let mut transformer = SseTransformer::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => transformer.push(&bytes, on_event),
                Err(e) => {
                    let failure = UpstreamFailure::Stream(e.to_string());
                    self.scheduler.record_failure(token, &failure).await;
                    return Err(RelayError::Stream(e.to_string()));
                },
            }
        }

        transformer.finish(on_event);
        self.scheduler.record_success(token);
        Ok(())
    }

    async fn backoff(&self) {
        if self.retry.base_delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.retry.base_delay)).await;
        }
    }
}
