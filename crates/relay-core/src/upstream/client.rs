//! HTTP client for the CloudCode generate endpoint.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE, HOST};
use reqwest::Client;
use serde_json::Value;

use crate::config::ApiConfig;

pub struct UpstreamClient {
    http: Client,
    url: String,
    host: String,
    user_agent: String,
}

impl UpstreamClient {
    pub fn new(api: &ApiConfig) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(600))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: api.url.clone(),
            host: api.host.clone(),
            user_agent: api.user_agent.clone(),
        }
    }

    /// Shared client handle for other callers (token refresh).
    pub fn http(&self) -> Client {
        self.http.clone()
    }

    /// POST the generate body and return the raw streaming response.
    /// Non-2xx statuses are returned as responses, not errors; the retry
    /// loop classifies them.
    pub async fn post_generate(
        &self,
        access_token: &str,
        body: &Value,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut headers = HeaderMap::new();
        if let Ok(host) = HeaderValue::from_str(&self.host) {
            headers.insert(HOST, host);
        }
        if let Ok(agent) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(reqwest::header::USER_AGENT, agent);
        }
        if let Ok(auth) = HeaderValue::from_str(&format!("Bearer {access_token}")) {
            headers.insert(AUTHORIZATION, auth);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        self.http
            .post(&self.url)
            .query(&[("alt", "sse")])
            .headers(headers)
            .json(body)
            .send()
            .await
    }
}
