//! OAuth access-token refresh against the Google token endpoint.

use serde::Deserialize;

use crate::now_ms;
use crate::store::{token_prefix, Credential};

use super::outcome::UpstreamFailure;
use super::retry_after::parse_retry_after_header;
use super::CredentialScheduler;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl CredentialScheduler {
    /// Refresh an expired access token, persist the result, and return the
    /// updated snapshot.
    ///
    /// Failures come back as [`UpstreamFailure`] so the caller records them
    /// through the normal taxonomy: a 401/403 from the token endpoint ends
    /// with the credential disabled, transport problems count as
    /// network-class.
    pub(super) async fn refresh_credential(
        &self,
        credential: &Credential,
    ) -> Result<Credential, UpstreamFailure> {
        tracing::debug!(
            "Access token for credential {} expiring, refreshing...",
            token_prefix(&credential.refresh_token)
        );

        let form = [
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("grant_type", "refresh_token"),
            ("refresh_token", credential.refresh_token.as_str()),
        ];

        let response = self
            .http
            .post(TOKEN_URL)
            .form(&form)
            .send()
            .await
            .map_err(|e| UpstreamFailure::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .and_then(parse_retry_after_header);
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamFailure::Http {
                status: status.as_u16(),
                body,
                retry_after_ms,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| UpstreamFailure::Network(format!("token response unreadable: {e}")))?;

        let mut updated = credential.clone();
        updated.access_token = token.access_token;
        updated.expires_in = token.expires_in.unwrap_or(3600);
        updated.timestamp = now_ms();

        {
            let mut enabled = self.enabled.write().await;
            if let Some(entry) = enabled
                .iter_mut()
                .find(|c| c.refresh_token == updated.refresh_token)
            {
                entry.access_token = updated.access_token.clone();
                entry.expires_in = updated.expires_in;
                entry.timestamp = updated.timestamp;
            }
        }

        if let Err(e) = self.store.save_all(std::slice::from_ref(&updated)).await {
            tracing::warn!(
                "Failed to persist refreshed token for {}: {e}",
                token_prefix(&updated.refresh_token)
            );
        }
        self.with_stats(&updated.refresh_token, |s| s.refresh_count += 1);

        Ok(updated)
    }
}
