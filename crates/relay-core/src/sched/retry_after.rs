//! Extraction of rate-limit wait times from upstream 429 responses.
//!
//! Sources in priority order: the `Retry-After` header (delta seconds or an
//! HTTP-date), the `google.rpc.RetryInfo` detail's `retryDelay` (`"3.5s"`),
//! and the `google.rpc.ErrorInfo` detail's `metadata.quotaResetDelay`
//! (`"1m30.5s"`).

use std::sync::OnceLock;

use regex::Regex;

use crate::now_ms;

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:(\d+)\s*m)?\s*(\d+(?:\.\d+)?)\s*s\s*$").expect("duration regex is valid")
    })
}

/// Parse a `Retry-After` header value into milliseconds.
///
/// Accepts both forms RFC 9110 allows: a non-negative decimal number of
/// seconds, or an HTTP-date.
pub fn parse_retry_after_header(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(secs * 1000);
    }
    let date = chrono::DateTime::parse_from_rfc2822(trimmed).ok()?;
    let delta = date.timestamp_millis() - now_ms();
    Some(delta.max(0) as u64)
}

/// Parse `"<float>s"` or `"<int>m<float>s"` into milliseconds.
pub fn parse_duration_spec(value: &str) -> Option<u64> {
    let caps = duration_regex().captures(value)?;
    let minutes: u64 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let seconds: f64 = caps.get(2)?.as_str().parse().ok()?;
    Some(minutes * 60_000 + (seconds * 1000.0).round() as u64)
}

/// Walk the Google error envelope for a wait hint.
pub fn parse_error_body(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let details = json.get("error")?.get("details")?.as_array()?;

    for detail in details {
        let type_url = detail.get("@type").and_then(|t| t.as_str()).unwrap_or("");
        if type_url.ends_with("google.rpc.RetryInfo") {
            if let Some(ms) = detail
                .get("retryDelay")
                .and_then(|d| d.as_str())
                .and_then(parse_duration_spec)
            {
                return Some(ms);
            }
        }
    }
    for detail in details {
        let type_url = detail.get("@type").and_then(|t| t.as_str()).unwrap_or("");
        if type_url.ends_with("google.rpc.ErrorInfo") {
            if let Some(ms) = detail
                .get("metadata")
                .and_then(|m| m.get("quotaResetDelay"))
                .and_then(|d| d.as_str())
                .and_then(parse_duration_spec)
            {
                return Some(ms);
            }
        }
    }
    None
}

/// Combined extraction: header first, then the JSON details.
pub fn extract_retry_after_ms(header: Option<&str>, body: &str) -> Option<u64> {
    if let Some(ms) = header.and_then(parse_retry_after_header) {
        return Some(ms);
    }
    parse_error_body(body)
}
