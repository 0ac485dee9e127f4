//! Response classification shared by the HTTP-backed adapters.
//!
//! Overload and server faults (429/500/503, and Google RPC statuses
//! `RESOURCE_EXHAUSTED`/`DEADLINE_EXCEEDED`) are transport errors; any
//! other non-2xx answer is a semantic rejection. Error bodies come in the
//! Google shape (`error.status`) or the OpenAI shape (`error.type`).

use serde::de::DeserializeOwned;

use crate::adapter::ProviderError;

const RETRYABLE_HTTP: [u16; 3] = [429, 500, 503];
const RETRYABLE_RPC: [&str; 2] = ["RESOURCE_EXHAUSTED", "DEADLINE_EXCEEDED"];

/// Map a `reqwest` failure (connect, TLS, timeout, body read) to a
/// transport error.
pub fn transport(err: reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "request"
    };
    ProviderError::transport(format!("{kind}: {err}"))
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a classified [`ProviderError`] built from the
/// status and body text on failure.
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(classify_failure(status.as_u16(), &body))
}

/// Parse a successful JSON response body into the expected type.
pub async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    let response = ensure_success(response).await?;
    response.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            ProviderError::semantic("invalid_response", format!("malformed provider response: {e}"))
        } else {
            transport(e)
        }
    })
}

/// Classify a non-2xx answer.
///
/// When the body carries a Google-style `{"error": {"status", "message"}}`
/// object, its RPC status decides; otherwise the HTTP code does. An
/// OpenAI-style `error.type` only names the semantic code.
pub fn classify_failure(status: u16, body: &str) -> ProviderError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let rpc_error = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .filter(|e| e.is_object());

    match rpc_error {
        Some(error) => {
            let rpc_status = str_field(error, "status").to_ascii_uppercase();
            let error_type = str_field(error, "type");
            let message = str_field(error, "message");
            let detail = [rpc_status.as_str(), error_type, message]
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            let text = format!("status {status}: {detail}");
            let retryable = if rpc_status.is_empty() {
                RETRYABLE_HTTP.contains(&status)
            } else {
                RETRYABLE_RPC.contains(&rpc_status.as_str())
            };
            if retryable {
                ProviderError::transport(text)
            } else {
                let code = [rpc_status.as_str(), error_type]
                    .into_iter()
                    .find(|part| !part.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("http_{status}"));
                ProviderError::semantic(code, text)
            }
        }
        None if RETRYABLE_HTTP.contains(&status) => {
            ProviderError::transport(format!("status {status}: {}", truncate(body, 200)))
        }
        None => ProviderError::semantic(format!("http_{status}"), truncate(body, 200)),
    }
}

fn str_field<'a>(value: &'a serde_json::Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .trim()
}

/// Truncate `text` to at most `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
