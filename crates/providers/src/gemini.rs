//! Google Gemini `generateContent` adapter.
//!
//! Gemini answers synchronously; [`PendingCalls`] adapts the call to the
//! submit/poll contract. The same adapter serves Gemini 3 Pro with its own
//! default model.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::adapter::{
    JobContext, PayloadBody, PollStatus, ProviderAdapter, ProviderError, ProviderPayload,
    ProviderResult,
};
use crate::http;
use crate::pending::{self, CallResult, PendingCalls};
use crate::registry::ProviderId;

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const GEMINI_3_PRO_MODEL: &str = "gemini-3-pro-image-preview";
const DEFAULT_OUTPUT_MIME: &str = "image/png";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    /// Model used when the slot settings name none.
    pub default_model: String,
    /// Upper bound for a single `generateContent` call.
    pub request_timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

pub struct GeminiAdapter {
    id: ProviderId,
    client: reqwest::Client,
    config: GeminiConfig,
    pending: PendingCalls,
}

impl GeminiAdapter {
    pub fn new(client: reqwest::Client, config: GeminiConfig) -> Self {
        Self::with_id(ProviderId::Gemini, client, config)
    }

    /// Gemini 3 Pro: same API, preview image model by default.
    pub fn gemini_3_pro(client: reqwest::Client, config: GeminiConfig) -> Self {
        let config = GeminiConfig {
            default_model: GEMINI_3_PRO_MODEL.to_string(),
            ..config
        };
        Self::with_id(ProviderId::Gemini3Pro, client, config)
    }

    fn with_id(id: ProviderId, client: reqwest::Client, config: GeminiConfig) -> Self {
        Self {
            id,
            client,
            config,
            pending: PendingCalls::new(id),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider_id(&self) -> ProviderId {
        self.id
    }

    fn prepare_payload(&self, ctx: &JobContext) -> Result<ProviderPayload, ProviderError> {
        let prompt = ctx.require_prompt()?;
        let ingest = ctx.require_payload()?;

        let model = ctx
            .setting_str("model")
            .unwrap_or(&self.config.default_model);
        let output_mime = ctx
            .settings
            .get("output")
            .and_then(|o| o.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_OUTPUT_MIME);

        let inline = |mime_type: &str, bytes: &[u8]| {
            json!({ "inline_data": { "mime_type": mime_type, "data": BASE64.encode(bytes) } })
        };
        let mut parts = vec![inline(&ingest.mime_type, &ingest.bytes)];
        parts.extend(ctx.templates.iter().map(|t| inline(&t.mime_type, &t.bytes)));
        parts.push(json!({ "text": prompt }));

        let mut body = json!({
            "model": model,
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseMimeType": output_mime },
        });
        if let Some(safety) = ctx.settings.get("safety_settings").filter(|v| !v.is_null()) {
            body["safetySettings"] = safety.clone();
        }

        Ok(ProviderPayload {
            endpoint: format!(
                "{}/models/{model}:generateContent",
                self.config.api_url.trim_end_matches('/')
            ),
            body: PayloadBody::Json(body),
            result_mime_hint: output_mime.to_string(),
        })
    }

    async fn submit_job(&self, payload: &ProviderPayload) -> Result<String, ProviderError> {
        let api_key = self.config.api_key.clone().ok_or_else(|| {
            ProviderError::semantic("missing_api_key", "GEMINI_API_KEY is not set")
        })?;

        let client = self.client.clone();
        let timeout = self.config.request_timeout;
        let call = pending::call(move |payload| {
            let client = client.clone();
            let api_key = api_key.clone();
            async move { generate_content(&client, &payload, &api_key, timeout).await }
        });
        Ok(self.pending.start(payload, call))
    }

    async fn poll_status(&self, reference: &str) -> Result<PollStatus, ProviderError> {
        self.pending.poll(reference).await
    }

    async fn cancel(&self, reference: &str) -> Result<(), ProviderError> {
        self.pending.cancel(reference);
        Ok(())
    }
}

/// Perform one `generateContent` call.
async fn generate_content(
    client: &reqwest::Client,
    payload: &ProviderPayload,
    api_key: &str,
    timeout: Duration,
) -> CallResult {
    let PayloadBody::Json(body) = &payload.body else {
        return Err(ProviderError::semantic(
            "invalid_payload",
            "Gemini payload must be JSON",
        ));
    };

    let response = client
        .post(&payload.endpoint)
        .header("x-goog-api-key", api_key)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(http::transport)?;

    let data: Value = http::parse_json(response).await?;
    parse_generate_response(&data, &payload.result_mime_hint)
}

/// Extract the first inline image from a `generateContent` response.
pub fn parse_generate_response(data: &Value, fallback_mime: &str) -> CallResult {
    let mut finish_reasons = Vec::new();
    let mut texts = Vec::new();

    let candidates = data
        .get("candidates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for candidate in candidates {
        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            finish_reasons.push(reason.to_string());
        }
        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for part in parts {
            let inline = part.get("inline_data").or_else(|| part.get("inlineData"));
            if let Some(encoded) = inline
                .and_then(|i| i.get("data"))
                .and_then(Value::as_str)
                .filter(|d| !d.is_empty())
            {
                let mime_type = inline
                    .and_then(|i| i.get("mime_type").or_else(|| i.get("mimeType")))
                    .and_then(Value::as_str)
                    .unwrap_or(fallback_mime)
                    .to_string();
                let bytes = BASE64.decode(encoded).map_err(|e| {
                    ProviderError::semantic("invalid_response", format!("inline data is not base64: {e}"))
                })?;
                return Ok(ProviderResult { bytes, mime_type });
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                texts.push(text.to_string());
            }
        }
    }

    let mut details = Vec::new();
    if !finish_reasons.is_empty() {
        details.push(format!("Reasons: {}", finish_reasons.join(", ")));
    }
    if !texts.is_empty() {
        details.push(format!("Text: {}", http::truncate(&texts.join("; "), 200)));
    }
    let mut message = "response does not contain inline data".to_string();
    if !details.is_empty() {
        message.push_str(&format!(" ({})", details.join(", ")));
    }
    Err(ProviderError::semantic("no_image", message))
}
