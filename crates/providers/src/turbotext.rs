//! Turbotext form-API adapter.
//!
//! `create_queue` returns a `queueid`; `get_result` is polled until the
//! result image is ready. A `success=false, action=reconnect` answer means
//! the work is still queued. The API has no cancel operation. Templates
//! bound with a `form_field` are sent as public media links under that
//! field.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::adapter::{
    JobContext, PayloadBody, PollStatus, ProviderAdapter, ProviderError, ProviderPayload,
    ProviderResult,
};
use crate::http;
use crate::registry::ProviderId;

pub const DEFAULT_API_URL: &str = "https://www.turbotext.ru/api_ai/generate_image2image";
pub const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://www.turbotext.ru/";

/// Slot settings forwarded verbatim to `create_queue` when present.
const OPTIONAL_FIELDS: [&str; 6] = [
    "strength",
    "scale",
    "negative_prompt",
    "user_id",
    "seed",
    "original_language",
];

#[derive(Debug, Clone)]
pub struct TurbotextConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    /// Base for relative `uploaded_image` links.
    pub download_base_url: String,
    /// Base of the public media links the provider fetches ingest images from.
    pub public_media_base_url: Option<String>,
    pub request_timeout: Duration,
}

impl Default for TurbotextConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            download_base_url: DEFAULT_DOWNLOAD_BASE_URL.to_string(),
            public_media_base_url: None,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Body shared by `create_queue` and `get_result` answers.
#[derive(Debug, Deserialize)]
struct TurbotextResponse {
    #[serde(default)]
    success: bool,
    action: Option<String>,
    error: Option<String>,
    message: Option<String>,
    queueid: Option<Value>,
    data: Option<Value>,
}

impl TurbotextResponse {
    fn failure_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

pub struct TurbotextAdapter {
    client: reqwest::Client,
    config: TurbotextConfig,
}

impl TurbotextAdapter {
    pub fn new(client: reqwest::Client, config: TurbotextConfig) -> Self {
        Self { client, config }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config.api_key.as_deref().ok_or_else(|| {
            ProviderError::semantic("missing_api_key", "TURBOTEXT_API_KEY is not set")
        })
    }

    async fn post_form(
        &self,
        endpoint: &str,
        form: &[(String, String)],
    ) -> Result<TurbotextResponse, ProviderError> {
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(self.api_key()?)
            .timeout(self.config.request_timeout)
            .form(form)
            .send()
            .await
            .map_err(http::transport)?;
        http::parse_json(response).await
    }

    async fn download(&self, url: &str) -> Result<ProviderResult, ProviderError> {
        let full_url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.download_base_url.trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        };
        let response = self
            .client
            .get(&full_url)
            .bearer_auth(self.api_key()?)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(http::transport)?;
        let response = http::ensure_success(response).await?;
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "image/png".to_string());
        let bytes = response.bytes().await.map_err(http::transport)?;
        Ok(ProviderResult {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}

/// Render a JSON setting as a form value.
fn form_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ProviderAdapter for TurbotextAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Turbotext
    }

    fn prepare_payload(&self, ctx: &JobContext) -> Result<ProviderPayload, ProviderError> {
        let prompt = ctx.require_prompt()?;
        let ingest = ctx.require_payload()?;
        let base_url = self.config.public_media_base_url.as_deref().ok_or_else(|| {
            ProviderError::semantic("missing_public_url", "PUBLIC_MEDIA_BASE_URL is not configured")
        })?;

        let ingest_url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            ingest.path.trim_start_matches('/')
        );
        let mut form = vec![
            ("do".to_string(), "create_queue".to_string()),
            ("url".to_string(), ingest_url),
            ("content".to_string(), prompt.to_string()),
        ];
        for field in OPTIONAL_FIELDS {
            if let Some(value) = ctx.settings.get(field).and_then(form_value) {
                form.push((field.to_string(), value));
            }
        }
        for template in &ctx.templates {
            if let Some(field) = template.form_field.as_deref().filter(|f| !f.is_empty()) {
                form.push((
                    field.to_string(),
                    format!(
                        "{}/public/provider-media/{}",
                        base_url.trim_end_matches('/'),
                        template.media_object_id
                    ),
                ));
            }
        }

        Ok(ProviderPayload {
            endpoint: self.config.api_url.clone(),
            body: PayloadBody::Form(form),
            result_mime_hint: "image/png".to_string(),
        })
    }

    async fn submit_job(&self, payload: &ProviderPayload) -> Result<String, ProviderError> {
        let PayloadBody::Form(form) = &payload.body else {
            return Err(ProviderError::semantic(
                "invalid_payload",
                "Turbotext payload must be a form",
            ));
        };
        let body = self.post_form(&payload.endpoint, form).await?;
        if !body.success {
            return Err(ProviderError::semantic(
                "create_queue_failed",
                body.failure_message(),
            ));
        }
        let queue_id = body
            .queueid
            .as_ref()
            .and_then(form_value)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::semantic("missing_queue_id", "Turbotext did not return queueid"))?;
        tracing::debug!(queue_id = %queue_id, "Turbotext queue created");
        Ok(queue_id)
    }

    async fn poll_status(&self, reference: &str) -> Result<PollStatus, ProviderError> {
        let form = [
            ("do".to_string(), "get_result".to_string()),
            ("queueid".to_string(), reference.to_string()),
        ];
        let body = self.post_form(&self.config.api_url, &form).await?;

        if !body.success {
            return match body.action.as_deref() {
                Some("reconnect") => Ok(PollStatus::ActionRequired("reconnect".to_string())),
                _ => Err(ProviderError::semantic(
                    "provider_failure",
                    body.failure_message(),
                )),
            };
        }

        let uploaded = body
            .data
            .as_ref()
            .and_then(|d| d.get("uploaded_image"))
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ProviderError::semantic("no_image", "Turbotext result missing uploaded_image")
            })?;
        let result = self.download(uploaded).await?;
        Ok(PollStatus::Succeeded(result))
    }

    async fn cancel(&self, reference: &str) -> Result<(), ProviderError> {
        tracing::debug!(queue_id = reference, "Turbotext has no cancel; leaving queue entry");
        Ok(())
    }
}
