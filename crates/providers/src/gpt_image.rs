//! OpenAI GPT Image 1.5 `images/edits` adapter.
//!
//! The ingest image and every slot template are sent as `image[]` parts;
//! the edited image comes back base64-encoded in `data[0].b64_json`.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;

use crate::adapter::{
    JobContext, PayloadBody, PayloadFile, PollStatus, ProviderAdapter, ProviderError,
    ProviderPayload, ProviderResult,
};
use crate::http;
use crate::pending::{self, CallResult, PendingCalls};
use crate::registry::ProviderId;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/images/edits";
pub const DEFAULT_MODEL: &str = "gpt-image-1.5-2025-12-16";
const DEFAULT_OUTPUT_FORMAT: &str = "png";
const IMAGE_FIELD: &str = "image[]";

#[derive(Debug, Clone)]
pub struct GptImageConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub request_timeout: Duration,
}

impl Default for GptImageConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    #[serde(default)]
    data: Vec<EditImage>,
}

#[derive(Debug, Deserialize)]
struct EditImage {
    b64_json: Option<String>,
}

pub struct GptImageAdapter {
    client: reqwest::Client,
    config: GptImageConfig,
    pending: PendingCalls,
}

impl GptImageAdapter {
    pub fn new(client: reqwest::Client, config: GptImageConfig) -> Self {
        Self {
            client,
            config,
            pending: PendingCalls::new(ProviderId::GptImage15),
        }
    }
}

/// MIME type of an `output_format` value.
fn mime_for_format(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

/// File extension for a MIME type, used to name multipart parts.
fn extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

#[async_trait]
impl ProviderAdapter for GptImageAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::GptImage15
    }

    fn prepare_payload(&self, ctx: &JobContext) -> Result<ProviderPayload, ProviderError> {
        let prompt = ctx.require_prompt()?;
        let ingest = ctx.require_payload()?;
        let model = ctx.setting_str("model").unwrap_or(DEFAULT_MODEL);

        let output = ctx.settings.get("output");
        let output_str = |key: &str| {
            output
                .and_then(|o| o.get(key))
                .and_then(Value::as_str)
                .filter(|v| !v.trim().is_empty())
        };
        let output_format = output_str("format").unwrap_or(DEFAULT_OUTPUT_FORMAT);

        let mut fields = vec![
            ("model".to_string(), model.to_string()),
            ("prompt".to_string(), prompt.to_string()),
            ("output_format".to_string(), output_format.to_string()),
        ];
        if let Some(compression) = output
            .and_then(|o| o.get("compression"))
            .filter(|v| !v.is_null())
        {
            let value = compression
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| compression.to_string());
            fields.push(("output_compression".to_string(), value));
        }
        if let Some(size) = output_str("size") {
            fields.push(("size".to_string(), size.to_string()));
        }

        let ingest_name = ingest
            .path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("ingest.png");
        let mut files = vec![PayloadFile {
            field: IMAGE_FIELD.to_string(),
            filename: ingest_name.to_string(),
            mime_type: ingest.mime_type.clone(),
            bytes: ingest.bytes.clone(),
        }];
        files.extend(ctx.templates.iter().enumerate().map(|(i, template)| PayloadFile {
            field: IMAGE_FIELD.to_string(),
            filename: format!("template-{}.{}", i + 1, extension(&template.mime_type)),
            mime_type: template.mime_type.clone(),
            bytes: template.bytes.clone(),
        }));

        tracing::debug!(
            job_id = %ctx.job_id,
            slot_id = %ctx.slot_id,
            payload_bytes = ingest.bytes.len(),
            template_count = ctx.templates.len(),
            "GPT Image payload prepared"
        );

        Ok(ProviderPayload {
            endpoint: self.config.api_url.clone(),
            body: PayloadBody::Multipart { fields, files },
            result_mime_hint: mime_for_format(output_format).to_string(),
        })
    }

    async fn submit_job(&self, payload: &ProviderPayload) -> Result<String, ProviderError> {
        let api_key = self.config.api_key.clone().ok_or_else(|| {
            ProviderError::semantic("missing_api_key", "OPENAI_API_KEY is not set")
        })?;

        let client = self.client.clone();
        let timeout = self.config.request_timeout;
        let call = pending::call(move |payload| {
            let client = client.clone();
            let api_key = api_key.clone();
            async move { edit_image(&client, &payload, &api_key, timeout).await }
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

/// Perform one `images/edits` call.
async fn edit_image(
    client: &reqwest::Client,
    payload: &ProviderPayload,
    api_key: &str,
    timeout: Duration,
) -> CallResult {
    let PayloadBody::Multipart { fields, files } = &payload.body else {
        return Err(ProviderError::semantic(
            "invalid_payload",
            "GPT Image payload must be multipart",
        ));
    };

    let mut form = reqwest::multipart::Form::new();
    for (name, value) in fields {
        form = form.text(name.clone(), value.clone());
    }
    for file in files {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.filename.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| ProviderError::semantic("invalid_payload", format!("bad MIME type: {e}")))?;
        form = form.part(file.field.clone(), part);
    }

    let response = client
        .post(&payload.endpoint)
        .bearer_auth(api_key)
        .timeout(timeout)
        .multipart(form)
        .send()
        .await
        .map_err(http::transport)?;

    let body: EditResponse = http::parse_json(response).await?;
    parse_edit_response(body, &payload.result_mime_hint)
}

fn parse_edit_response(body: EditResponse, mime_type: &str) -> CallResult {
    let encoded = body
        .data
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::semantic("no_image", "GPT Image response missing data"))?
        .b64_json
        .filter(|data| !data.is_empty())
        .ok_or_else(|| ProviderError::semantic("no_image", "GPT Image response missing b64_json"))?;
    let bytes = BASE64.decode(encoded).map_err(|e| {
        ProviderError::semantic("invalid_response", format!("b64_json is not base64: {e}"))
    })?;
    Ok(ProviderResult {
        bytes,
        mime_type: mime_type.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use photochanger_core::types::JobId;
    use serde_json::json;

    use super::*;
    use crate::adapter::{IngestPayload, TemplateImage};

    fn ctx(settings: Value) -> JobContext {
        JobContext {
            job_id: JobId::now_v7(),
            slot_id: "slot-003".into(),
            operation_id: "image_edit".into(),
            settings,
            payload: Some(IngestPayload {
                path: "temp/job/payload.jpg".into(),
                mime_type: "image/jpeg".into(),
                bytes: vec![1, 2, 3],
            }),
            templates: vec![TemplateImage {
                role: "style".into(),
                media_object_id: uuid::Uuid::now_v7(),
                form_field: None,
                mime_type: "image/webp".into(),
                bytes: vec![4, 5],
            }],
            expires_at: chrono::Utc::now(),
        }
    }

    fn adapter(api_key: Option<&str>) -> GptImageAdapter {
        GptImageAdapter::new(
            reqwest::Client::new(),
            GptImageConfig {
                api_key: api_key.map(str::to_string),
                ..Default::default()
            },
        )
    }

    #[test]
    fn multipart_carries_settings_and_every_image() {
        let payload = adapter(Some("k"))
            .prepare_payload(&ctx(json!({
                "prompt": "oil painting",
                "output": { "format": "webp", "compression": 80, "size": "1024x1024" },
            })))
            .unwrap();

        assert_eq!(payload.endpoint, DEFAULT_API_URL);
        assert_eq!(payload.result_mime_hint, "image/webp");
        let PayloadBody::Multipart { fields, files } = payload.body else {
            panic!("expected multipart body");
        };
        let get = |k: &str| fields.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("model"), Some(DEFAULT_MODEL));
        assert_eq!(get("prompt"), Some("oil painting"));
        assert_eq!(get("output_format"), Some("webp"));
        assert_eq!(get("output_compression"), Some("80"));
        assert_eq!(get("size"), Some("1024x1024"));

        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.field == "image[]"));
        assert_eq!(files[0].filename, "payload.jpg");
        assert_eq!(files[0].bytes, vec![1, 2, 3]);
        assert_eq!(files[1].filename, "template-1.webp");
        assert_eq!(files[1].mime_type, "image/webp");
    }

    #[test]
    fn defaults_to_png_without_optional_fields() {
        let payload = adapter(Some("k"))
            .prepare_payload(&ctx(json!({ "prompt": "p", "model": "gpt-image-1.5" })))
            .unwrap();
        assert_eq!(payload.result_mime_hint, "image/png");
        let PayloadBody::Multipart { fields, .. } = payload.body else {
            panic!("expected multipart body");
        };
        let keys: Vec<_> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["model", "prompt", "output_format"]);
        assert_eq!(fields[0].1, "gpt-image-1.5");
    }

    #[test]
    fn missing_prompt_is_semantic() {
        assert_matches!(
            adapter(Some("k")).prepare_payload(&ctx(json!({ "output": {} }))),
            Err(ProviderError::Semantic { code, .. }) if code == "missing_prompt"
        );
    }

    #[tokio::test]
    async fn submit_requires_api_key() {
        let adapter = adapter(None);
        let payload = adapter.prepare_payload(&ctx(json!({ "prompt": "p" }))).unwrap();
        assert_matches!(
            adapter.submit_job(&payload).await,
            Err(ProviderError::Semantic { code, .. }) if code == "missing_api_key"
        );
    }

    #[test]
    fn decodes_first_b64_image() {
        let body: EditResponse =
            serde_json::from_value(json!({ "data": [{ "b64_json": "AQID" }] })).unwrap();
        let result = parse_edit_response(body, "image/jpeg").unwrap();
        assert_eq!(result.bytes, vec![1, 2, 3]);
        assert_eq!(result.mime_type, "image/jpeg");

        let empty: EditResponse = serde_json::from_value(json!({ "data": [] })).unwrap();
        assert_matches!(
            parse_edit_response(empty, "image/png"),
            Err(ProviderError::Semantic { code, .. }) if code == "no_image"
        );
    }

    #[test]
    fn output_format_maps_to_mime() {
        assert_eq!(mime_for_format("JPEG"), "image/jpeg");
        assert_eq!(mime_for_format("webp"), "image/webp");
        assert_eq!(mime_for_format("tiff"), "image/png");
    }
}
