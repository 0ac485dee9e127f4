//! The provider capability set shared by every backend.

use async_trait::async_trait;
use photochanger_core::types::{JobId, Timestamp};

use crate::registry::ProviderId;

/// Errors surfaced by a provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network failure, timeout or overload. Safe to retry.
    #[error("provider transport error: {0}")]
    Transport(String),

    /// The provider rejected the work. Never retried.
    #[error("provider error [{code}]: {message}")]
    Semantic { code: String, message: String },
}

impl ProviderError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn semantic(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Semantic {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Short machine-readable code for audit logs.
    pub fn code(&self) -> &str {
        match self {
            Self::Transport(_) => "transport",
            Self::Semantic { code, .. } => code,
        }
    }
}

/// The ingest image handed to a provider.
#[derive(Debug, Clone)]
pub struct IngestPayload {
    /// Path relative to the media root; also used to build public links.
    pub path: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A slot template image resolved for one job.
#[derive(Debug, Clone)]
pub struct TemplateImage {
    /// Role named by the slot binding, e.g. `style` or `background`.
    pub role: String,
    pub media_object_id: uuid::Uuid,
    /// Form field the backend expects the image under, when it takes links.
    pub form_field: Option<String>,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Everything an adapter needs to build a request for one job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub slot_id: String,
    pub operation_id: String,
    pub settings: serde_json::Value,
    pub payload: Option<IngestPayload>,
    /// Template media bound to the slot, in binding order.
    pub templates: Vec<TemplateImage>,
    pub expires_at: Timestamp,
}

impl JobContext {
    /// String setting of the slot, if present and non-blank.
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .and_then(serde_json::Value::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Slot prompt, required by every backend.
    pub fn require_prompt(&self) -> Result<&str, ProviderError> {
        self.setting_str("prompt").ok_or_else(|| {
            ProviderError::semantic("missing_prompt", "prompt is required in slot settings")
        })
    }

    pub fn require_payload(&self) -> Result<&IngestPayload, ProviderError> {
        self.payload.as_ref().ok_or_else(|| {
            ProviderError::semantic("missing_payload", "ingest payload is missing")
        })
    }
}

/// Request body of a prepared payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<PayloadFile>,
    },
}

/// One file part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadFile {
    pub field: String,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A provider request built by [`ProviderAdapter::prepare_payload`].
///
/// Opaque to the worker; only the adapter that built it reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayload {
    pub endpoint: String,
    pub body: PayloadBody,
    /// MIME type to assume when the provider does not report one.
    pub result_mime_hint: String,
}

/// A finished provider result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResult {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Outcome of one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Processing,
    Succeeded(ProviderResult),
    /// The provider asked the caller to come back later; keep polling.
    ActionRequired(String),
}

/// One external image backend.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Build the provider request for a job. Performs no I/O.
    fn prepare_payload(&self, ctx: &JobContext) -> Result<ProviderPayload, ProviderError>;

    /// Start the work and return an opaque reference to poll with.
    async fn submit_job(&self, payload: &ProviderPayload) -> Result<String, ProviderError>;

    async fn poll_status(&self, reference: &str) -> Result<PollStatus, ProviderError>;

    /// Stop the work behind `reference`. Idempotent.
    async fn cancel(&self, reference: &str) -> Result<(), ProviderError>;
}
