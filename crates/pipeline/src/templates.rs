//! Template media bound to a slot.
//!
//! A slot's `template_media` setting lists bindings; each names a stored
//! template either directly by `media_object_id` or by `media_kind`, which
//! resolves to the newest template of that kind owned by the slot. Optional
//! bindings whose media is gone are skipped.

use photochanger_db::models::status::MediaScope;
use photochanger_providers::TemplateImage;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{MediaError, TemplateError};
use crate::media::MediaStore;

/// One entry of a slot's `template_media` setting.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateBinding {
    pub role: String,
    #[serde(default)]
    pub media_kind: Option<String>,
    #[serde(default)]
    pub media_object_id: Option<Uuid>,
    #[serde(default)]
    pub optional: bool,
    /// Form field for backends that take template links.
    #[serde(default)]
    pub form_field: Option<String>,
}

/// Parse the bindings out of slot settings; absent or null means none.
pub fn bindings(settings: &Value) -> Result<Vec<TemplateBinding>, TemplateError> {
    match settings.get("template_media") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| TemplateError::Binding(e.to_string())),
    }
}

/// Load every bound template of `slot_id`, in binding order.
pub async fn resolve_templates(
    media: &dyn MediaStore,
    slot_id: &str,
    settings: &Value,
) -> Result<Vec<TemplateImage>, TemplateError> {
    let mut resolved = Vec::new();
    for binding in bindings(settings)? {
        if let Some(image) = resolve_binding(media, slot_id, &binding).await? {
            resolved.push(image);
        }
    }
    Ok(resolved)
}

async fn resolve_binding(
    media: &dyn MediaStore,
    slot_id: &str,
    binding: &TemplateBinding,
) -> Result<Option<TemplateImage>, TemplateError> {
    let object = match (binding.media_object_id, binding.media_kind.as_deref()) {
        (Some(id), _) => media.find(id).await?,
        (None, Some(kind)) => media.find_template(slot_id, kind).await?,
        (None, None) => {
            return Err(TemplateError::Binding(format!(
                "template '{}' must define media_object_id or media_kind",
                binding.role
            )));
        }
    };

    let missing = || {
        if binding.optional {
            tracing::debug!(slot_id, role = %binding.role, "Optional template media missing, skipped");
            Ok(None)
        } else {
            Err(TemplateError::Missing {
                role: binding.role.clone(),
            })
        }
    };

    let Some(object) = object.filter(|o| o.scope == MediaScope::Template) else {
        return missing();
    };
    let bytes = match media.read(&object.path).await {
        Ok(bytes) => bytes,
        Err(MediaError::NotFound(_)) => return missing(),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(TemplateImage {
        role: binding.role.clone(),
        media_object_id: object.id,
        form_field: binding.form_field.clone(),
        mime_type: object.mime,
        bytes,
    }))
}
