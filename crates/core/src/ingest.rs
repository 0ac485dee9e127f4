//! Upload validation performed before a job is admitted.

use crate::error::CoreError;

/// Image types a slot accepts.
pub const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Default upload cap in bytes.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

/// File extension used when storing media of `content_type`.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Lower-cased media type without parameters, e.g. `image/jpeg`.
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// MIME type of a stored media path, judged by its extension.
pub fn mime_for_path(path: &str) -> &'static str {
    let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Reject uploads with an unsupported type, no content or too many bytes.
pub fn validate_upload(content_type: &str, size: usize, max_bytes: usize) -> Result<(), CoreError> {
    let normalized = normalize_content_type(content_type);
    if !ALLOWED_CONTENT_TYPES.contains(&normalized.as_str()) {
        return Err(CoreError::Validation(format!(
            "unsupported content type '{content_type}'"
        )));
    }
    if size == 0 {
        return Err(CoreError::Validation("upload is empty".to_string()));
    }
    if size > max_bytes {
        return Err(CoreError::Validation(format!(
            "upload of {size} bytes exceeds the {max_bytes} byte limit"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_supported_images() {
        for ct in ALLOWED_CONTENT_TYPES {
            assert!(validate_upload(ct, 10, 100).is_ok());
        }
        assert!(validate_upload("image/JPEG; charset=binary", 10, 100).is_ok());
    }

    #[test]
    fn rejects_bad_uploads() {
        assert!(validate_upload("image/gif", 10, 100).is_err());
        assert!(validate_upload("image/png", 0, 100).is_err());
        assert!(validate_upload("image/png", 101, 100).is_err());
    }

    #[test]
    fn extension_matches_type() {
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for("application/octet-stream"), "bin");
        assert_eq!(mime_for_path("temp/a/b.JPG"), "image/jpeg");
        assert_eq!(mime_for_path("temp/a/b"), "application/octet-stream");
    }
}
