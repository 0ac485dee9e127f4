//! Storage for ingest payloads and provider results.
//!
//! Objects are addressed by a path relative to the media root:
//! `{temp|results}/{job_id}/{media_id}.{ext}` for job media and
//! `templates/{slot_id}/{media_id}.{ext}` for slot templates. Every stored
//! object is indexed; job media carries the expiry the cleanup sweeper
//! reads, templates never expire.

use std::path::{Component, Path};

use async_trait::async_trait;
use photochanger_core::ingest::extension_for;
use photochanger_core::types::{JobId, Timestamp};
use photochanger_db::models::media_object::MediaObject;
use photochanger_db::models::status::MediaScope;
use uuid::Uuid;

use crate::error::MediaError;

pub mod fs;
pub mod index;
pub mod memory;

pub use fs::FsMediaStore;
pub use index::{MediaIndex, MemoryMediaIndex, PgMediaIndex};
pub use memory::MemoryMediaStore;

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store an ingest upload as a temporary payload of `job_id`.
    async fn store_payload(
        &self,
        job_id: JobId,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError>;

    /// Store a provider result of `job_id`.
    async fn store_result(
        &self,
        job_id: JobId,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError>;

    /// Store a template image owned by `slot_id`, tagged with `kind`.
    async fn store_template(
        &self,
        slot_id: &str,
        kind: Option<&str>,
        bytes: &[u8],
        mime: &str,
    ) -> Result<MediaObject, MediaError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, MediaError>;

    /// Index entry of the object with `id`.
    async fn find(&self, id: Uuid) -> Result<Option<MediaObject>, MediaError>;

    /// Newest template of `kind` owned by `slot_id`.
    async fn find_template(&self, slot_id: &str, kind: &str) -> Result<Option<MediaObject>, MediaError>;

    /// Delete an object and its index entry. Removing a missing object
    /// succeeds.
    async fn remove(&self, path: &str) -> Result<(), MediaError>;

    /// Temporary and result objects whose expiry is at or before `now`.
    async fn expired(&self, now: Timestamp) -> Result<Vec<MediaObject>, MediaError>;
}

fn scope_dir(scope: MediaScope) -> &'static str {
    match scope {
        MediaScope::TempPayload => "temp",
        MediaScope::Result => "results",
        MediaScope::Template => "templates",
    }
}

/// Describe a new object of `job_id` created at `now`; the path is
/// derived from its id.
pub(crate) fn new_object(
    job_id: JobId,
    scope: MediaScope,
    mime: &str,
    size: usize,
    expires_at: Timestamp,
    now: Timestamp,
) -> MediaObject {
    let id = Uuid::now_v7();
    MediaObject {
        id,
        job_id: Some(job_id),
        path: format!("{}/{job_id}/{id}.{}", scope_dir(scope), extension_for(mime)),
        mime: mime.to_string(),
        size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
        scope,
        slot_id: None,
        kind: None,
        expires_at: Some(expires_at),
        created_at: now,
    }
}

/// Describe a new template of `slot_id` created at `now`.
pub(crate) fn new_template(
    slot_id: &str,
    kind: Option<&str>,
    mime: &str,
    size: usize,
    now: Timestamp,
) -> Result<MediaObject, MediaError> {
    let id = Uuid::now_v7();
    let scope = MediaScope::Template;
    let path = format!("{}/{slot_id}/{id}.{}", scope_dir(scope), extension_for(mime));
    validate_path(&path)?;
    Ok(MediaObject {
        id,
        job_id: None,
        path,
        mime: mime.to_string(),
        size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
        scope,
        slot_id: Some(slot_id.to_string()),
        kind: kind.map(str::to_string),
        expires_at: None,
        created_at: now,
    })
}

/// Accept only non-empty relative paths made of plain segments.
pub(crate) fn validate_path(path: &str) -> Result<&Path, MediaError> {
    let candidate = Path::new(path);
    let plain = !path.is_empty()
        && !path.contains('\\')
        && candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if plain {
        Ok(candidate)
    } else {
        Err(MediaError::InvalidPath(path.to_string()))
    }
}
