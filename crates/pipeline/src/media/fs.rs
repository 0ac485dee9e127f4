//! Media stored as files under a root directory.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use photochanger_core::clock::Clock;
use photochanger_core::types::{JobId, Timestamp};
use photochanger_db::models::media_object::MediaObject;
use photochanger_db::models::status::MediaScope;
use uuid::Uuid;

use super::{new_object, new_template, validate_path, MediaIndex, MediaStore};
use crate::error::MediaError;

pub struct FsMediaStore {
    root: PathBuf,
    index: Arc<dyn MediaIndex>,
    clock: Arc<dyn Clock>,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>, index: Arc<dyn MediaIndex>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            index,
            clock,
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, MediaError> {
        Ok(self.root.join(validate_path(path)?))
    }

    async fn write_job_media(
        &self,
        job_id: JobId,
        scope: MediaScope,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        let object = new_object(job_id, scope, mime, bytes.len(), expires_at, self.clock.now());
        self.write(object, bytes).await
    }

    async fn write(&self, object: MediaObject, bytes: &[u8]) -> Result<MediaObject, MediaError> {
        let target = self.resolve(&object.path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;

        if let Err(e) = self.index.insert(&object).await {
            // Leave no unindexed file behind; nothing would ever expire it.
            let _ = tokio::fs::remove_file(&target).await;
            return Err(e);
        }

        tracing::debug!(
            job_id = ?object.job_id,
            slot_id = ?object.slot_id,
            path = %object.path,
            scope = %object.scope,
            size_bytes = object.size_bytes,
            "Media stored",
        );
        Ok(object)
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn store_payload(
        &self,
        job_id: JobId,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        self.write_job_media(job_id, MediaScope::TempPayload, bytes, mime, expires_at)
            .await
    }

    async fn store_result(
        &self,
        job_id: JobId,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        self.write_job_media(job_id, MediaScope::Result, bytes, mime, expires_at)
            .await
    }

    async fn store_template(
        &self,
        slot_id: &str,
        kind: Option<&str>,
        bytes: &[u8],
        mime: &str,
    ) -> Result<MediaObject, MediaError> {
        let object = new_template(slot_id, kind, mime, bytes.len(), self.clock.now())?;
        self.write(object, bytes).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, MediaError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(MediaError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, id: Uuid) -> Result<Option<MediaObject>, MediaError> {
        self.index.by_id(id).await
    }

    async fn find_template(&self, slot_id: &str, kind: &str) -> Result<Option<MediaObject>, MediaError> {
        self.index.template(slot_id, kind).await
    }

    async fn remove(&self, path: &str) -> Result<(), MediaError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        // Drop the per-job directory once it is empty.
        if let Some(parent) = target.parent() {
            let _ = tokio::fs::remove_dir(parent).await;
        }
        self.index.remove(path).await?;
        tracing::debug!(path = %path, "Media removed");
        Ok(())
    }

    async fn expired(&self, now: Timestamp) -> Result<Vec<MediaObject>, MediaError> {
        self.index.expired(now).await
    }
}
