//! Media kept in process memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use photochanger_core::clock::Clock;
use photochanger_core::types::{JobId, Timestamp};
use photochanger_db::models::media_object::MediaObject;
use photochanger_db::models::status::MediaScope;
use uuid::Uuid;

use super::{new_object, new_template, validate_path, MediaIndex, MediaStore, MemoryMediaIndex};
use crate::error::MediaError;

pub struct MemoryMediaStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    index: MemoryMediaIndex,
    clock: Arc<dyn Clock>,
}

impl MemoryMediaStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            index: MemoryMediaIndex::new(),
            clock,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    /// Index entry of a stored object.
    pub fn object(&self, path: &str) -> Option<MediaObject> {
        self.index.get(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn put_job_media(
        &self,
        job_id: JobId,
        scope: MediaScope,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        let object = new_object(job_id, scope, mime, bytes.len(), expires_at, self.clock.now());
        self.put(object, bytes).await
    }

    async fn put(&self, object: MediaObject, bytes: &[u8]) -> Result<MediaObject, MediaError> {
        self.lock().insert(object.path.clone(), bytes.to_vec());
        self.index.insert(&object).await?;
        Ok(object)
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn store_payload(
        &self,
        job_id: JobId,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        self.put_job_media(job_id, MediaScope::TempPayload, bytes, mime, expires_at)
            .await
    }

    async fn store_result(
        &self,
        job_id: JobId,
        bytes: &[u8],
        mime: &str,
        expires_at: Timestamp,
    ) -> Result<MediaObject, MediaError> {
        self.put_job_media(job_id, MediaScope::Result, bytes, mime, expires_at)
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
        self.put(object, bytes).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, MediaError> {
        validate_path(path)?;
        self.lock()
            .get(path)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(path.to_string()))
    }

    async fn find(&self, id: Uuid) -> Result<Option<MediaObject>, MediaError> {
        self.index.by_id(id).await
    }

    async fn find_template(&self, slot_id: &str, kind: &str) -> Result<Option<MediaObject>, MediaError> {
        self.index.template(slot_id, kind).await
    }

    async fn remove(&self, path: &str) -> Result<(), MediaError> {
        validate_path(path)?;
        self.lock().remove(path);
        self.index.remove(path).await?;
        Ok(())
    }

    async fn expired(&self, now: Timestamp) -> Result<Vec<MediaObject>, MediaError> {
        self.index.expired(now).await
    }
}
