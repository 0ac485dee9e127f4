//! Index of stored media objects with their expiry and template owner.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use photochanger_core::types::Timestamp;
use photochanger_db::models::media_object::MediaObject;
use photochanger_db::repositories::MediaObjectRepo;
use photochanger_db::models::status::MediaScope;
use photochanger_db::DbPool;
use uuid::Uuid;

use crate::error::MediaError;

#[async_trait]
pub trait MediaIndex: Send + Sync {
    async fn insert(&self, media: &MediaObject) -> Result<(), MediaError>;

    /// Returns `true` if an entry was removed.
    async fn remove(&self, path: &str) -> Result<bool, MediaError>;

    async fn expired(&self, now: Timestamp) -> Result<Vec<MediaObject>, MediaError>;

    async fn by_id(&self, id: Uuid) -> Result<Option<MediaObject>, MediaError>;

    /// Newest template of `kind` owned by `slot_id`.
    async fn template(&self, slot_id: &str, kind: &str) -> Result<Option<MediaObject>, MediaError>;
}

/// Index backed by the `media_objects` table.
pub struct PgMediaIndex {
    pool: DbPool,
}

impl PgMediaIndex {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaIndex for PgMediaIndex {
    async fn insert(&self, media: &MediaObject) -> Result<(), MediaError> {
        Ok(MediaObjectRepo::insert(&self.pool, media).await?)
    }

    async fn remove(&self, path: &str) -> Result<bool, MediaError> {
        Ok(MediaObjectRepo::delete_by_path(&self.pool, path).await?)
    }

    async fn expired(&self, now: Timestamp) -> Result<Vec<MediaObject>, MediaError> {
        Ok(MediaObjectRepo::list_expired(&self.pool, now).await?)
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<MediaObject>, MediaError> {
        Ok(MediaObjectRepo::find_by_id(&self.pool, id).await?)
    }

    async fn template(&self, slot_id: &str, kind: &str) -> Result<Option<MediaObject>, MediaError> {
        Ok(MediaObjectRepo::find_template(&self.pool, slot_id, kind).await?)
    }
}

#[derive(Default)]
pub struct MemoryMediaIndex {
    entries: Mutex<HashMap<String, MediaObject>>,
}

impl MemoryMediaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<MediaObject> {
        self.lock().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MediaObject>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MediaIndex for MemoryMediaIndex {
    async fn insert(&self, media: &MediaObject) -> Result<(), MediaError> {
        self.lock().insert(media.path.clone(), media.clone());
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<bool, MediaError> {
        Ok(self.lock().remove(path).is_some())
    }

    async fn expired(&self, now: Timestamp) -> Result<Vec<MediaObject>, MediaError> {
        let mut expired: Vec<MediaObject> = self
            .lock()
            .values()
            .filter(|media| media.is_expired_at(now))
            .cloned()
            .collect();
        expired.sort_by_key(|media| media.expires_at);
        Ok(expired)
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<MediaObject>, MediaError> {
        Ok(self.lock().values().find(|media| media.id == id).cloned())
    }

    async fn template(&self, slot_id: &str, kind: &str) -> Result<Option<MediaObject>, MediaError> {
        Ok(self
            .lock()
            .values()
            .filter(|media| {
                media.scope == MediaScope::Template
                    && media.slot_id.as_deref() == Some(slot_id)
                    && media.kind.as_deref() == Some(kind)
            })
            .max_by_key(|media| (media.created_at, media.id))
            .cloned())
    }
}
