//! Stored media files tracked for TTL cleanup.

use photochanger_core::types::{JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::status::MediaScope;

/// A row from the `media_objects` table.
///
/// `path` is relative to the media root. Template objects have no expiry
/// and are owned by a slot, optionally tagged with a `kind`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct MediaObject {
    pub id: Uuid,
    pub job_id: Option<JobId>,
    pub path: String,
    pub mime: String,
    pub size_bytes: i64,
    pub scope: MediaScope,
    pub slot_id: Option<String>,
    pub kind: Option<String>,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl MediaObject {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.scope != MediaScope::Template && self.expires_at.is_some_and(|at| at <= now)
    }
}
