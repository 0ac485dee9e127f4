//! Repository for the `media_objects` index.

use photochanger_core::types::Timestamp;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::media_object::MediaObject;
use crate::models::status::MediaScope;

const COLUMNS: &str =
    "id, job_id, path, mime, size_bytes, scope, slot_id, kind, expires_at, created_at";

pub struct MediaObjectRepo;

impl MediaObjectRepo {
    pub async fn insert(pool: &PgPool, media: &MediaObject) -> Result<(), sqlx::Error> {
        let query = format!(
            "INSERT INTO media_objects ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&query)
            .bind(media.id)
            .bind(media.job_id)
            .bind(&media.path)
            .bind(&media.mime)
            .bind(media.size_bytes)
            .bind(media.scope)
            .bind(&media.slot_id)
            .bind(&media.kind)
            .bind(media.expires_at)
            .bind(media.created_at)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<MediaObject>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM media_objects WHERE id = $1");
        sqlx::query_as::<_, MediaObject>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Newest template object of `kind` owned by `slot_id`.
    pub async fn find_template(
        pool: &PgPool,
        slot_id: &str,
        kind: &str,
    ) -> Result<Option<MediaObject>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM media_objects \
             WHERE scope = $1 AND slot_id = $2 AND kind = $3 \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, MediaObject>(&query)
            .bind(MediaScope::Template)
            .bind(slot_id)
            .bind(kind)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_path(pool: &PgPool, path: &str) -> Result<Option<MediaObject>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM media_objects WHERE path = $1");
        sqlx::query_as::<_, MediaObject>(&query)
            .bind(path)
            .fetch_optional(pool)
            .await
    }

    /// Returns `true` if a row was deleted.
    pub async fn delete_by_path(pool: &PgPool, path: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM media_objects WHERE path = $1")
            .bind(path)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Temporary and result objects whose expiry is at or before `now`.
    pub async fn list_expired(pool: &PgPool, now: Timestamp) -> Result<Vec<MediaObject>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM media_objects \
             WHERE scope <> $1 AND expires_at <= $2 \
             ORDER BY expires_at ASC"
        );
        sqlx::query_as::<_, MediaObject>(&query)
            .bind(MediaScope::Template)
            .bind(now)
            .fetch_all(pool)
            .await
    }
}
