//! Repository for the `slots` table.

use sqlx::PgPool;

use crate::models::slot::Slot;

const COLUMNS: &str = "id, name, provider_id, operation_id, settings_json, created_at, updated_at";

pub struct SlotRepo;

impl SlotRepo {
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Slot>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM slots WHERE id = $1");
        sqlx::query_as::<_, Slot>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Slot>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM slots ORDER BY id ASC");
        sqlx::query_as::<_, Slot>(&query).fetch_all(pool).await
    }

    /// Insert a slot or replace its provider binding and settings.
    pub async fn upsert(pool: &PgPool, slot: &Slot) -> Result<Slot, sqlx::Error> {
        let query = format!(
            "INSERT INTO slots ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, provider_id = EXCLUDED.provider_id, \
                 operation_id = EXCLUDED.operation_id, settings_json = EXCLUDED.settings_json, \
                 updated_at = EXCLUDED.updated_at \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Slot>(&query)
            .bind(&slot.id)
            .bind(&slot.name)
            .bind(&slot.provider_id)
            .bind(&slot.operation_id)
            .bind(&slot.settings_json)
            .bind(slot.created_at)
            .bind(slot.updated_at)
            .fetch_one(pool)
            .await
    }
}
