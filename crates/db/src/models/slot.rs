//! Ingest slots: a fixed entry point bound to one provider operation.

use photochanger_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `slots` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub name: String,
    pub provider_id: String,
    pub operation_id: String,
    pub settings_json: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Slot {
    pub fn new(
        id: impl Into<String>,
        provider_id: impl Into<String>,
        operation_id: impl Into<String>,
        settings_json: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider_id: provider_id.into(),
            operation_id: operation_id.into(),
            settings_json,
            created_at: now,
            updated_at: now,
        }
    }

    /// String setting from `settings_json`, if present and non-empty.
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings_json
            .get(key)
            .and_then(serde_json::Value::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}
