//! Slot lookup for the ingest gateway and workers.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use photochanger_db::models::slot::Slot;
use photochanger_db::repositories::SlotRepo;
use photochanger_db::DbPool;

use crate::error::SlotError;

#[async_trait]
pub trait SlotDirectory: Send + Sync {
    async fn find(&self, slot_id: &str) -> Result<Option<Slot>, SlotError>;
}

/// Slots read from the `slots` table on every lookup.
pub struct PgSlotDirectory {
    pool: DbPool,
}

impl PgSlotDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SlotDirectory for PgSlotDirectory {
    async fn find(&self, slot_id: &str) -> Result<Option<Slot>, SlotError> {
        Ok(SlotRepo::find_by_id(&self.pool, slot_id).await?)
    }
}

/// A fixed set of slots held in memory.
#[derive(Default)]
pub struct StaticSlotDirectory {
    slots: RwLock<HashMap<String, Slot>>,
}

impl StaticSlotDirectory {
    pub fn new(slots: impl IntoIterator<Item = Slot>) -> Self {
        let directory = Self::default();
        for slot in slots {
            directory.insert(slot);
        }
        directory
    }

    /// Add or replace a slot.
    pub fn insert(&self, slot: Slot) {
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.insert(slot.id.clone(), slot);
    }
}

#[async_trait]
impl SlotDirectory for StaticSlotDirectory {
    async fn find(&self, slot_id: &str) -> Result<Option<Slot>, SlotError> {
        let slots = self
            .slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(slots.get(slot_id).cloned())
    }
}
