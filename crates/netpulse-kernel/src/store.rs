//! Persistence owned by the collection core: the schedules relation.
//!
//! The core persists exactly one relation, `(item_id, schedule_id,
//! schedule_text)` with composite key `(item_id, schedule_id)`. Saving an
//! item rebuilds its rows atomically; deleting an item removes them. Storage
//! backends live with the host platform; an in-memory implementation is
//! provided for embedding and tests.

use async_trait::async_trait;
use dashmap::DashMap;

/// Failure of a schedule-store operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// One persisted schedule row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    pub schedule_id: u32,
    pub schedule: String,
}

/// Persistence contract for per-item schedule sets.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Replace all rows of `item_id` with the given schedules, numbering
    /// them 1..=n. The rebuild is atomic: readers never observe a partial
    /// set.
    async fn replace_schedules(
        &self,
        item_id: u32,
        schedules: &[String],
    ) -> Result<(), StoreError>;

    /// Load the schedule rows of `item_id` in schedule-id order.
    async fn load_schedules(&self, item_id: u32) -> Result<Vec<ScheduleRow>, StoreError>;

    /// Remove all rows of `item_id`. Removing an unknown item is not an
    /// error.
    async fn delete_schedules(&self, item_id: u32) -> Result<(), StoreError>;
}

/// In-memory [`ScheduleStore`].
#[derive(Default)]
pub struct MemoryScheduleStore {
    rows: DashMap<u32, Vec<ScheduleRow>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn replace_schedules(
        &self,
        item_id: u32,
        schedules: &[String],
    ) -> Result<(), StoreError> {
        let rows: Vec<ScheduleRow> = schedules
            .iter()
            .enumerate()
            .map(|(i, s)| ScheduleRow {
                schedule_id: (i + 1) as u32,
                schedule: s.clone(),
            })
            .collect();
        if rows.is_empty() {
            self.rows.remove(&item_id);
        } else {
            self.rows.insert(item_id, rows);
        }
        Ok(())
    }

    async fn load_schedules(&self, item_id: u32) -> Result<Vec<ScheduleRow>, StoreError> {
        Ok(self
            .rows
            .get(&item_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn delete_schedules(&self, item_id: u32) -> Result<(), StoreError> {
        self.rows.remove(&item_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
