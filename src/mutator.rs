//! Final writes against the backing store
//!
//! Both operations are single requests with no read-before-write, so
//! concurrent duplicates rely only on the store's own atomicity. Neither
//! operation retries.

use crate::resolver::ResolvedTask;
use crate::store::{DeviceRow, RowKey, Store, StoreResult, TaskSelector};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Applies device presence and task completion writes
pub struct StateMutator<S: Store> {
    store: Arc<S>,
}

impl<S: Store> StateMutator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Build the device row for a status event (pure function apart from the clock)
    fn device_row(device_id: &str, online: bool) -> DeviceRow {
        DeviceRow {
            id: device_id.to_string(),
            online,
            last_seen: Utc::now(),
        }
    }

    /// Upsert `Devices(id)` with the new presence and `last_seen = now`
    pub async fn apply_device_status(&self, device_id: &str, online: bool) -> StoreResult<()> {
        let row = Self::device_row(device_id, online);
        self.store.upsert_device(&row).await?;

        info!(
            device_id = %device_id,
            status = if online { "online" } else { "offline" },
            "Device status updated"
        );
        Ok(())
    }

    /// Mark the matching task solved; zero matches is not an error
    ///
    /// Returns the number of task rows the update matched.
    pub async fn apply_task_solved(
        &self,
        post_keys: &[RowKey],
        game_key: &RowKey,
        character_key: &RowKey,
    ) -> StoreResult<u64> {
        let selector = TaskSelector {
            post_keys: post_keys.to_vec(),
            game_key: game_key.clone(),
            character_key: character_key.clone(),
        };

        let matched = self.store.mark_tasks_solved(&selector).await?;
        debug!(matched, game = %game_key, character = %character_key, "Task update applied");
        Ok(matched)
    }

    /// Convenience wrapper taking the resolver's output
    pub async fn apply_resolved(&self, resolved: &ResolvedTask) -> StoreResult<u64> {
        self.apply_task_solved(
            &resolved.post_keys,
            &resolved.game_key,
            &resolved.character_key,
        )
        .await
    }
}
