use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use billsync_core::{ApiError, BillsyncClient};

use super::backoff::Backoff;
use super::queue::{MAX_RETRY_COUNT, QueueItem, SyncAction, TargetTable};
use super::store::{StoreError, SyncStore};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// Both kinds are recorded against the item and consume its retry budget;
// neither aborts the drain pass.
#[derive(Debug, Error)]
enum DispatchError {
    #[error("payload decode error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("api error: {0}")]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub pending: i64,
    pub dormant: i64,
}

pub struct SyncEngine {
    client: BillsyncClient,
    store: SyncStore,
    backoff: Backoff,
    drain_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(client: BillsyncClient, store: SyncStore) -> Self {
        Self {
            client,
            store,
            backoff: Backoff::new(
                Duration::from_millis(1000),
                Duration::from_secs(60),
                false,
            ),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    // Storage failures propagate to the caller so the UI can report the
    // mutation as not saved.
    pub async fn record_mutation(
        &self,
        table: TargetTable,
        row_id: &str,
        action: SyncAction,
        payload: &serde_json::Value,
    ) -> Result<QueueItem, EngineError> {
        Ok(self
            .store
            .record_mutation(table, row_id, action, &payload.to_string())
            .await?)
    }

    // One drain pass over the full due set, oldest first. A remote failure
    // is recorded against its item and the pass moves on; only storage
    // errors abort the pass.
    pub async fn process_queue(&self) -> Result<DrainSummary, EngineError> {
        let _guard = self.drain_lock.lock().await;

        let due = self.store.list_due().await?;
        let mut summary = DrainSummary::default();

        for item in due {
            summary.attempted += 1;
            match self.apply_remote(&item).await {
                Ok(()) => {
                    self.store.remove(item.id).await?;
                    // Synced-flag write is best-effort; the queue row stays
                    // removed either way.
                    if let Err(err) = self
                        .store
                        .mark_record_synced(item.target_table, &item.target_row_id)
                        .await
                    {
                        eprintln!(
                            "[billsyncd] synced flag update failed: table={} row={} err={err}",
                            item.target_table.as_str(),
                            item.target_row_id
                        );
                    }
                    summary.applied += 1;
                    eprintln!(
                        "[billsyncd] op applied: table={} action={} row={}",
                        item.target_table.as_str(),
                        item.action.as_str(),
                        item.target_row_id
                    );
                }
                Err(err) => {
                    tokio::time::sleep(self.backoff.delay(item.retry_count)).await;
                    self.store.record_failure(item.id, &err.to_string()).await?;
                    summary.failed += 1;
                    let failures = item.retry_count + 1;
                    if failures > MAX_RETRY_COUNT {
                        eprintln!(
                            "[billsyncd] op dormant after {failures} failures: table={} action={} row={} err={err}",
                            item.target_table.as_str(),
                            item.action.as_str(),
                            item.target_row_id
                        );
                    } else {
                        eprintln!(
                            "[billsyncd] op will retry: table={} action={} row={} failures={failures} err={err}",
                            item.target_table.as_str(),
                            item.action.as_str(),
                            item.target_row_id
                        );
                    }
                }
            }
        }

        Ok(summary)
    }

    // Manual trigger for the status surface.
    pub async fn sync_now(&self) -> Result<DrainSummary, EngineError> {
        self.process_queue().await
    }

    pub async fn status(&self) -> Result<SyncStatus, EngineError> {
        Ok(SyncStatus {
            pending: self.store.pending_count().await?,
            dormant: self.store.dormant_count().await?,
        })
    }

    pub async fn purge_dormant(&self) -> Result<u64, EngineError> {
        Ok(self.store.purge_dormant().await?)
    }

    async fn apply_remote(&self, item: &QueueItem) -> Result<(), DispatchError> {
        let table = item.target_table.as_str();
        match item.action {
            SyncAction::Insert => {
                let payload: serde_json::Value = serde_json::from_str(&item.payload)?;
                self.client.create_record(table, &payload).await?;
            }
            SyncAction::Update => {
                let payload: serde_json::Value = serde_json::from_str(&item.payload)?;
                self.client
                    .update_record(table, &item.target_row_id, &payload)
                    .await?;
            }
            SyncAction::Delete => {
                self.client.delete_record(table, &item.target_row_id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
