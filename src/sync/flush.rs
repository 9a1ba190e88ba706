//! Pushing one checklist's items to the remote service.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::remote::{ChecklistRemote, ItemUpdate, RemoteError};
use crate::types::{Checklist, ChecklistId, Credential, ItemId};

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FailedItem {
    pub item_id: ItemId,
    pub error: String,
    #[serde(skip)]
    pub cause: RemoteError,
}

/// Per-item outcome of one flush.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FlushReport {
    pub flush_id: Uuid,
    pub checklist_id: ChecklistId,
    pub succeeded: Vec<ItemId>,
    pub failed: Vec<FailedItem>,
}

impl FlushReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// True when every failure was a connectivity problem.
    pub fn is_network_unavailable(&self) -> bool {
        !self.failed.is_empty()
            && self
                .failed
                .iter()
                .all(|failed| matches!(failed.cause, RemoteError::Unavailable(_)))
    }
}

/// Everything needed to flush a checklist, detached from the store so it can
/// outlive the controller that built it.
#[derive(Debug, Clone)]
pub struct FlushPlan {
    flush_id: Uuid,
    credential: Credential,
    checklist_id: ChecklistId,
    updates: Vec<(ItemId, ItemUpdate)>,
}

impl FlushPlan {
    /// One status update per item, carrying the item's current name.
    pub fn for_checklist(credential: Credential, checklist: &Checklist) -> Self {
        let updates = checklist
            .items
            .iter()
            .map(|item| {
                (
                    item.id.clone(),
                    ItemUpdate {
                        name: item.name.clone(),
                        status: item.status,
                    },
                )
            })
            .collect();
        Self {
            flush_id: Uuid::new_v4(),
            credential,
            checklist_id: checklist.id.clone(),
            updates,
        }
    }

    pub fn checklist_id(&self) -> &ChecklistId {
        &self.checklist_id
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Issues every update concurrently and waits for all of them to settle.
    ///
    /// Requests already issued keep running even if this future is dropped.
    pub async fn execute<R: ChecklistRemote>(self, remote: Arc<R>) -> FlushReport {
        let FlushPlan {
            flush_id,
            credential,
            checklist_id,
            updates,
        } = self;

        info!(%flush_id, %checklist_id, items = updates.len(), "flush started");

        let pending: Vec<(ItemId, JoinHandle<Result<(), RemoteError>>)> = updates
            .into_iter()
            .map(|(item_id, update)| {
                let remote = Arc::clone(&remote);
                let credential = credential.clone();
                let request_item_id = item_id.clone();
                let handle = tokio::spawn(async move {
                    remote
                        .update_item(&credential, &request_item_id, &update)
                        .await
                });
                (item_id, handle)
            })
            .collect();

        let mut succeeded = Vec::with_capacity(pending.len());
        let mut failed = Vec::new();
        for (item_id, handle) in pending {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(RemoteError::Unavailable(format!(
                    "update task did not complete: {join_error}"
                ))),
            };
            match result {
                Ok(()) => {
                    debug!(%flush_id, %item_id, "item update settled");
                    succeeded.push(item_id);
                }
                Err(cause) => {
                    warn!(%flush_id, %item_id, error = %cause, "item update failed");
                    failed.push(FailedItem {
                        item_id,
                        error: cause.to_string(),
                        cause,
                    });
                }
            }
        }

        info!(
            %flush_id,
            %checklist_id,
            succeeded = succeeded.len(),
            failed = failed.len(),
            "flush settled"
        );

        FlushReport {
            flush_id,
            checklist_id,
            succeeded,
            failed,
        }
    }
}
