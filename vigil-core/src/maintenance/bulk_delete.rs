use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::database::ports::{LibraryItemRepository, MaintenanceRepository};
use crate::error::Result;
use vigil_model::{BulkDeleteFailure, BulkDeleteProgress, BulkDeleteResult};

/// Streaming bulk delete for one rule's candidates.
///
/// Per item: re-validate, delete on the owning server, clean up rows, then
/// emit one progress frame. Cancellation (client disconnect) aborts the
/// items not yet started, never the one in flight. Per-item failures are
/// data in the result, not errors; prior successes are never rolled back.
pub async fn execute(
    maintenance: Arc<dyn MaintenanceRepository>,
    items: Arc<dyn LibraryItemRepository>,
    adapters: AdapterRegistry,
    rule_id: Uuid,
    candidate_ids: Vec<i64>,
    progress: mpsc::Sender<BulkDeleteProgress>,
    cancel: CancellationToken,
) -> Result<BulkDeleteResult> {
    let total = candidate_ids.len() as u64;
    let mut result = BulkDeleteResult {
        total,
        ..Default::default()
    };

    for (index, candidate_id) in candidate_ids.into_iter().enumerate() {
        if cancel.is_cancelled() {
            info!(rule = %rule_id, "bulk delete cancelled by client");
            break;
        }

        let (title, status) = delete_one(
            &maintenance,
            &items,
            &adapters,
            rule_id,
            candidate_id,
            &mut result,
        )
        .await;

        let frame = BulkDeleteProgress {
            current: index as u64 + 1,
            total,
            title,
            status: status.to_string(),
            deleted: result.deleted,
            failed: result.failed,
            skipped: result.skipped,
            total_size: result.total_size,
        };
        if progress.send(frame).await.is_err() {
            // Receiver gone mid-item: finish the bookkeeping, stop the loop.
            break;
        }
    }

    Ok(result)
}

async fn delete_one(
    maintenance: &Arc<dyn MaintenanceRepository>,
    items: &Arc<dyn LibraryItemRepository>,
    adapters: &AdapterRegistry,
    rule_id: Uuid,
    candidate_id: i64,
    result: &mut BulkDeleteResult,
) -> (String, &'static str) {
    // Re-validate: the candidate may have been excluded or re-evaluated
    // away between request and processing.
    let candidate = match maintenance.get_candidate(rule_id, candidate_id).await
    {
        Ok(Some(candidate)) => candidate,
        Ok(None) => {
            result.skipped += 1;
            return (format!("candidate {candidate_id}"), "skipped");
        }
        Err(e) => {
            result.failed += 1;
            result.failures.push(BulkDeleteFailure {
                title: format!("candidate {candidate_id}"),
                error: e.to_string(),
            });
            return (format!("candidate {candidate_id}"), "failed");
        }
    };

    match maintenance.is_excluded(rule_id, candidate.library_item_id).await {
        Ok(false) => {}
        Ok(true) => {
            result.skipped += 1;
            return (format!("candidate {candidate_id}"), "skipped");
        }
        Err(e) => {
            result.failed += 1;
            result.failures.push(BulkDeleteFailure {
                title: format!("candidate {candidate_id}"),
                error: e.to_string(),
            });
            return (format!("candidate {candidate_id}"), "failed");
        }
    }

    let item = match items.get(candidate.library_item_id).await {
        Ok(Some(item)) => item,
        Ok(None) => {
            result.skipped += 1;
            return (format!("candidate {candidate_id}"), "skipped");
        }
        Err(e) => {
            result.failed += 1;
            result.failures.push(BulkDeleteFailure {
                title: format!("candidate {candidate_id}"),
                error: e.to_string(),
            });
            return (format!("candidate {candidate_id}"), "failed");
        }
    };
    let title = item.title.clone();

    let Some(adapter) = adapters.get(&item.server_id) else {
        result.failed += 1;
        result.failures.push(BulkDeleteFailure {
            title: title.clone(),
            error: format!("no adapter for server {}", item.server_id),
        });
        return (title, "failed");
    };

    if let Err(e) = adapter.delete_item(&item.item_id).await {
        warn!(item = %item.item_id, "vendor delete failed: {e}");
        result.failed += 1;
        result.failures.push(BulkDeleteFailure {
            title: title.clone(),
            error: e.to_string(),
        });
        return (title, "failed");
    }

    result.deleted += 1;
    result.total_size += item.file_size.unwrap_or(0);
    if let Err(e) = maintenance
        .delete_candidate_and_item(rule_id, candidate.library_item_id)
        .await
    {
        // The vendor delete stands; only local bookkeeping slipped, and
        // the next sync pass reconciles it.
        warn!(item = %item.item_id, "row cleanup failed after delete: {e}");
    }
    (title, "deleted")
}
