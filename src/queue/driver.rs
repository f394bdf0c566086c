//! Per-item lifecycle driver: link resolution and engine submission.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::QueueInner;

/// Advances one admitted item: resolves its download link and submits the
/// result to the engine.
///
/// The item was flipped to `resolving` under the store lock before this task
/// was spawned, so no other driver can pick it up. The item may be removed
/// at any point while this runs; every write re-checks the item still
/// exists and discards stale results instead of re-inserting them.
pub(super) async fn drive(inner: Arc<QueueInner>, id: String) {
    let Some(snapshot) = inner.resolve_snapshot(&id) else {
        debug!(item_id = %id, "item disappeared before resolution");
        return;
    };

    debug!(item_id = %id, "resolving download link");
    match inner.resolver.resolve(&snapshot.params).await {
        Err(error) => {
            if inner.fail_item(&id, &error.user_message()) {
                info!(item_id = %id, error = %error, "link resolution failed");
            }
            inner.notify_change();
        }
        Ok(link) => {
            if !inner.mark_active(&id) {
                debug!(item_id = %id, "item removed during resolution; discarding link");
                return;
            }
            inner.notify_change();
            submit(&inner, &id, &link.url, &snapshot).await;
            inner.notify_change();
        }
    }
}

/// Hands a resolved link to the engine and stores the returned handle.
///
/// Submission failures are logged and leave the item active without a
/// handle; the reconciler decides its fate.
async fn submit(inner: &QueueInner, id: &str, url: &str, snapshot: &super::ResolveSnapshot) {
    if let Err(error) = inner.engine.ensure_started().await {
        warn!(item_id = %id, error = %error, "engine unavailable; submission skipped");
        return;
    }

    match inner
        .engine
        .submit(url, Some(&snapshot.target_dir), Some(&snapshot.filename))
        .await
    {
        Ok(handle) => {
            if inner.attach_handle(id, handle.clone()) {
                debug!(item_id = %id, handle = %handle, "submitted to engine");
            } else {
                // The item was removed while the submission was in flight;
                // the engine job is now orphaned.
                warn!(item_id = %id, handle = %handle,
                    "item removed during submission; cancelling engine job");
                if let Err(error) = inner.engine.cancel(&handle).await {
                    warn!(item_id = %id, handle = %handle, error = %error,
                        "orphaned engine job could not be cancelled");
                }
            }
        }
        Err(error) => {
            warn!(item_id = %id, error = %error,
                "engine submission failed; leaving item to reconciliation");
        }
    }
}
