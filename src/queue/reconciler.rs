//! Periodic reconciliation of queue state against the engine.
//!
//! The engine only exposes pull-based status, so a fixed-interval sweep
//! polls every active item and folds the results back into the store. The
//! sweep runs whether or not the queue is admitting new items: pausing only
//! stops admissions, not tracking of already-submitted jobs.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::QueueInner;

/// Consecutive sweeps an active item may spend without an engine handle
/// before it is failed. Covers submissions that errored after a successful
/// resolution and would otherwise hang forever.
pub(super) const HANDLELESS_SWEEP_LIMIT: u32 = 3;

pub(super) async fn run(inner: Arc<QueueInner>) {
    let mut interval = tokio::time::interval(inner.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut handleless_sweeps: HashMap<String, u32> = HashMap::new();

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = inner.shutdown_signal.notified() => break,
        }
        if inner.is_shutdown() {
            break;
        }
        sweep(&inner, &mut handleless_sweeps).await;
    }
    debug!("reconciler loop exited");
}

/// One reconciliation pass over every active item.
pub(super) async fn sweep(inner: &QueueInner, handleless_sweeps: &mut HashMap<String, u32>) {
    let (tracked, untracked) = inner.poll_targets();

    // Items that gained a handle or left the queue stop being counted.
    handleless_sweeps.retain(|id, _| untracked.contains(id));
    for id in &untracked {
        let sweeps = handleless_sweeps.entry(id.clone()).or_insert(0);
        *sweeps += 1;
        if *sweeps >= HANDLELESS_SWEEP_LIMIT {
            warn!(item_id = %id, sweeps = *sweeps,
                "no engine handle after repeated sweeps; failing item");
            if inner.fail_item(id, "download engine never acknowledged this job") {
                inner.notify_change();
            }
            handleless_sweeps.remove(id);
        }
    }

    if tracked.is_empty() {
        return;
    }

    // All polls of one sweep go out together; the tick lasts as long as the
    // slowest poll, not the sum.
    let polls = tracked.into_iter().map(|(id, handle)| {
        let engine = Arc::clone(&inner.engine);
        async move {
            let result = engine.poll(&handle).await;
            (id, handle, result)
        }
    });

    let mut applied = false;
    for (id, handle, result) in join_all(polls).await {
        match result {
            Ok(status) => {
                applied |= inner.apply_job_status(&id, &handle, &status);
            }
            Err(error) => {
                // One failed poll never aborts the rest of the sweep; the
                // item is retried on the next tick.
                warn!(item_id = %id, handle = %handle, error = %error, "status poll failed");
            }
        }
    }
    if applied {
        inner.notify_change();
    }
}
