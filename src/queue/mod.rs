//! In-memory download queue.
//!
//! The [`DownloadQueue`] owns every queue item and is the only writer of
//! item state. Three cooperating activities run on top of the store:
//!
//! - the **admission scheduler** reacts to every state change and moves the
//!   first pending item into processing while a concurrency slot is free,
//! - the **lifecycle driver** advances one admitted item through link
//!   resolution and engine submission,
//! - the **status reconciler** polls the engine on a fixed interval and
//!   folds the authoritative job status back into the items.
//!
//! Queue state lives only in memory and is rebuilt each session; nothing is
//! persisted.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sharefetch::{DownloadQueue, RpcEngineClient, Settings, ShareApiResolver};
//!
//! # async fn example(files: Vec<sharefetch::SharedFile>, template: sharefetch::ResolutionTemplate) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::default();
//! let resolver = Arc::new(ShareApiResolver::new("https://share.example.net")?);
//! let engine = Arc::new(RpcEngineClient::new(&settings.rpc_url)?);
//! let queue = DownloadQueue::new(resolver, engine, &settings);
//!
//! queue.enqueue(&files, &template, None);
//! queue.start();
//! let runner = tokio::spawn({
//!     let queue = queue.clone();
//!     async move { queue.run().await }
//! });
//! # Ok(())
//! # }
//! ```

mod driver;
mod reconciler;
mod scheduler;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use crate::config::Settings;
use crate::engine::{EngineClient, JobHandle, JobStatus};
use crate::item::{ItemStatus, QueueItem, ResolutionParams, ResolutionTemplate, SharedFile};
use crate::resolver::LinkResolver;

/// Default maximum number of in-flight items.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Error type for queue configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Invalid concurrency limit provided.
    #[error("invalid concurrency limit {value}: must be at least 1")]
    InvalidConcurrencyLimit {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Mutable queue state; every access goes through the store mutex.
struct QueueState {
    /// Items in insertion order; admission is FIFO over this order.
    items: Vec<QueueItem>,
    /// Maximum number of in-flight items.
    concurrency_limit: usize,
    /// When false, no new items are admitted; in-flight items keep going.
    running: bool,
}

impl QueueState {
    fn in_flight_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status.is_in_flight())
            .count()
    }
}

/// Everything the driver snapshots before resolving one item.
struct ResolveSnapshot {
    params: ResolutionParams,
    target_dir: PathBuf,
    filename: String,
}

/// Shared core of the queue; owned behind an `Arc` by every clone of
/// [`DownloadQueue`] and by the spawned driver tasks.
struct QueueInner {
    state: Mutex<QueueState>,
    /// Signalled on every observable state change; wakes the scheduler.
    changed: Notify,
    shutdown: AtomicBool,
    shutdown_signal: Notify,
    resolver: Arc<dyn LinkResolver>,
    engine: Arc<dyn EngineClient>,
    download_dir: PathBuf,
    poll_interval: Duration,
}

impl QueueInner {
    /// Locks the store, recovering from a poisoned mutex: item state stays
    /// consistent under per-operation updates even if a writer panicked.
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_change(&self) {
        self.changed.notify_one();
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Admits the first pending item when a slot is free, flipping it to
    /// `resolving` under the lock so it cannot be admitted twice.
    fn admit_next(&self) -> Option<String> {
        let mut state = self.lock_state();
        if !state.running {
            return None;
        }
        if state.in_flight_count() >= state.concurrency_limit {
            return None;
        }
        let item = state
            .items
            .iter_mut()
            .find(|item| item.status == ItemStatus::Pending)?;
        item.status = ItemStatus::Resolving;
        Some(item.id.clone())
    }

    /// Captures what the driver needs to resolve one admitted item.
    ///
    /// Returns `None` when the item is gone or no longer `resolving`, which
    /// tells the driver to discard its work.
    fn resolve_snapshot(&self, id: &str) -> Option<ResolveSnapshot> {
        let state = self.lock_state();
        let item = state.items.iter().find(|item| item.id == id)?;
        if item.status != ItemStatus::Resolving {
            return None;
        }
        Some(ResolveSnapshot {
            params: item.params.clone(),
            target_dir: item
                .target_dir
                .clone()
                .unwrap_or_else(|| self.download_dir.clone()),
            filename: item.file.name.clone(),
        })
    }

    /// Marks a resolving item active. Returns false when the item was
    /// removed while its link was being resolved.
    fn mark_active(&self, id: &str) -> bool {
        let mut state = self.lock_state();
        let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if item.status != ItemStatus::Resolving {
            return false;
        }
        item.status = ItemStatus::Active;
        true
    }

    /// Stores the engine handle on an active item. Returns false when the
    /// item was removed while the submission was in flight.
    fn attach_handle(&self, id: &str, handle: JobHandle) -> bool {
        let mut state = self.lock_state();
        let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if item.status != ItemStatus::Active {
            return false;
        }
        item.engine_handle = Some(handle);
        true
    }

    /// Fails an in-flight item with the given message. Terminal items and
    /// removed items are left untouched.
    fn fail_item(&self, id: &str, message: &str) -> bool {
        let mut state = self.lock_state();
        let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if !item.status.is_in_flight() {
            return false;
        }
        item.status = ItemStatus::Failed;
        item.last_error = Some(message.to_string());
        true
    }

    /// Splits the active items into those the reconciler can poll and those
    /// still waiting for an engine handle.
    fn poll_targets(&self) -> (Vec<(String, JobHandle)>, Vec<String>) {
        let state = self.lock_state();
        let mut tracked = Vec::new();
        let mut untracked = Vec::new();
        for item in &state.items {
            if item.status != ItemStatus::Active {
                continue;
            }
            match &item.engine_handle {
                Some(handle) => tracked.push((item.id.clone(), handle.clone())),
                None => untracked.push(item.id.clone()),
            }
        }
        (tracked, untracked)
    }

    /// Folds one engine status snapshot into the matching item.
    ///
    /// The update only applies while the item is still active and still
    /// bound to the polled handle; anything else means the item moved on
    /// (or was removed) and the snapshot is stale. Returns whether a write
    /// was applied.
    fn apply_job_status(&self, id: &str, handle: &JobHandle, status: &JobStatus) -> bool {
        use crate::engine::JobState;

        let mut state = self.lock_state();
        let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if item.status != ItemStatus::Active || item.engine_handle.as_ref() != Some(handle) {
            return false;
        }

        item.bytes_downloaded = status.bytes_downloaded;
        item.bytes_total = status.bytes_total;
        item.speed_bps = status.speed_bps;
        item.progress_percent = status.progress_percent();

        match status.state {
            JobState::Complete => {
                item.status = ItemStatus::Completed;
                // The final snapshot can report fractionally under 100.
                item.progress_percent = 100.0;
                info!(item_id = %item.id, "download completed");
            }
            JobState::Error => {
                item.status = ItemStatus::Failed;
                item.last_error = Some(
                    status
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Download failed".to_string()),
                );
                info!(item_id = %item.id, error = ?item.last_error, "download failed");
            }
            JobState::Removed => {
                item.status = ItemStatus::Cancelled;
                item.last_error = Some(
                    status
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Cancelled".to_string()),
                );
                info!(item_id = %item.id, "download cancelled engine-side");
            }
            JobState::Active | JobState::Waiting | JobState::Paused => {}
        }
        true
    }
}

/// The download queue: authoritative store plus orchestration entry points.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

impl DownloadQueue {
    /// Creates a queue over the given collaborators.
    ///
    /// The queue starts paused; call [`Self::start`] to begin admitting
    /// items, and drive it with [`Self::run`].
    #[must_use]
    pub fn new(
        resolver: Arc<dyn LinkResolver>,
        engine: Arc<dyn EngineClient>,
        settings: &Settings,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: Vec::new(),
                    concurrency_limit: settings.concurrency.max(1),
                    running: false,
                }),
                changed: Notify::new(),
                shutdown: AtomicBool::new(false),
                shutdown_signal: Notify::new(),
                resolver,
                engine,
                download_dir: settings.download_dir.clone(),
                poll_interval: settings.poll_interval(),
            }),
        }
    }

    /// Appends one pending item per file not already in the queue.
    ///
    /// Enqueueing is idempotent by file id: files whose id is already
    /// present, in any state, are skipped. Returns the number of items
    /// actually added.
    #[instrument(skip(self, files, template, target_dir), fields(requested = files.len()))]
    pub fn enqueue(
        &self,
        files: &[SharedFile],
        template: &ResolutionTemplate,
        target_dir: Option<PathBuf>,
    ) -> usize {
        let mut added = 0;
        {
            let mut state = self.inner.lock_state();
            for file in files {
                if state.items.iter().any(|item| item.id == file.id) {
                    debug!(file_id = %file.id, "file already queued; skipping");
                    continue;
                }
                let params = template.params_for(&file.id);
                state
                    .items
                    .push(QueueItem::new(file.clone(), params, target_dir.clone()));
                added += 1;
            }
        }
        if added > 0 {
            info!(added, "enqueued files");
            self.inner.notify_change();
        }
        added
    }

    /// Removes an item from the queue.
    ///
    /// An active item holding an engine handle gets a best-effort engine
    /// cancel first; the item is deleted regardless of the cancel outcome.
    /// Returns whether an item was removed.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.inner.lock_state();
            state
                .items
                .iter()
                .position(|item| item.id == id)
                .map(|pos| state.items.remove(pos))
        };
        let Some(item) = removed else {
            return false;
        };

        if item.status == ItemStatus::Active {
            if let Some(handle) = &item.engine_handle {
                if let Err(error) = self.inner.engine.cancel(handle).await {
                    warn!(item_id = %item.id, handle = %handle, error = %error,
                        "engine cancel failed during removal");
                }
            }
        }

        info!(item_id = %item.id, status = %item.status, "removed item");
        self.inner.notify_change();
        true
    }

    /// Applies a mutation to the matching item; no-op when the id is absent.
    ///
    /// Returns whether an item was updated.
    pub fn update_item<F>(&self, id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut QueueItem),
    {
        let updated = {
            let mut state = self.inner.lock_state();
            match state.items.iter_mut().find(|item| item.id == id) {
                Some(item) => {
                    apply(item);
                    true
                }
                None => false,
            }
        };
        if updated {
            self.inner.notify_change();
        }
        updated
    }

    /// Removes all completed items. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed = {
            let mut state = self.inner.lock_state();
            let before = state.items.len();
            state
                .items
                .retain(|item| item.status != ItemStatus::Completed);
            before - state.items.len()
        };
        if removed > 0 {
            debug!(removed, "cleared completed items");
            self.inner.notify_change();
        }
        removed
    }

    /// Drops everything except in-flight work (resolving or active items).
    ///
    /// Pending, completed, failed, and cancelled items are removed. Returns
    /// how many were removed.
    pub fn retain_in_flight(&self) -> usize {
        let removed = {
            let mut state = self.inner.lock_state();
            let before = state.items.len();
            state.items.retain(|item| item.status.is_in_flight());
            before - state.items.len()
        };
        if removed > 0 {
            debug!(removed, "cleared queue around in-flight items");
            self.inner.notify_change();
        }
        removed
    }

    /// Changes the concurrency limit; takes effect on the next scheduling
    /// pass.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrencyLimit`] for a zero limit.
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<(), QueueError> {
        if limit == 0 {
            return Err(QueueError::InvalidConcurrencyLimit { value: limit });
        }
        self.inner.lock_state().concurrency_limit = limit;
        debug!(limit, "concurrency limit changed");
        self.inner.notify_change();
        Ok(())
    }

    /// Starts admitting pending items.
    pub fn start(&self) {
        self.inner.lock_state().running = true;
        info!("queue started");
        self.inner.notify_change();
    }

    /// Stops admitting new items; in-flight items keep going and keep being
    /// polled.
    pub fn pause(&self) {
        self.inner.lock_state().running = false;
        info!("queue paused");
        self.inner.notify_change();
    }

    /// Returns whether the queue is admitting new items.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock_state().running
    }

    /// Returns the current concurrency limit.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.inner.lock_state().concurrency_limit
    }

    /// Returns a snapshot of every item in insertion order.
    #[must_use]
    pub fn items(&self) -> Vec<QueueItem> {
        self.inner.lock_state().items.clone()
    }

    /// Returns a snapshot of one item.
    #[must_use]
    pub fn item(&self, id: &str) -> Option<QueueItem> {
        self.inner
            .lock_state()
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    /// Drives the scheduler and reconciler loops until [`Self::shutdown`].
    ///
    /// Typically spawned onto the runtime; the queue handle stays usable
    /// from other tasks while this runs.
    pub async fn run(&self) {
        info!("download queue running");
        tokio::join!(
            scheduler::run(Arc::clone(&self.inner)),
            reconciler::run(Arc::clone(&self.inner)),
        );
        info!("download queue stopped");
    }

    /// Stops the loops started by [`Self::run`].
    ///
    /// In-flight driver tasks finish their current step; their results are
    /// still folded into the store.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.shutdown_signal.notify_waiters();
        self.inner.notify_change();
    }
}
