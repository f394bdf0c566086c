//! Shared mock collaborators for queue tests.
#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::Settings;
use crate::engine::{EngineClient, EngineError, JobHandle, JobState, JobStatus};
use crate::item::{QueueItem, ResolutionParams, ResolutionTemplate, ResolveMode, SharedFile};
use crate::queue::DownloadQueue;
use crate::resolver::{LinkResolver, ResolveError, ResolvedLink};

/// Resolver whose outcome is scripted per file id.
///
/// Unscripted files resolve to a synthetic CDN link. An optional gate parks
/// every resolution until a permit is released, which lets tests race
/// removals against in-flight resolutions deterministically.
#[derive(Default)]
pub(crate) struct StubResolver {
    rejections: Mutex<HashMap<String, Option<String>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl StubResolver {
    /// Scripts a rejection for one file id.
    pub(crate) fn reject(&self, file_id: &str, message: Option<&str>) {
        self.rejections
            .lock()
            .unwrap()
            .insert(file_id.to_string(), message.map(str::to_string));
    }

    /// Parks subsequent resolutions until permits are added to the returned
    /// semaphore.
    pub(crate) fn gate_resolutions(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl LinkResolver for StubResolver {
    async fn resolve(&self, params: &ResolutionParams) -> Result<ResolvedLink, ResolveError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(message) = self.rejections.lock().unwrap().get(&params.file_id) {
            return Err(ResolveError::rejected(message.clone()));
        }
        Ok(ResolvedLink::new(format!(
            "https://cdn.example.net/{}",
            params.file_id
        )))
    }
}

/// One recorded engine submission.
#[derive(Debug, Clone)]
pub(crate) struct SubmitRecord {
    pub(crate) url: String,
    pub(crate) dir: Option<PathBuf>,
    pub(crate) filename: Option<String>,
}

/// Engine whose answers are scripted per job handle.
///
/// Handles are issued sequentially as `gid-1`, `gid-2`, ... Jobs without a
/// scripted status report an idle active transfer.
#[derive(Default)]
pub(crate) struct StubEngine {
    submits: Mutex<Vec<SubmitRecord>>,
    cancels: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, JobStatus>>,
    poll_failures: Mutex<HashSet<String>>,
    polls: AtomicUsize,
    seq: AtomicUsize,
    submit_fails: AtomicBool,
    ensure_fails: AtomicBool,
    auto_complete: AtomicBool,
    submit_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl StubEngine {
    pub(crate) fn submissions(&self) -> Vec<SubmitRecord> {
        self.submits.lock().unwrap().clone()
    }

    pub(crate) fn cancelled_handles(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    pub(crate) fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Scripts the status reported for one handle.
    pub(crate) fn set_status(&self, gid: &str, status: JobStatus) {
        self.statuses.lock().unwrap().insert(gid.to_string(), status);
    }

    /// Makes every subsequent poll for the handle fail.
    pub(crate) fn fail_polls_for(&self, gid: &str) {
        self.poll_failures.lock().unwrap().insert(gid.to_string());
    }

    /// Makes every subsequent submission fail.
    pub(crate) fn fail_submissions(&self) {
        self.submit_fails.store(true, Ordering::SeqCst);
    }

    /// Makes `ensure_started` fail.
    pub(crate) fn fail_ensure_started(&self) {
        self.ensure_fails.store(true, Ordering::SeqCst);
    }

    /// Reports every job as complete from now on.
    pub(crate) fn complete_all_jobs(&self) {
        self.auto_complete.store(true, Ordering::SeqCst);
    }

    /// Parks subsequent submissions until permits are added to the returned
    /// semaphore.
    pub(crate) fn gate_submissions(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.submit_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl EngineClient for StubEngine {
    async fn ensure_started(&self) -> Result<(), EngineError> {
        if self.ensure_fails.load(Ordering::SeqCst) {
            return Err(EngineError::not_running("stub://engine"));
        }
        Ok(())
    }

    async fn submit(
        &self,
        url: &str,
        dir: Option<&std::path::Path>,
        filename: Option<&str>,
    ) -> Result<JobHandle, EngineError> {
        let gate = self.submit_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.submit_fails.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_response("scripted submission failure"));
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.submits.lock().unwrap().push(SubmitRecord {
            url: url.to_string(),
            dir: dir.map(std::path::Path::to_path_buf),
            filename: filename.map(str::to_string),
        });
        Ok(JobHandle::new(format!("gid-{seq}")))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, EngineError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.poll_failures.lock().unwrap().contains(handle.as_str()) {
            return Err(EngineError::invalid_response("scripted poll failure"));
        }
        if self.auto_complete.load(Ordering::SeqCst) {
            return Ok(JobStatus {
                state: JobState::Complete,
                bytes_downloaded: 1000,
                bytes_total: 1000,
                speed_bps: 0,
                error_message: None,
            });
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(handle.as_str())
            .cloned()
            .unwrap_or(JobStatus {
                state: JobState::Active,
                bytes_downloaded: 0,
                bytes_total: 0,
                speed_bps: 0,
                error_message: None,
            }))
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), EngineError> {
        self.cancels.lock().unwrap().push(handle.as_str().to_string());
        Ok(())
    }
}

/// Builds a queue over the given mocks with a fast poll interval.
pub(crate) fn queue_with(
    resolver: Arc<dyn LinkResolver>,
    engine: Arc<dyn EngineClient>,
) -> DownloadQueue {
    let settings = Settings {
        poll_interval_ms: 20,
        ..Settings::default()
    };
    DownloadQueue::new(resolver, engine, &settings)
}

/// Files `f-1..f-n` named `file-1.bin..file-n.bin`.
pub(crate) fn sample_files(n: usize) -> Vec<SharedFile> {
    (1..=n)
        .map(|i| SharedFile {
            id: format!("f-{i}"),
            name: format!("file-{i}.bin"),
            size: 1000,
            category: None,
        })
        .collect()
}

pub(crate) fn sample_template() -> ResolutionTemplate {
    ResolutionTemplate {
        share_id: "sh-1".to_string(),
        sign: "sig".to_string(),
        timestamp: 1_700_000_000,
        mode: ResolveMode::Direct,
    }
}

/// Polls queue snapshots until the predicate holds; panics after 2 seconds.
pub(crate) async fn wait_for<F>(queue: &DownloadQueue, pred: F)
where
    F: Fn(&[QueueItem]) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let items = queue.items();
        if pred(&items) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within 2s; items: {items:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
