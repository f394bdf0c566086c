//! End-to-end queue scenarios against mock collaborators.
//!
//! These tests exercise the public queue surface the way the presentation
//! layer does: enqueue a selection, start the queue, and observe item state
//! as the scheduler, driver, and reconciler loops advance it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use sharefetch::{
    DownloadQueue, EngineClient, EngineError, ItemStatus, JobHandle, JobState, JobStatus,
    LinkResolver, QueueItem, ResolutionParams, ResolutionTemplate, ResolveError, ResolveMode,
    ResolvedLink, Settings, SharedFile,
};

/// Resolver that links every file to a synthetic CDN URL.
///
/// Individual files can be scripted to reject, and an optional gate parks
/// resolutions until permits are released.
#[derive(Default)]
struct FlowResolver {
    rejections: Mutex<HashMap<String, Option<String>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FlowResolver {
    fn reject(&self, file_id: &str, message: Option<&str>) {
        self.rejections
            .lock()
            .unwrap()
            .insert(file_id.to_string(), message.map(str::to_string));
    }

    fn gate_resolutions(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl LinkResolver for FlowResolver {
    async fn resolve(&self, params: &ResolutionParams) -> Result<ResolvedLink, ResolveError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(message) = self.rejections.lock().unwrap().get(&params.file_id) {
            return Err(ResolveError::rejected(message.clone()));
        }
        Ok(ResolvedLink::new(format!(
            "https://cdn.test/{}",
            params.file_id
        )))
    }
}

/// Engine that derives job handles from the submitted URL (`job-<file_id>`)
/// so tests can script per-job status without tracking submission order.
#[derive(Default)]
struct FlowEngine {
    submissions: Mutex<Vec<(String, Option<PathBuf>, Option<String>)>>,
    cancels: Mutex<Vec<String>>,
    cancel_fails: AtomicBool,
    statuses: Mutex<HashMap<String, JobStatus>>,
    poll_failures: Mutex<HashSet<String>>,
}

impl FlowEngine {
    fn set_status(&self, handle: &str, status: JobStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(handle.to_string(), status);
    }

    fn complete(&self, handle: &str) {
        self.set_status(
            handle,
            JobStatus {
                state: JobState::Complete,
                bytes_downloaded: 1000,
                bytes_total: 1000,
                speed_bps: 0,
                error_message: None,
            },
        );
    }

    fn submitted_urls(&self) -> Vec<String> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _, _)| url.clone())
            .collect()
    }

    fn cancelled(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineClient for FlowEngine {
    async fn ensure_started(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn submit(
        &self,
        url: &str,
        dir: Option<&Path>,
        filename: Option<&str>,
    ) -> Result<JobHandle, EngineError> {
        self.submissions.lock().unwrap().push((
            url.to_string(),
            dir.map(Path::to_path_buf),
            filename.map(str::to_string),
        ));
        let file_id = url.rsplit('/').next().unwrap_or("unknown");
        Ok(JobHandle::new(format!("job-{file_id}")))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, EngineError> {
        if self.poll_failures.lock().unwrap().contains(handle.as_str()) {
            return Err(EngineError::invalid_response("injected poll failure"));
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
                bytes_total: 1000,
                speed_bps: 0,
                error_message: None,
            }))
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), EngineError> {
        self.cancels.lock().unwrap().push(handle.as_str().to_string());
        if self.cancel_fails.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_response("injected cancel failure"));
        }
        Ok(())
    }
}

fn files(n: usize) -> Vec<SharedFile> {
    (1..=n)
        .map(|i| SharedFile {
            id: format!("f-{i}"),
            name: format!("file-{i}.bin"),
            size: 1000,
            category: None,
        })
        .collect()
}

fn template() -> ResolutionTemplate {
    ResolutionTemplate {
        share_id: "sh-1".to_string(),
        sign: "sig".to_string(),
        timestamp: 1_700_000_000,
        mode: ResolveMode::Direct,
    }
}

fn queue_over(
    resolver: Arc<FlowResolver>,
    engine: Arc<FlowEngine>,
    concurrency: usize,
) -> DownloadQueue {
    let settings = Settings {
        concurrency,
        poll_interval_ms: 20,
        ..Settings::default()
    };
    DownloadQueue::new(resolver, engine, &settings)
}

async fn wait_for<F>(queue: &DownloadQueue, pred: F)
where
    F: Fn(&[QueueItem]) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let items = queue.items();
        if pred(&items) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 3s; items: {items:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn status_of(queue: &DownloadQueue, id: &str) -> ItemStatus {
    queue.items().into_iter().find(|i| i.id == id).unwrap().status
}

#[tokio::test]
async fn three_files_with_limit_one_advance_fifo() {
    let resolver = Arc::new(FlowResolver::default());
    let gate = resolver.gate_resolutions();
    let engine = Arc::new(FlowEngine::default());
    let queue = queue_over(Arc::clone(&resolver), Arc::clone(&engine), 1);

    queue.enqueue(&files(3), &template(), None);
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    // First item is admitted; the others wait for the single slot.
    wait_for(&queue, |items| {
        items.iter().any(|i| i.status == ItemStatus::Resolving)
    })
    .await;
    assert_eq!(status_of(&queue, "f-1"), ItemStatus::Resolving);
    assert_eq!(status_of(&queue, "f-2"), ItemStatus::Pending);
    assert_eq!(status_of(&queue, "f-3"), ItemStatus::Pending);

    // Resolution finishes; the item goes active but nothing new is admitted.
    gate.add_permits(1);
    wait_for(&queue, |items| {
        items.iter().any(|i| i.status == ItemStatus::Active)
    })
    .await;
    assert_eq!(status_of(&queue, "f-2"), ItemStatus::Pending);

    // The engine finishes the first job; the freed slot admits the second.
    engine.complete("job-f-1");
    gate.add_permits(10);
    wait_for(&queue, |items| {
        items.iter().any(|i| i.id == "f-1" && i.status == ItemStatus::Completed)
    })
    .await;
    wait_for(&queue, |items| {
        items.iter().any(|i| i.id == "f-2" && i.status.is_in_flight())
    })
    .await;

    engine.complete("job-f-2");
    engine.complete("job-f-3");
    wait_for(&queue, |items| {
        items.iter().all(|i| i.status == ItemStatus::Completed)
    })
    .await;

    assert_eq!(
        engine.submitted_urls(),
        vec![
            "https://cdn.test/f-1",
            "https://cdn.test/f-2",
            "https://cdn.test/f-3",
        ],
        "admission must be FIFO"
    );

    queue.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn in_flight_count_never_exceeds_limit() {
    let resolver = Arc::new(FlowResolver::default());
    let gate = resolver.gate_resolutions();
    let engine = Arc::new(FlowEngine::default());
    let queue = queue_over(Arc::clone(&resolver), Arc::clone(&engine), 2);

    queue.enqueue(&files(6), &template(), None);
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    // Sample the invariant while the queue churns through the backlog.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    let mut saw_in_flight = false;
    while tokio::time::Instant::now() < deadline {
        let in_flight = queue
            .items()
            .iter()
            .filter(|i| i.status.is_in_flight())
            .count();
        assert!(in_flight <= 2, "concurrency bound violated: {in_flight} in flight");
        saw_in_flight |= in_flight > 0;
        if queue.items().iter().all(|i| i.status.is_terminal()) {
            break;
        }
        // Let one more item through now and then.
        gate.add_permits(1);
        for item in queue.items() {
            if item.status == ItemStatus::Active {
                engine.complete(&format!("job-{}", item.id));
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(saw_in_flight, "queue never made progress");

    queue.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn rejected_resolution_fails_item_without_submission() {
    let resolver = Arc::new(FlowResolver::default());
    resolver.reject("f-1", Some("expired"));
    let engine = Arc::new(FlowEngine::default());
    let queue = queue_over(resolver, Arc::clone(&engine), 1);

    queue.enqueue(&files(1), &template(), None);
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    wait_for(&queue, |items| {
        items.iter().all(|i| i.status == ItemStatus::Failed)
    })
    .await;

    let item = queue.items().into_iter().next().unwrap();
    assert_eq!(item.last_error.as_deref(), Some("expired"));
    assert!(item.engine_handle.is_none());
    assert!(engine.submitted_urls().is_empty(), "no engine call after rejection");

    queue.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn removing_active_item_cancels_engine_job() {
    let resolver = Arc::new(FlowResolver::default());
    let engine = Arc::new(FlowEngine::default());
    let queue = queue_over(resolver, Arc::clone(&engine), 1);

    queue.enqueue(&files(1), &template(), None);
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    wait_for(&queue, |items| {
        items
            .iter()
            .any(|i| i.status == ItemStatus::Active && i.engine_handle.is_some())
    })
    .await;

    assert!(queue.remove("f-1").await);
    assert!(queue.items().is_empty());
    assert_eq!(engine.cancelled(), vec!["job-f-1".to_string()]);

    queue.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn removal_succeeds_even_when_engine_cancel_fails() {
    let resolver = Arc::new(FlowResolver::default());
    let engine = Arc::new(FlowEngine::default());
    engine.cancel_fails.store(true, Ordering::SeqCst);
    let queue = queue_over(resolver, Arc::clone(&engine), 1);

    queue.enqueue(&files(1), &template(), None);
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    wait_for(&queue, |items| {
        items
            .iter()
            .any(|i| i.status == ItemStatus::Active && i.engine_handle.is_some())
    })
    .await;

    assert!(queue.remove("f-1").await, "removal proceeds despite cancel failure");
    assert!(queue.items().is_empty());
    assert_eq!(engine.cancelled().len(), 1, "cancel was attempted");

    queue.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn engine_side_removal_cancels_item_with_default_message() {
    let resolver = Arc::new(FlowResolver::default());
    let engine = Arc::new(FlowEngine::default());
    let queue = queue_over(resolver, Arc::clone(&engine), 1);

    queue.enqueue(&files(1), &template(), None);
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    wait_for(&queue, |items| {
        items.iter().any(|i| i.engine_handle.is_some())
    })
    .await;

    engine.set_status(
        "job-f-1",
        JobStatus {
            state: JobState::Removed,
            bytes_downloaded: 0,
            bytes_total: 0,
            speed_bps: 0,
            error_message: None,
        },
    );

    wait_for(&queue, |items| {
        items.iter().all(|i| i.status == ItemStatus::Cancelled)
    })
    .await;
    let item = queue.items().into_iter().next().unwrap();
    assert_eq!(item.last_error.as_deref(), Some("Cancelled"));

    queue.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn poll_failure_for_one_item_leaves_others_tracked() {
    let resolver = Arc::new(FlowResolver::default());
    let engine = Arc::new(FlowEngine::default());
    let queue = queue_over(resolver, Arc::clone(&engine), 2);

    queue.enqueue(&files(2), &template(), None);
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    wait_for(&queue, |items| {
        items.iter().filter(|i| i.engine_handle.is_some()).count() == 2
    })
    .await;

    engine
        .poll_failures
        .lock()
        .unwrap()
        .insert("job-f-1".to_string());
    engine.complete("job-f-2");

    wait_for(&queue, |items| {
        items.iter().any(|i| i.id == "f-2" && i.status == ItemStatus::Completed)
    })
    .await;
    assert_eq!(
        status_of(&queue, "f-1"),
        ItemStatus::Active,
        "poll failure leaves the item tracked for the next tick"
    );

    queue.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn pausing_stops_admissions_but_not_status_tracking() {
    let resolver = Arc::new(FlowResolver::default());
    let engine = Arc::new(FlowEngine::default());
    let queue = queue_over(resolver, Arc::clone(&engine), 1);

    queue.enqueue(&files(2), &template(), None);
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    wait_for(&queue, |items| {
        items.iter().any(|i| i.status == ItemStatus::Active)
    })
    .await;

    queue.pause();
    engine.complete("job-f-1");

    // The in-flight item still completes while paused...
    wait_for(&queue, |items| {
        items.iter().any(|i| i.id == "f-1" && i.status == ItemStatus::Completed)
    })
    .await;
    // ...but the freed slot admits nothing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(status_of(&queue, "f-2"), ItemStatus::Pending);

    queue.start();
    engine.complete("job-f-2");
    wait_for(&queue, |items| {
        items.iter().all(|i| i.status == ItemStatus::Completed)
    })
    .await;

    queue.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn target_directory_override_reaches_engine_submission() {
    let resolver = Arc::new(FlowResolver::default());
    let engine = Arc::new(FlowEngine::default());
    let queue = queue_over(resolver, Arc::clone(&engine), 1);

    let target = tempfile::tempdir().unwrap();
    queue.enqueue(&files(1), &template(), Some(target.path().to_path_buf()));
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    wait_for(&queue, |items| {
        items.iter().any(|i| i.engine_handle.is_some())
    })
    .await;

    let submissions = engine.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].1.as_deref(), Some(target.path()));
    assert_eq!(submissions[0].2.as_deref(), Some("file-1.bin"));

    queue.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn clearing_finished_work_preserves_in_flight_items() {
    let resolver = Arc::new(FlowResolver::default());
    resolver.reject("f-2", None);
    let engine = Arc::new(FlowEngine::default());
    let queue = queue_over(resolver, Arc::clone(&engine), 3);

    queue.enqueue(&files(4), &template(), None);
    queue.start();
    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    engine.complete("job-f-1");
    wait_for(&queue, |items| {
        items.iter().any(|i| i.id == "f-1" && i.status == ItemStatus::Completed)
            && items.iter().any(|i| i.id == "f-2" && i.status == ItemStatus::Failed)
            && items.iter().any(|i| i.id == "f-3" && i.status == ItemStatus::Active)
    })
    .await;

    queue.pause();
    assert_eq!(queue.clear_completed(), 1);
    let removed = queue.retain_in_flight();
    assert!(removed >= 1, "failed and pending items are dropped");
    assert!(
        queue
            .items()
            .iter()
            .all(|i| i.status.is_in_flight()),
        "only in-flight work survives a queue clear"
    );

    queue.shutdown();
    runner.await.unwrap();
}
