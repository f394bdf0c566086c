//! Admission scheduling loop.
//!
//! Reacts to every observable queue change (item list, running flag,
//! concurrency limit) with one scheduling pass. A pass admits at most one
//! pending item; the admission itself counts as a change, so a backlog
//! drains one item at a time and never overshoots the concurrency limit.

use std::sync::Arc;

use tracing::debug;

use super::{QueueInner, driver};

pub(super) async fn run(inner: Arc<QueueInner>) {
    loop {
        if inner.is_shutdown() {
            break;
        }

        if let Some(id) = inner.admit_next() {
            debug!(item_id = %id, "admitted item");
            tokio::spawn(driver::drive(Arc::clone(&inner), id));
            // The admission changed the queue; re-check for a free slot.
            inner.notify_change();
        }

        tokio::select! {
            () = inner.changed.notified() => {}
            () = inner.shutdown_signal.notified() => {}
        }
    }
    debug!("scheduler loop exited");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::item::ItemStatus;
    use crate::test_support::{
        StubEngine, StubResolver, queue_with, sample_files, sample_template, wait_for,
    };

    #[tokio::test]
    async fn test_loop_drains_backlog_up_to_limit() {
        let resolver = Arc::new(StubResolver::default());
        let engine = Arc::new(StubEngine::default());
        let queue = queue_with(Arc::clone(&resolver), Arc::clone(&engine));

        queue.enqueue(&sample_files(4), &sample_template(), None);
        queue.set_concurrency_limit(2).unwrap();
        queue.start();

        let runner = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run().await }
        });

        // Drivers submit immediately; two items become active, two stay pending.
        wait_for(&queue, |items| {
            items
                .iter()
                .filter(|item| item.status == ItemStatus::Active)
                .count()
                == 2
        })
        .await;
        let items = queue.items();
        assert_eq!(
            items
                .iter()
                .filter(|item| item.status == ItemStatus::Pending)
                .count(),
            2
        );

        queue.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_backlog_drains_fifo_as_items_complete() {
        let engine = Arc::new(StubEngine::default());
        engine.complete_all_jobs();
        let queue = queue_with(Arc::new(StubResolver::default()), Arc::clone(&engine));

        queue.enqueue(&sample_files(3), &sample_template(), None);
        queue.set_concurrency_limit(1).unwrap();
        queue.start();

        let runner = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run().await }
        });

        wait_for(&queue, |items| {
            items.iter().all(|item| item.status == ItemStatus::Completed)
        })
        .await;

        // With a limit of 1, submissions are strictly sequential and FIFO.
        let urls: Vec<String> = engine
            .submissions()
            .iter()
            .map(|submit| submit.url.clone())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example.net/f-1",
                "https://cdn.example.net/f-2",
                "https://cdn.example.net/f-3",
            ]
        );

        queue.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_paused_queue_admits_nothing() {
        let queue = queue_with(
            Arc::new(StubResolver::default()),
            Arc::new(StubEngine::default()),
        );
        queue.enqueue(&sample_files(2), &sample_template(), None);

        let runner = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run().await }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(
            queue
                .items()
                .iter()
                .all(|item| item.status == ItemStatus::Pending)
        );

        queue.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_terminates_loop_promptly() {
        let queue = queue_with(
            Arc::new(StubResolver::default()),
            Arc::new(StubEngine::default()),
        );
        let runner = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
    }
}
