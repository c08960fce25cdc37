use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Single-consumer FIFO for background LLM completion. Jobs run strictly in
/// enqueue order; a failing job logs inside itself and never blocks the
/// queue. Explicit start/stop so tests get fresh instances.
pub struct DeferredQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeferredQueue {
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            tracing::debug!("deferred queue drained, consumer exiting");
        });
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Appends a job. Returns false if the queue was already stopped.
    pub fn enqueue(&self, job: impl Future<Output = ()> + Send + 'static) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(Box::pin(job)).is_ok(),
            None => false,
        }
    }

    /// Closes the queue and waits for the consumer to drain.
    pub async fn stop(&self) {
        {
            let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.take();
        }
        let handle = {
            let mut guard = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn jobs_run_serially_in_fifo_order() {
        let queue = DeferredQueue::start();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u64 {
            let order = order.clone();
            queue.enqueue(async move {
                // Later jobs sleep less; serial execution still preserves order.
                tokio::time::sleep(std::time::Duration::from_millis(5 * (5 - i))).await;
                order.lock().unwrap().push(i);
            });
        }
        queue.stop().await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn enqueue_after_stop_is_rejected() {
        let queue = DeferredQueue::start();
        queue.stop().await;
        assert!(!queue.enqueue(async {}));
    }

    #[tokio::test]
    async fn a_failing_job_does_not_block_later_jobs() {
        let queue = DeferredQueue::start();
        let ran = Arc::new(AtomicUsize::new(0));

        queue.enqueue(async {
            // A job whose work failed; it logs and returns.
            tracing::warn!("background completion failed");
        });
        let ran2 = ran.clone();
        queue.enqueue(async move {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        queue.stop().await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
