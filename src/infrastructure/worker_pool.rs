//! Worker Pool
//!
//! A fixed number of long-lived workers draining a bounded job queue,
//! with graceful drain on stop.

use crate::domain::context::QueryContext;
use crate::domain::errors::QueryError;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

/// Queue slots per worker.
pub const QUEUE_SLOTS_PER_WORKER: usize = 10;

/// Executes jobs pulled off the queue.
#[async_trait]
pub trait JobHandler<J>: Send + Sync {
    async fn handle(&self, job: J);
}

/// Pool of workers consuming jobs of type `J`.
pub struct WorkerPool<J> {
    name: String,
    concurrency: usize,
    queue: Mutex<Option<mpsc::Sender<J>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    live_workers: Arc<AtomicUsize>,
    /// Signalled when the last worker exits.
    drained: Arc<Notify>,
}

impl<J: Send + 'static> WorkerPool<J> {
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency: concurrency.max(1),
            queue: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            live_workers: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn queue_capacity(&self) -> usize {
        self.concurrency * QUEUE_SLOTS_PER_WORKER
    }

    /// Number of workers that have not exited yet.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.queue.lock().is_some()
    }

    /// Launch the workers. Calling `start` on a running pool is a no-op.
    pub fn start(&self, handler: Arc<dyn JobHandler<J>>) {
        let mut queue = self.queue.lock();
        if queue.is_some() {
            return;
        }

        tracing::info!("starting {} query workers for {}", self.concurrency, self.name);

        let (tx, rx) = mpsc::channel(self.queue_capacity());
        let rx = Arc::new(AsyncMutex::new(rx));
        let mut workers = self.workers.lock();

        for id in 0..self.concurrency {
            let guard = WorkerGuard::new(self.live_workers.clone(), self.drained.clone());
            let rx = rx.clone();
            let handler = handler.clone();
            let name = self.name.clone();
            workers.push(tokio::spawn(async move {
                let _guard = guard;
                worker_loop(id, &name, rx, handler).await;
            }));
        }

        *queue = Some(tx);
    }

    /// Enqueue a job, waiting for a free slot if the queue is full.
    ///
    /// Gives up when `ctx` is done; fails with [`QueryError::Closed`] when
    /// the pool is not running.
    pub async fn submit(&self, job: J, ctx: &QueryContext) -> Result<(), QueryError> {
        let sender = self.queue.lock().clone().ok_or(QueryError::Closed)?;
        ctx.run(sender.send(job))
            .await?
            .map_err(|_| QueryError::Closed)
    }

    /// Close the queue and wait for every worker to finish its current job,
    /// drain what is queued, and exit.
    ///
    /// Concurrent callers all return only once the last worker is gone.
    pub async fn stop(&self) {
        if let Some(sender) = self.queue.lock().take() {
            drop(sender);
            tracing::info!("stopping query workers for {}", self.name);
        }

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("query worker for {} exited abnormally: {}", self.name, e);
            }
        }

        // Another caller may hold the handles; wait for its workers too.
        self.wait_drained().await;
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.live_workers() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn worker_loop<J>(
    id: usize,
    name: &str,
    rx: Arc<AsyncMutex<mpsc::Receiver<J>>>,
    handler: Arc<dyn JobHandler<J>>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        // A panicking job drops its reply sender; the worker keeps going.
        if AssertUnwindSafe(handler.handle(job)).catch_unwind().await.is_err() {
            tracing::error!("query worker {} for {} panicked while handling a job", id, name);
        }
    }
    tracing::debug!("query worker {} for {} exited", id, name);
}

/// RAII guard for tracking live workers.
///
/// Automatically decrements the worker count when dropped and wakes
/// `stop()` callers once none are left.
struct WorkerGuard {
    live: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl WorkerGuard {
    fn new(live: Arc<AtomicUsize>, drained: Arc<Notify>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { live, drained }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}
