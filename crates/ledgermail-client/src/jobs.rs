//! Serial job queue with an on-demand supervisor task.
//!
//! Pipeline stages process one message at a time: ids are queued here
//! and a single supervisor drains them in order. The supervisor is
//! spawned lazily when a job arrives and none is running, and
//! deregisters itself under the worker lock so a job enqueued during
//! its final empty-check is never stranded.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use ledgermail_types::MessageId;
use tokio::task::JoinHandle;

/// A serial queue of message ids with at most one live supervisor.
pub(crate) struct JobQueue {
    /// Queue name for logs.
    name: &'static str,
    jobs: Mutex<VecDeque<MessageId>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub(crate) fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            jobs: Mutex::new(VecDeque::new()),
            worker: Mutex::new(None),
        })
    }

    /// Enqueues a job and starts a supervisor if none is running.
    ///
    /// `run` processes one job; it is invoked for every queued id until
    /// the queue drains, yielding to the executor between jobs.
    pub(crate) fn schedule<F, Fut>(self: Arc<Self>, id: MessageId, run: F)
    where
        F: Fn(MessageId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        lock(&self.jobs).push_back(id);

        let mut worker = lock(&self.worker);
        if worker.is_some() {
            // A live supervisor will pick the job up; it only exits
            // after re-checking the queue under this lock.
            return;
        }

        let queue = Arc::clone(&self);
        *worker = Some(tokio::spawn(async move {
            queue.drain(run).await;
        }));
    }

    async fn drain<F, Fut>(self: Arc<Self>, run: F)
    where
        F: Fn(MessageId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        loop {
            let next = lock(&self.jobs).pop_front();
            match next {
                Some(id) => {
                    tracing::debug!(queue = self.name, %id, "job picked up");
                    run(id).await;
                    tokio::task::yield_now().await;
                }
                None => {
                    let mut worker = lock(&self.worker);
                    if lock(&self.jobs).is_empty() {
                        *worker = None;
                        return;
                    }
                    // A job slipped in between the pop and the lock;
                    // keep draining.
                }
            }
        }
    }

    /// Aborts the supervisor, if one is running. Queued jobs stay
    /// queued; recovery re-dispatches them from the store on reopen.
    pub(crate) fn abort(&self) {
        if let Some(handle) = lock(&self.worker).take() {
            handle.abort();
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn id(byte: u8) -> MessageId {
        MessageId::new([byte; 20])
    }

    #[tokio::test]
    async fn drains_jobs_in_order() {
        let queue = JobQueue::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for byte in 1u8..=3 {
            let seen = Arc::clone(&seen);
            Arc::clone(&queue).schedule(id(byte), move |job| {
                let seen = Arc::clone(&seen);
                async move {
                    lock(&seen).push(job);
                }
            });
        }

        // Poll until the queue goes idle.
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if lock(&seen).len() == 3 {
                break;
            }
        }
        assert_eq!(*lock(&seen), vec![id(1), id(2), id(3)]);
    }

    #[tokio::test]
    async fn supervisor_restarts_after_drain() {
        let queue = JobQueue::new("test");
        let count = Arc::new(AtomicU32::new(0));

        let schedule = |byte: u8| {
            let count = Arc::clone(&count);
            Arc::clone(&queue).schedule(id(byte), move |_| {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });
        };

        schedule(1);
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
        }

        schedule(2);
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if count.load(Ordering::SeqCst) == 2 {
                break;
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
