//! Worker threads with explicit thread switching
//!
//! Every store and serializer is pinned to one worker thread at construction.
//! Work reaches it through `ThreadPool::run_on`, which ships a closure to the
//! target thread and suspends the caller until the result comes back. Nothing
//! is shared across workers except what such closures hand off.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::cell::Cell;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Worker thread index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub usize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// The target worker is gone (pool shut down or the task panicked)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("worker thread {0} is not running")]
pub struct ThreadPoolClosed(pub ThreadId);

type Task = Box<dyn FnOnce() + Send + 'static>;

enum WorkerRequest {
    Run(Task),
    Shutdown,
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Fixed set of worker threads plus the round-robin placement counter
pub struct ThreadPool {
    senders: Vec<Sender<WorkerRequest>>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    next_thread: AtomicUsize,
}

impl ThreadPool {
    /// Spawn `count` worker threads (at least one)
    pub fn new(count: usize) -> std::io::Result<Self> {
        let count = count.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = crossbeam_channel::unbounded();
            let handle = thread::Builder::new()
                .name(format!("nk-worker-{}", index))
                .spawn(move || worker_loop(index, rx))?;
            senders.push(tx);
            handles.push(handle);
        }
        debug!(threads = count, "Worker pool started");
        Ok(Self {
            senders,
            handles: Mutex::new(handles),
            next_thread: AtomicUsize::new(0),
        })
    }

    pub fn thread_count(&self) -> usize {
        self.senders.len()
    }

    /// Pick the next thread in round-robin order
    pub fn pick_thread(&self) -> ThreadId {
        let n = self.next_thread.fetch_add(1, Ordering::Relaxed);
        ThreadId(n % self.senders.len())
    }

    /// Worker the calling code is running on, if any
    pub fn current_thread() -> Option<ThreadId> {
        CURRENT_WORKER.with(|c| c.get()).map(ThreadId)
    }

    /// Run `f` on `thread` and wait for its result
    pub async fn run_on<F, R>(&self, thread: ThreadId, f: F) -> Result<R, ThreadPoolClosed>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let sender = self
            .senders
            .get(thread.0)
            .ok_or(ThreadPoolClosed(thread))?;
        let (tx, rx) = oneshot::channel();
        let task: Task = Box::new(move || {
            let _ = tx.send(f());
        });
        sender
            .send(WorkerRequest::Run(task))
            .map_err(|_| ThreadPoolClosed(thread))?;
        rx.await.map_err(|_| ThreadPoolClosed(thread))
    }

    /// Stop all workers after they drain queued work
    pub fn shutdown(&self) {
        for sender in &self.senders {
            let _ = sender.send(WorkerRequest::Shutdown);
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("Worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, rx: Receiver<WorkerRequest>) {
    CURRENT_WORKER.with(|c| c.set(Some(index)));
    while let Ok(request) = rx.recv() {
        match request {
            WorkerRequest::Run(task) => {
                // The caller sees its reply channel close; the worker keeps going
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    error!(worker = index, panic = panic_message(&*payload), "Worker task panicked");
                }
            }
            WorkerRequest::Shutdown => break,
        }
    }
    debug!(worker = index, "Worker thread exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_on_executes_on_target_thread() {
        let pool = ThreadPool::new(3).unwrap();
        for i in 0..3 {
            let seen = pool
                .run_on(ThreadId(i), ThreadPool::current_thread)
                .await
                .unwrap();
            assert_eq!(seen, Some(ThreadId(i)));
        }
        assert_eq!(ThreadPool::current_thread(), None);
    }

    #[tokio::test]
    async fn test_pick_thread_round_robin() {
        let pool = ThreadPool::new(2).unwrap();
        let picks: Vec<_> = (0..4).map(|_| pool.pick_thread().0).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[tokio::test]
    async fn test_worker_survives_task_panic() {
        let pool = ThreadPool::new(1).unwrap();
        let result = pool.run_on(ThreadId(0), || -> u32 { panic!("task failed") }).await;
        assert_eq!(result, Err(ThreadPoolClosed(ThreadId(0))));

        let seen = pool.run_on(ThreadId(0), ThreadPool::current_thread).await;
        assert_eq!(seen, Ok(Some(ThreadId(0))));
    }

    #[tokio::test]
    async fn test_run_on_after_shutdown_fails() {
        let pool = ThreadPool::new(1).unwrap();
        pool.shutdown();
        let result = pool.run_on(ThreadId(0), || 1).await;
        assert_eq!(result, Err(ThreadPoolClosed(ThreadId(0))));
    }
}
