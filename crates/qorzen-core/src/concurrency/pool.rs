//! Fixed-size worker pools over plain OS threads.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::handle::{JobHandle, panic_message};
use crate::foundation::error::JobError;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    queue: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    shutdown: AtomicBool,
}

/// A fixed set of worker threads draining a shared FIFO.
///
/// Jobs are popped in submission order, so equal-priority work dispatched
/// here starts in FIFO order. Workers drain the remaining queue before
/// exiting on shutdown.
pub struct WorkerPool {
    name: &'static str,
    workers: usize,
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Creates a pool; threads start on [`start`](Self::start).
    pub fn new(name: &'static str, workers: usize) -> Self {
        Self {
            name,
            workers: workers.max(1),
            shared: Arc::new(PoolShared {
                queue: Mutex::new(VecDeque::new()),
                condvar: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Returns the configured worker count.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawns the worker threads.
    pub fn start(&self) {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return;
        }
        for index in 0..self.workers {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", self.name))
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn pool worker");
            threads.push(handle);
        }
        debug!(pool = self.name, workers = self.workers, "Worker pool started");
    }

    /// Submits a job. The closure receives the job's cancellation token for
    /// cooperative polling.
    pub fn submit<F, T>(&self, f: F) -> JobHandle<T>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let (sender, receiver) = oneshot::channel();

        if self.shared.shutdown.load(Ordering::Acquire) {
            let _ = sender.send(Err(JobError::PoolClosed));
            return JobHandle::new(token, receiver);
        }

        let job_token = token.clone();
        let job: Job = Box::new(move || {
            if job_token.is_cancelled() {
                let _ = sender.send(Err(JobError::Cancelled));
                return;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| f(&job_token)));
            let result = match outcome {
                Ok(value) => Ok(value),
                Err(payload) => Err(JobError::Panicked(panic_message(payload))),
            };
            let _ = sender.send(result);
        });

        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(job);
        }
        self.shared.condvar.notify_one();

        JobHandle::new(token, receiver)
    }

    /// Number of jobs waiting to start.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Signals shutdown and joins the worker threads. Queued jobs are drained
    /// first.
    pub fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.condvar.notify_all();
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
        debug!(pool = self.name, "Worker pool stopped");
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break Some(job);
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                shared.condvar.wait(&mut queue);
            }
        };
        match job {
            Some(job) => job(),
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_and_return_values() {
        let pool = WorkerPool::new("test", 2);
        pool.start();

        let handle = pool.submit(|_| 2 + 2);
        assert_eq!(handle.join().await.unwrap(), 4);
        pool.stop();
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_job() {
        let pool = WorkerPool::new("test", 1);
        pool.start();

        // Occupy the only worker so the second job stays queued.
        let gate = Arc::new(AtomicBool::new(false));
        let release = Arc::clone(&gate);
        let blocker = pool.submit(move |_| {
            while !release.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
        });

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let queued = pool.submit(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        queued.cancel();
        gate.store(true, Ordering::Release);

        assert!(matches!(queued.join().await, Err(JobError::Cancelled)));
        blocker.join().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        pool.stop();
    }

    #[tokio::test]
    async fn test_running_job_observes_token() {
        let pool = WorkerPool::new("test", 1);
        pool.start();

        let handle = pool.submit(|token: &CancellationToken| {
            let mut iterations = 0u32;
            while !token.is_cancelled() && iterations < 10_000 {
                iterations += 1;
                thread::sleep(Duration::from_millis(1));
            }
            token.is_cancelled()
        });

        thread::sleep(Duration::from_millis(10));
        handle.cancel();
        assert!(handle.join().await.unwrap());
        pool.stop();
    }

    #[tokio::test]
    async fn test_panic_becomes_job_error() {
        let pool = WorkerPool::new("test", 1);
        pool.start();

        let handle = pool.submit(|_| -> () { panic!("worker exploded") });
        match handle.join().await {
            Err(JobError::Panicked(message)) => assert!(message.contains("exploded")),
            other => panic!("expected panic error, got {other:?}"),
        }

        // The worker survives the panic.
        let handle = pool.submit(|_| 1);
        assert_eq!(handle.join().await.unwrap(), 1);
        pool.stop();
    }

    #[tokio::test]
    async fn test_submit_after_stop_fails() {
        let pool = WorkerPool::new("test", 1);
        pool.start();
        pool.stop();

        let handle = pool.submit(|_| 1);
        assert!(matches!(handle.join().await, Err(JobError::PoolClosed)));
    }
}
