//! The main-thread queue and its host-driven pump.
//!
//! Some hosts own a thread that non-reentrant work (UI toolkits, platform
//! APIs) must run on. The core never owns that thread; it exposes a FIFO the
//! host drains by calling [`MainThreadQueue::pump`] from the designated
//! thread. Headless hosts skip the pump entirely — the concurrency manager
//! routes main-thread jobs to the CPU pool instead.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::handle::{JobHandle, panic_message};
use crate::foundation::error::JobError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// FIFO of callables drained by an external pump.
#[derive(Default)]
pub struct MainThreadQueue {
    queue: Mutex<VecDeque<Job>>,
}

impl MainThreadQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a job for the next pump.
    pub fn submit<F, T>(&self, f: F) -> JobHandle<T>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let (sender, receiver) = oneshot::channel();

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

        self.queue.lock().push_back(job);
        JobHandle::new(token, receiver)
    }

    /// Runs every job queued at the time of the call on the current thread.
    /// Returns the number of jobs executed. Jobs enqueued while pumping wait
    /// for the next pump.
    pub fn pump(&self) -> usize {
        let batch: Vec<Job> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        let count = batch.len();
        for job in batch {
            job();
        }
        count
    }

    /// Number of jobs waiting for the next pump.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}
