//! Worker pools, the main-thread pump, and cancellation primitives.
//!
//! The [`ConcurrencyManager`] owns:
//!
//! - a **CPU pool** sized to the logical core count (or configured),
//! - a larger, bounded **I/O pool** for blocking I/O,
//! - the **main-thread queue**, drained by a host pump when present.
//!
//! Every submission returns a [`JobHandle`] carrying a cancellation token.
//! In headless mode (no pump) main-thread jobs run on the CPU pool, so the
//! core behaves identically with or without a host UI thread.

mod handle;
mod main_thread;
mod pool;

pub use handle::JobHandle;
pub use main_thread::MainThreadQueue;
pub use pool::WorkerPool;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::manager::Manager;

/// Concurrency tuning knobs, sourced from the `concurrency` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// CPU pool size; `None` uses the logical core count.
    pub cpu_workers: Option<usize>,
    /// I/O pool size.
    pub io_workers: usize,
    /// Whether a host main-thread pump exists. `false` = headless.
    pub main_thread: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            cpu_workers: None,
            io_workers: 32,
            main_thread: true,
        }
    }
}

fn logical_cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

/// Owner of the worker pools and the main-thread queue.
pub struct ConcurrencyManager {
    cpu: WorkerPool,
    io: WorkerPool,
    main: Arc<MainThreadQueue>,
    main_thread_enabled: bool,
}

impl ConcurrencyManager {
    /// Creates the pools; threads start on [`initialize`](Manager::initialize).
    pub fn new(config: ConcurrencyConfig) -> Self {
        let cpu_workers = config.cpu_workers.unwrap_or_else(logical_cores);
        Self {
            cpu: WorkerPool::new("qorzen-cpu", cpu_workers),
            io: WorkerPool::new("qorzen-io", config.io_workers),
            main: Arc::new(MainThreadQueue::new()),
            main_thread_enabled: config.main_thread,
        }
    }

    /// Runs a compute-bound job on the CPU pool.
    pub fn run_in_thread<F, T>(&self, f: F) -> JobHandle<T>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.cpu.submit(f)
    }

    /// Runs a blocking I/O job on the I/O pool.
    pub fn run_in_io<F, T>(&self, f: F) -> JobHandle<T>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.io.submit(f)
    }

    /// Runs a heavy parallel job. A separate process pool is not built; the
    /// job runs in-process on the CPU pool.
    pub fn run_in_process<F, T>(&self, f: F) -> JobHandle<T>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.cpu.submit(f)
    }

    /// Runs a job on the host main thread at the next pump. Headless mode
    /// routes the job to the CPU pool instead.
    pub fn run_on_main_thread<F, T>(&self, f: F) -> JobHandle<T>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.main_thread_enabled {
            self.main.submit(f)
        } else {
            self.cpu.submit(f)
        }
    }

    /// Drains the main-thread queue on the calling thread. The host calls
    /// this from its designated thread; returns the number of jobs run.
    pub fn pump_main_thread(&self) -> usize {
        self.main.pump()
    }

    /// Whether a main-thread pump is expected.
    pub fn main_thread_enabled(&self) -> bool {
        self.main_thread_enabled
    }

    /// CPU pool worker count.
    pub fn cpu_workers(&self) -> usize {
        self.cpu.workers()
    }

    /// I/O pool worker count.
    pub fn io_workers(&self) -> usize {
        self.io.workers()
    }
}

#[async_trait]
impl Manager for ConcurrencyManager {
    fn name(&self) -> &str {
        "concurrency"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.cpu.start();
        self.io.start();
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        // Joining worker threads blocks; do it off the async runtime.
        tokio::task::block_in_place(|| {
            self.cpu.stop();
            self.io.stop();
        });
        // Run any jobs stranded on the main-thread queue so their handles
        // resolve instead of hanging.
        self.main.pump();
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headless() -> ConcurrencyManager {
        ConcurrencyManager::new(ConcurrencyConfig {
            cpu_workers: Some(2),
            io_workers: 2,
            main_thread: false,
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_headless_main_thread_falls_back_to_cpu() {
        let manager = headless();
        manager.initialize().await.unwrap();

        // No pump is ever called, yet the job completes.
        let handle = manager.run_on_main_thread(|_| "ran");
        assert_eq!(handle.join().await.unwrap(), "ran");

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_main_thread_jobs_wait_for_pump() {
        let manager = ConcurrencyManager::new(ConcurrencyConfig {
            cpu_workers: Some(1),
            io_workers: 1,
            main_thread: true,
        });
        manager.initialize().await.unwrap();

        let handle = manager.run_on_main_thread(|_| 7);
        assert_eq!(manager.pump_main_thread(), 1);
        assert_eq!(handle.join().await.unwrap(), 7);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_io_and_cpu_pools_run_jobs() {
        let manager = headless();
        manager.initialize().await.unwrap();

        let cpu = manager.run_in_thread(|_| 1);
        let io = manager.run_in_io(|_| 2);
        let proc = manager.run_in_process(|_| 3);
        assert_eq!(cpu.join().await.unwrap(), 1);
        assert_eq!(io.join().await.unwrap(), 2);
        assert_eq!(proc.join().await.unwrap(), 3);

        manager.shutdown().await.unwrap();
    }
}
