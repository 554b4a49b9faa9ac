//! Plugin isolation.
//!
//! Three modes:
//!
//! - **None** — in-process; calls run on the caller, serialized by a mutex.
//! - **Thread** — a dedicated worker thread per plugin. Every host call is
//!   marshalled through the plugin's queue and answered over a reply
//!   channel, so no two calls into the plugin are ever concurrent.
//! - **Process** — accepted for forward compatibility; treated as Thread
//!   (a separate-process sandbox is optional and not built).
//!
//! Resource limits are advisory: the host's monitor reports usage, and a
//! breach raises [`IsolationError::LimitBreached`], which the plugin manager
//! turns into a `Failed` state.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tracing::{debug, warn};

use crate::entry::{EntryFactory, PluginRuntimeContext};

/// The mechanism separating a plugin from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// In-process, shared with the host.
    None,
    /// Dedicated worker thread per plugin.
    #[default]
    Thread,
    /// Separate process. Not built; behaves as `Thread`.
    Process,
}

/// Advisory per-plugin resource ceilings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes.
    pub memory_bytes: Option<u64>,
    /// CPU share in `[0.0, 1.0]`.
    pub cpu_share: Option<f64>,
    /// Open file budget.
    pub open_files: Option<u32>,
    /// Thread budget.
    pub threads: Option<u32>,
}

/// A usage sample reported by the host's monitor.
#[derive(Debug, Clone, Default)]
pub struct ResourceUsage {
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// CPU share in `[0.0, 1.0]`.
    pub cpu_share: f64,
    /// Open files.
    pub open_files: u32,
    /// Threads.
    pub threads: u32,
}

/// Errors from the isolation layer.
#[derive(Debug, Clone, Error)]
pub enum IsolationError {
    /// A resource limit was breached; the plugin transitions to `Failed`.
    #[error("plugin '{plugin}' breached {resource} limit ({used} > {limit})")]
    LimitBreached {
        /// The offending plugin.
        plugin: String,
        /// Which resource.
        resource: &'static str,
        /// The configured ceiling.
        limit: u64,
        /// The observed usage.
        used: u64,
    },

    /// The call did not complete within its timeout; the pending call is
    /// abandoned.
    #[error("plugin '{plugin}' call '{method}' timed out after {timeout_ms}ms")]
    CallTimeout {
        /// The plugin.
        plugin: String,
        /// The invoked method.
        method: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The plugin's worker is gone (panicked or shut down).
    #[error("plugin '{plugin}' worker is not available")]
    WorkerGone {
        /// The plugin.
        plugin: String,
    },

    /// The method itself returned an error across the isolation boundary.
    #[error("plugin '{plugin}' method '{method}' failed: {message}")]
    MethodFailed {
        /// The plugin.
        plugin: String,
        /// The invoked method.
        method: String,
        /// The plugin-side error, stringified.
        message: String,
    },
}

impl ResourceLimits {
    /// Checks a usage sample against the limits.
    pub fn check(&self, plugin: &str, usage: &ResourceUsage) -> Result<(), IsolationError> {
        if let Some(limit) = self.memory_bytes
            && usage.memory_bytes > limit
        {
            return Err(IsolationError::LimitBreached {
                plugin: plugin.to_string(),
                resource: "memory",
                limit,
                used: usage.memory_bytes,
            });
        }
        if let Some(limit) = self.open_files
            && usage.open_files > limit
        {
            return Err(IsolationError::LimitBreached {
                plugin: plugin.to_string(),
                resource: "open_files",
                limit: limit as u64,
                used: usage.open_files as u64,
            });
        }
        if let Some(limit) = self.threads
            && usage.threads > limit
        {
            return Err(IsolationError::LimitBreached {
                plugin: plugin.to_string(),
                resource: "threads",
                limit: limit as u64,
                used: usage.threads as u64,
            });
        }
        if let Some(limit) = self.cpu_share
            && usage.cpu_share > limit
        {
            return Err(IsolationError::LimitBreached {
                plugin: plugin.to_string(),
                resource: "cpu",
                limit: (limit * 100.0) as u64,
                used: (usage.cpu_share * 100.0) as u64,
            });
        }
        Ok(())
    }
}

// =============================================================================
// PluginCell
// =============================================================================

enum CellRequest {
    Load(
        PluginRuntimeContext,
        oneshot::Sender<Result<(), String>>,
    ),
    Call {
        method: String,
        args: Value,
        reply: oneshot::Sender<Result<Value, String>>,
    },
    Unload(oneshot::Sender<Result<(), String>>),
}

enum CellInner {
    InProcess(AsyncMutex<Box<dyn crate::entry::PluginEntry>>),
    Threaded {
        sender: mpsc::UnboundedSender<CellRequest>,
        thread: parking_lot::Mutex<Option<std::thread::JoinHandle<()>>>,
    },
}

/// The isolation wrapper around one loaded plugin instance.
///
/// Calls through the cell are strictly serialized regardless of mode. In
/// `None` mode timeouts apply only while waiting for the serialization lock
/// (the plugin shares the host and cannot be preempted); in `Thread` mode a
/// timeout abandons the marshalled call.
pub struct PluginCell {
    plugin: String,
    mode: IsolationMode,
    limits: ResourceLimits,
    inner: CellInner,
}

impl PluginCell {
    /// Creates the cell, instantiating the entry via `factory`. In thread
    /// isolation the entry is constructed on the plugin's own thread.
    pub fn spawn(
        plugin: impl Into<String>,
        factory: EntryFactory,
        mode: IsolationMode,
        limits: ResourceLimits,
    ) -> Self {
        let plugin = plugin.into();
        let inner = match mode {
            IsolationMode::None => CellInner::InProcess(AsyncMutex::new(factory())),
            // Process isolation is not built; a dedicated thread is the
            // strongest sandbox available here.
            IsolationMode::Thread | IsolationMode::Process => {
                let (sender, receiver) = mpsc::unbounded_channel();
                let thread_name = format!("plugin-{plugin}");
                let handle = std::thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || cell_worker(factory, receiver))
                    .expect("failed to spawn plugin worker thread");
                CellInner::Threaded {
                    sender,
                    thread: parking_lot::Mutex::new(Some(handle)),
                }
            }
        };
        Self {
            plugin,
            mode,
            limits,
            inner,
        }
    }

    /// The isolation mode in effect.
    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    /// Checks a monitor sample against this plugin's limits.
    pub fn check_limits(&self, usage: &ResourceUsage) -> Result<(), IsolationError> {
        self.limits.check(&self.plugin, usage)
    }

    /// Runs the entry's `on_load`.
    pub async fn load(&self, ctx: PluginRuntimeContext) -> Result<(), IsolationError> {
        match &self.inner {
            CellInner::InProcess(entry) => {
                let mut entry = entry.lock().await;
                entry.on_load(&ctx).map_err(|e| IsolationError::MethodFailed {
                    plugin: self.plugin.clone(),
                    method: "on_load".to_string(),
                    message: e.to_string(),
                })
            }
            CellInner::Threaded { sender, .. } => {
                let (reply_tx, reply_rx) = oneshot::channel();
                sender
                    .send(CellRequest::Load(ctx, reply_tx))
                    .map_err(|_| IsolationError::WorkerGone {
                        plugin: self.plugin.clone(),
                    })?;
                let result = reply_rx.await.map_err(|_| IsolationError::WorkerGone {
                    plugin: self.plugin.clone(),
                })?;
                result.map_err(|message| IsolationError::MethodFailed {
                    plugin: self.plugin.clone(),
                    method: "on_load".to_string(),
                    message,
                })
            }
        }
    }

    /// Invokes a plugin method with an optional timeout.
    pub async fn run_method(
        &self,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, IsolationError> {
        match &self.inner {
            CellInner::InProcess(entry) => {
                let mut entry = match timeout {
                    Some(timeout) => tokio::time::timeout(timeout, entry.lock())
                        .await
                        .map_err(|_| IsolationError::CallTimeout {
                            plugin: self.plugin.clone(),
                            method: method.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        })?,
                    None => entry.lock().await,
                };
                entry
                    .call(method, args)
                    .map_err(|e| IsolationError::MethodFailed {
                        plugin: self.plugin.clone(),
                        method: method.to_string(),
                        message: e.to_string(),
                    })
            }
            CellInner::Threaded { sender, .. } => {
                let (reply_tx, reply_rx) = oneshot::channel();
                sender
                    .send(CellRequest::Call {
                        method: method.to_string(),
                        args,
                        reply: reply_tx,
                    })
                    .map_err(|_| IsolationError::WorkerGone {
                        plugin: self.plugin.clone(),
                    })?;

                let reply = match timeout {
                    Some(timeout) => {
                        match tokio::time::timeout(timeout, reply_rx).await {
                            Ok(reply) => reply,
                            Err(_) => {
                                // Dropping the receiver abandons the pending
                                // call; the worker's eventual reply goes
                                // nowhere.
                                warn!(plugin = %self.plugin, method, "Plugin call timed out");
                                return Err(IsolationError::CallTimeout {
                                    plugin: self.plugin.clone(),
                                    method: method.to_string(),
                                    timeout_ms: timeout.as_millis() as u64,
                                });
                            }
                        }
                    }
                    None => reply_rx.await,
                };
                let result = reply.map_err(|_| IsolationError::WorkerGone {
                    plugin: self.plugin.clone(),
                })?;
                result.map_err(|message| IsolationError::MethodFailed {
                    plugin: self.plugin.clone(),
                    method: method.to_string(),
                    message,
                })
            }
        }
    }

    /// Runs the entry's `on_unload` and, in thread isolation, stops the
    /// worker thread.
    pub async fn unload(&self) -> Result<(), IsolationError> {
        match &self.inner {
            CellInner::InProcess(entry) => {
                let mut entry = entry.lock().await;
                entry
                    .on_unload()
                    .map_err(|e| IsolationError::MethodFailed {
                        plugin: self.plugin.clone(),
                        method: "on_unload".to_string(),
                        message: e.to_string(),
                    })
            }
            CellInner::Threaded { sender, thread } => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let result = match sender.send(CellRequest::Unload(reply_tx)) {
                    Ok(()) => reply_rx
                        .await
                        .unwrap_or_else(|_| Err("worker exited".to_string())),
                    Err(_) => Err("worker exited".to_string()),
                };
                // The worker exits right after answering; the join is brief.
                if let Some(handle) = thread.lock().take() {
                    let _ = handle.join();
                }
                debug!(plugin = %self.plugin, "Plugin worker stopped");
                result.map_err(|message| IsolationError::MethodFailed {
                    plugin: self.plugin.clone(),
                    method: "on_unload".to_string(),
                    message,
                })
            }
        }
    }
}

fn cell_worker(factory: EntryFactory, mut receiver: mpsc::UnboundedReceiver<CellRequest>) {
    let mut entry = factory();
    while let Some(request) = receiver.blocking_recv() {
        match request {
            CellRequest::Load(ctx, reply) => {
                let result = entry.on_load(&ctx).map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            CellRequest::Call {
                method,
                args,
                reply,
            } => {
                let result = entry.call(&method, args).map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            CellRequest::Unload(reply) => {
                let result = entry.on_unload().map_err(|e| e.to_string());
                let _ = reply.send(result);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PluginEntry;
    use qorzen_core::foundation::BoxError;
    use serde_json::json;

    struct Probe {
        loaded: bool,
        calls: u32,
    }

    impl PluginEntry for Probe {
        fn on_load(&mut self, _ctx: &PluginRuntimeContext) -> Result<(), BoxError> {
            self.loaded = true;
            Ok(())
        }

        fn call(&mut self, method: &str, args: Value) -> Result<Value, BoxError> {
            self.calls += 1;
            match method {
                "echo" => Ok(args),
                "count" => Ok(json!(self.calls)),
                "sleep" => {
                    std::thread::sleep(Duration::from_millis(
                        args.as_u64().unwrap_or(50),
                    ));
                    Ok(Value::Null)
                }
                _ => Err(format!("no such method '{method}'").into()),
            }
        }
    }

    fn probe_factory() -> Box<dyn PluginEntry> {
        Box::new(Probe {
            loaded: false,
            calls: 0,
        })
    }

    fn cell(mode: IsolationMode) -> PluginCell {
        PluginCell::spawn("probe", probe_factory, mode, ResourceLimits::default())
    }

    #[tokio::test]
    async fn test_thread_cell_echoes() {
        let cell = cell(IsolationMode::Thread);
        let result = cell
            .run_method("echo", json!({"x": 1}), None)
            .await
            .unwrap();
        assert_eq!(result, json!({"x": 1}));
        cell.unload().await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_are_serialized() {
        let cell = Arc::new(cell(IsolationMode::Thread));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let cell = Arc::clone(&cell);
            handles.push(tokio::spawn(async move {
                cell.run_method("count", Value::Null, None).await.unwrap()
            }));
        }
        let mut counts: Vec<u64> = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().as_u64().unwrap());
        }
        counts.sort_unstable();
        // Every call saw a distinct counter value: no two were concurrent.
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        cell.unload().await.unwrap();
    }

    #[tokio::test]
    async fn test_method_error_crosses_boundary() {
        let cell = cell(IsolationMode::Thread);
        let err = cell
            .run_method("missing", Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IsolationError::MethodFailed { .. }));
        cell.unload().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_abandons_call() {
        let cell = cell(IsolationMode::Thread);
        let err = cell
            .run_method("sleep", json!(200), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, IsolationError::CallTimeout { .. }));
        cell.unload().await.unwrap();
    }

    #[tokio::test]
    async fn test_in_process_mode() {
        let cell = cell(IsolationMode::None);
        assert_eq!(cell.mode(), IsolationMode::None);
        let result = cell.run_method("echo", json!(7), None).await.unwrap();
        assert_eq!(result, json!(7));
        cell.unload().await.unwrap();
    }

    #[test]
    fn test_limit_check() {
        let limits = ResourceLimits {
            memory_bytes: Some(1024),
            threads: Some(4),
            ..Default::default()
        };
        assert!(limits
            .check(
                "probe",
                &ResourceUsage {
                    memory_bytes: 512,
                    threads: 2,
                    ..Default::default()
                }
            )
            .is_ok());
        let err = limits
            .check(
                "probe",
                &ResourceUsage {
                    memory_bytes: 4096,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            IsolationError::LimitBreached { resource: "memory", .. }
        ));
    }
}
