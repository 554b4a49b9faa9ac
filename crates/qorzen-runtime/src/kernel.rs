//! Kernel orchestration.
//!
//! The [`Kernel`] owns every core manager and the dependency-ordered
//! registry that brings them up and down:
//!
//! ```text
//! config ──► logging ──► event_bus ──► task_scheduler ──► plugin_manager
//!               └──────► concurrency ──────┘      error_handler ──┘
//! ```
//!
//! Bring-up publishes `system/started`; shutdown publishes `system/stopped`
//! and sweeps managers in reverse order. An unabsorbed critical error from
//! the error handler requests the same shutdown sequence.
//!
//! Consumers (and plugins, through their injected handles) look managers up
//! through the kernel by name; nobody holds long-lived direct references.

use std::path::PathBuf;
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;
use semver::Version;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use qorzen_core::bus::{EventBus, EventSink};
use qorzen_core::concurrency::ConcurrencyManager;
use qorzen_core::error_handler::{ErrorHandler, ErrorInfo};
use qorzen_core::foundation::event::Event;
use qorzen_core::foundation::{ConfigAccess, ManagerError, ManagerResult};
use qorzen_core::manager::{Manager, ManagerRegistry, ManagerState};
use qorzen_core::task::TaskScheduler;
use qorzen_framework::entry::{EntryFactory, EntryRegistry};
use qorzen_framework::hooks::{HookFn, HookRegistry};
use qorzen_framework::manager::{PluginManager, PluginManagerConfig};
use qorzen_framework::signing::TrustedKeys;

use crate::config::{ConfigLoader, ConfigService};
use crate::logging::LoggingManager;

/// The running core's version, used for plugin compatibility checks.
pub fn core_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).expect("crate version is valid semver")
}

// =============================================================================
// KernelBuilder
// =============================================================================

/// Builder wiring a [`Kernel`] together.
pub struct KernelBuilder {
    config_file: Option<PathBuf>,
    profile: Option<String>,
    env_prefix: Option<String>,
    headless: bool,
    entries: Arc<EntryRegistry>,
    hooks: Arc<HookRegistry>,
    trusted: Arc<TrustedKeys>,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    /// Creates a builder with empty registries and default config search.
    pub fn new() -> Self {
        Self {
            config_file: None,
            profile: None,
            env_prefix: None,
            headless: false,
            entries: Arc::new(EntryRegistry::new()),
            hooks: Arc::new(HookRegistry::new()),
            trusted: Arc::new(TrustedKeys::new()),
        }
    }

    /// Uses a specific configuration file.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Applies a configuration profile overlay.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Overrides the environment variable prefix (default `QORZEN_`).
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Runs without a host main-thread pump; main-thread work goes to the
    /// CPU pool.
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Registers a plugin entry-point factory.
    pub fn register_entry(self, entry_point: impl Into<String>, factory: EntryFactory) -> Self {
        self.entries.register(entry_point, factory);
        self
    }

    /// Registers a lifecycle hook implementation under its
    /// `module:function` reference.
    pub fn register_hook(self, reference: impl Into<String>, hook: HookFn) -> Self {
        self.hooks.register(reference, hook);
        self
    }

    /// Trusts a plugin signing key.
    pub fn trust_key(self, key: VerifyingKey) -> Self {
        self.trusted.register(key);
        self
    }

    /// Loads configuration, constructs every manager, and wires the graph.
    /// Nothing is initialized yet; call [`Kernel::initialize_all`].
    pub fn build(self) -> anyhow::Result<Kernel> {
        let mut loader = ConfigLoader::default();
        if let Some(file) = self.config_file {
            loader = loader.with_file(file);
        }
        if let Some(profile) = self.profile {
            loader = loader.with_profile(profile);
        }
        if let Some(prefix) = self.env_prefix {
            loader = loader.with_env_prefix(prefix);
        }

        let config = Arc::new(ConfigService::new(loader));
        config.load()?;
        let cfg = config.typed();

        let logging = Arc::new(LoggingManager::new(cfg.logging.clone()));

        let mut concurrency_cfg = cfg.concurrency.clone();
        if self.headless {
            concurrency_cfg.main_thread = false;
        }

        let bus = Arc::new(EventBus::new(cfg.event_bus.clone()));
        let concurrency = Arc::new(ConcurrencyManager::new(concurrency_cfg));
        let scheduler = Arc::new(TaskScheduler::new(
            cfg.tasks.clone(),
            Arc::clone(&concurrency),
        ));
        let errors = Arc::new(ErrorHandler::new());
        let plugins = Arc::new(PluginManager::new(
            PluginManagerConfig {
                plugins_root: cfg.core.plugins_root.clone(),
                search_dirs: cfg.core.plugin_dirs.clone(),
                default_isolation: cfg.core.isolation,
                resource_limits: cfg.core.resource_limits.clone(),
            },
            core_version(),
            Arc::clone(&config) as Arc<dyn ConfigAccess>,
            Arc::clone(&bus),
            Arc::clone(&scheduler),
            self.entries,
            self.hooks,
            self.trusted,
        )?);

        // Cross-component wiring: notification flows through the bus, error
        // routing through the handler.
        let sink = Arc::clone(&bus) as Arc<dyn EventSink>;
        bus.set_error_handler(Arc::clone(&errors));
        errors.set_event_sink(Arc::clone(&sink));
        scheduler.set_event_sink(Arc::clone(&sink));
        config.set_event_sink(Arc::clone(&sink));
        logging.set_event_sink(Arc::clone(&sink));
        plugins.set_error_handler(Arc::clone(&errors));

        let critical = errors.take_critical_receiver();

        let registry = ManagerRegistry::new();
        registry.register(Arc::clone(&config) as Arc<dyn Manager>, vec![])?;
        registry.register(
            Arc::clone(&logging) as Arc<dyn Manager>,
            vec!["config".into()],
        )?;
        registry.register(
            Arc::clone(&bus) as Arc<dyn Manager>,
            vec!["config".into(), "logging".into()],
        )?;
        registry.register(
            Arc::clone(&concurrency) as Arc<dyn Manager>,
            vec!["config".into(), "logging".into()],
        )?;
        registry.register(
            Arc::clone(&scheduler) as Arc<dyn Manager>,
            vec!["concurrency".into(), "event_bus".into()],
        )?;
        registry.register(
            Arc::clone(&errors) as Arc<dyn Manager>,
            vec!["event_bus".into()],
        )?;
        registry.register(
            Arc::clone(&plugins) as Arc<dyn Manager>,
            vec![
                "config".into(),
                "event_bus".into(),
                "task_scheduler".into(),
                "error_handler".into(),
            ],
        )?;

        Ok(Kernel {
            registry,
            config,
            bus,
            concurrency,
            scheduler,
            errors,
            plugins,
            critical: Mutex::new(critical),
        })
    }
}

// =============================================================================
// Kernel
// =============================================================================

/// The assembled core: managers plus the dependency registry.
pub struct Kernel {
    registry: ManagerRegistry,
    config: Arc<ConfigService>,
    bus: Arc<EventBus>,
    concurrency: Arc<ConcurrencyManager>,
    scheduler: Arc<TaskScheduler>,
    errors: Arc<ErrorHandler>,
    plugins: Arc<PluginManager>,
    critical: Mutex<Option<mpsc::UnboundedReceiver<ErrorInfo>>>,
}

impl Kernel {
    /// Starts building a kernel.
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    /// Initializes every manager in dependency order and publishes
    /// `system/started`.
    pub async fn initialize_all(&self) -> ManagerResult<()> {
        self.registry.initialize_all().await?;
        let started = Event::builder("system/started", "kernel")
            .payload_entry("version", core_version().to_string())
            .build();
        if let Err(e) = self.bus.publish(started).await {
            warn!(error = %e, "Could not publish system/started");
        }
        info!("Kernel started");
        Ok(())
    }

    /// Publishes `system/stopped` and shuts every manager down in reverse
    /// order. Best-effort: all errors are collected.
    pub async fn shutdown_all(&self) -> Vec<ManagerError> {
        let stopped = Event::new("system/stopped", "kernel");
        if let Err(e) = self.bus.publish_sync(stopped).await {
            warn!(error = %e, "Could not publish system/stopped");
        }
        let errors = self.registry.shutdown_all().await;
        info!(errors = errors.len(), "Kernel stopped");
        errors
    }

    /// Runs until Ctrl-C, SIGTERM, or an unabsorbed critical error, then
    /// shuts down.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.initialize_all().await?;
        self.wait_for_shutdown().await;
        let errors = self.shutdown_all().await;
        for e in &errors {
            error!(error = %e, "Shutdown error");
        }
        Ok(())
    }

    async fn wait_for_shutdown(&self) {
        let mut critical = self.critical.lock().take();
        let critical_fired = async {
            match critical.as_mut() {
                Some(receiver) => {
                    receiver.recv().await;
                }
                None => std::future::pending().await,
            }
        };

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                _ = critical_fired => error!("Critical error, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                _ = critical_fired => error!("Critical error, shutting down"),
            }
        }
    }

    // ─── Manager access ──────────────────────────────────────────────────────

    /// The configuration service.
    pub fn config(&self) -> &Arc<ConfigService> {
        &self.config
    }

    /// The event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The concurrency manager.
    pub fn concurrency(&self) -> &Arc<ConcurrencyManager> {
        &self.concurrency
    }

    /// The task scheduler.
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// The error handler.
    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }

    /// The plugin manager.
    pub fn plugin_manager(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Looks a manager up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Manager>> {
        self.registry.get(name)
    }

    /// Looks a manager up by name and downcasts it.
    pub fn get_as<M: Manager>(&self, name: &str) -> ManagerResult<Arc<M>> {
        self.registry.get_as(name)
    }

    /// Lifecycle state of every manager.
    pub fn manager_states(&self) -> std::collections::BTreeMap<String, ManagerState> {
        self.registry.states()
    }

    /// Health flag of every manager.
    pub fn health(&self) -> std::collections::BTreeMap<String, bool> {
        self.registry.health()
    }

    /// The newest captured errors, most recent first.
    pub fn error_history(&self, limit: usize) -> Vec<ErrorInfo> {
        self.errors.history(limit)
    }

    /// Drains the main-thread queue; the host calls this from its
    /// designated thread. Returns the number of jobs run.
    pub fn pump_main_thread(&self) -> usize {
        self.concurrency.pump_main_thread()
    }
}
