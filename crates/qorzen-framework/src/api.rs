//! The capability-gated platform API handed to plugins.
//!
//! Capabilities are checked here, at the platform surface — never inside
//! plugin code. A denied call returns
//! [`PluginError::PermissionDenied`] before touching anything, so it has no
//! side effects.
//!
//! Event namespace rule: a plugin publishes only under `<plugin_name>/...`;
//! the reserved platform prefixes are refused.

use std::sync::Arc;

use serde_json::{Map, Value};

use qorzen_core::bus::{EventBus, EventSink};
use qorzen_core::foundation::error::EventBusError;
use qorzen_core::foundation::event::{Event, is_reserved_type};
use qorzen_core::foundation::subscription::{DeliveryMode, EventCallback};
use qorzen_core::foundation::ConfigAccess;
use qorzen_core::task::{TaskHandle, TaskScheduler, TaskSpec};

use crate::capability::{Capability, CapabilitySet};
use crate::error::{PluginError, PluginResult};
use crate::extension::{ExtensionHandler, ExtensionRegistry};
use crate::manifest::ExtensionUse;

/// Per-plugin handle to the platform, restricted by the plugin's declared
/// capabilities.
pub struct PluginApi {
    plugin: String,
    capabilities: CapabilitySet,
    config: Arc<dyn ConfigAccess>,
    bus: Arc<EventBus>,
    scheduler: Arc<TaskScheduler>,
    extensions: Arc<ExtensionRegistry>,
}

impl PluginApi {
    pub(crate) fn new(
        plugin: impl Into<String>,
        capabilities: CapabilitySet,
        config: Arc<dyn ConfigAccess>,
        bus: Arc<EventBus>,
        scheduler: Arc<TaskScheduler>,
        extensions: Arc<ExtensionRegistry>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            capabilities,
            config,
            bus,
            scheduler,
            extensions,
        }
    }

    /// The owning plugin's name.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Reads a config key. Requires `config.read`.
    pub fn get_config(&self, key: &str) -> PluginResult<Option<Value>> {
        self.capabilities.require(&self.plugin, Capability::ConfigRead)?;
        Ok(self.config.get(key))
    }

    /// Writes a config key. Requires `config.write`; a denied call leaves
    /// the snapshot untouched.
    pub fn set_config(&self, key: &str, value: Value) -> PluginResult<()> {
        self.capabilities
            .require(&self.plugin, Capability::ConfigWrite)?;
        self.config
            .set(key, value)
            .map_err(|e| PluginError::ConfigRejected {
                plugin: self.plugin.clone(),
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Publishes an event under the plugin's own namespace. Requires
    /// `event.publish`; the type must be `<plugin_name>/...`.
    pub async fn publish(
        &self,
        event_type: &str,
        payload: Map<String, Value>,
    ) -> PluginResult<()> {
        self.capabilities
            .require(&self.plugin, Capability::EventPublish)?;
        let own_prefix = format!("{}/", self.plugin);
        if is_reserved_type(event_type) || !event_type.starts_with(&own_prefix) {
            return Err(PluginError::from_bus(
                &self.plugin,
                EventBusError::TypeNotAllowed {
                    event_type: event_type.to_string(),
                    publisher: self.plugin.clone(),
                },
            ));
        }
        let event = Event::builder(event_type, self.plugin.clone())
            .payload(payload)
            .build();
        self.bus
            .publish(event)
            .await
            .map_err(|e| PluginError::from_bus(&self.plugin, e))
    }

    /// Subscribes to events. Requires `event.subscribe`. The subscription id
    /// is namespaced as `<plugin_name>/<id>`.
    pub fn subscribe(
        &self,
        id: &str,
        pattern: &str,
        filter: Option<Map<String, Value>>,
        mode: DeliveryMode,
        callback: EventCallback,
    ) -> PluginResult<()> {
        self.capabilities
            .require(&self.plugin, Capability::EventSubscribe)?;
        self.bus
            .subscribe(format!("{}/{id}", self.plugin), pattern, filter, mode, callback)
            .map_err(|e| PluginError::from_bus(&self.plugin, e))
    }

    /// Removes one of this plugin's subscriptions.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.bus.unsubscribe(&format!("{}/{id}", self.plugin))
    }

    /// Submits a task attributed to this plugin.
    pub fn submit_task<F>(&self, spec: TaskSpec, job: F) -> PluginResult<TaskHandle>
    where
        F: FnOnce(&qorzen_core::task::TaskContext) -> Result<Value, qorzen_core::BoxError>
            + Send
            + 'static,
    {
        let spec = spec.plugin(self.plugin.clone());
        self.scheduler.submit(spec, job).map_err(|e| PluginError::Task {
            plugin: self.plugin.clone(),
            error: e,
        })
    }

    /// Registers an implementation of another plugin's extension point.
    /// Requires `plugin.communicate`.
    pub fn register_extension_use(
        &self,
        use_site: &ExtensionUse,
        handler: ExtensionHandler,
    ) -> PluginResult<()> {
        self.capabilities
            .require(&self.plugin, Capability::PluginCommunicate)?;
        self.extensions
            .register_use(&self.plugin, use_site, handler)
            .map_err(PluginError::from)
    }

    /// Invokes a consumer's implementation of one of this plugin's (or
    /// another's) extension points. Requires `plugin.communicate`.
    pub fn invoke_extension(
        &self,
        provider: &str,
        id: &str,
        consumer: &str,
        args: Value,
    ) -> PluginResult<Value> {
        self.capabilities
            .require(&self.plugin, Capability::PluginCommunicate)?;
        let result = self
            .extensions
            .invoke(provider, id, consumer, args)
            .map_err(PluginError::from)?;
        result.map_err(|e| PluginError::LoadFailed {
            plugin: consumer.to_string(),
            message: e.to_string(),
        })
    }
}

impl PluginError {
    fn from_bus(plugin: &str, error: EventBusError) -> Self {
        PluginError::Bus {
            plugin: plugin.to_string(),
            error,
        }
    }
}
