use crate::adapter::ClassAdapter;
use crate::class::DeviceClass;
use busdev_error::{BusDevError, BusDevResult};
use busdev_sdk::{BusTransport, ClassSpec, DeviceRegistry, RetryPolicy};
use dashmap::DashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the class metadata subdirectory under the daemon's
/// configuration root.
pub const CONFIG_SUBDIR: &str = "ubusdev-config";

/// The plug-in: every registered device class and the shared services its
/// adapters drive.
pub struct BusDevPlugin {
    bus: Arc<dyn BusTransport>,
    devices: Arc<dyn DeviceRegistry>,
    retry: RetryPolicy,
    classes: DashMap<String, Arc<ClassAdapter>>,
}

impl BusDevPlugin {
    pub fn new(
        bus: Arc<dyn BusTransport>,
        devices: Arc<dyn DeviceRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            bus,
            devices,
            retry,
            classes: DashMap::new(),
        }
    }

    /// Scan the class metadata directory and register every valid class.
    ///
    /// A missing directory silently disables the plug-in. Files that fail
    /// to parse or validate are discarded with a warning; the remaining
    /// classes still register. Returns the number of installed classes.
    pub async fn init(&self, config_root: &Path) -> BusDevResult<usize> {
        let dir = config_root.join(CONFIG_SUBDIR);
        if !dir.is_dir() {
            debug!(path = %dir.display(), "no class metadata directory, plug-in disabled");
            return Ok(0);
        }
        let mut installed = 0;
        for entry in fs::read_dir(&dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let spec: ClassSpec = match fs::read_to_string(&path)
                .map_err(BusDevError::from)
                .and_then(|raw| serde_json::from_str(&raw).map_err(BusDevError::from))
            {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "discarding class metadata");
                    continue;
                }
            };
            match self.register_class(spec).await {
                Ok(_) => installed += 1,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "discarding device class");
                }
            }
        }
        info!(installed, "external device classes registered");
        Ok(installed)
    }

    /// Register one device class and start its handler subscription.
    ///
    /// The class is installed even when the handler is not on the bus yet;
    /// its link waits for the endpoint to appear.
    pub async fn register_class(&self, spec: ClassSpec) -> BusDevResult<Arc<ClassAdapter>> {
        let name = spec.name.clone();
        if self.classes.contains_key(&name) {
            return Err(BusDevError::Config(format!(
                "device class '{name}' is already registered"
            )));
        }
        let subscriber = spec.subscriber_object();
        let class = Arc::new(DeviceClass::new(spec, Arc::clone(&self.bus))?);
        info!(
            class = %name,
            endpoint = %class.handler_endpoint(),
            %subscriber,
            "registering external device class"
        );
        if let Some(prefix) = class.member_prefix() {
            debug!(class = %name, prefix, "bridge class registered with member name prefix");
        }
        let adapter = Arc::new(ClassAdapter::new(
            Arc::clone(&class),
            Arc::clone(&self.devices),
            Arc::clone(&self.bus),
            self.retry,
        ));
        if let Err(e) = class.link().subscribe().await {
            warn!(class = %name, error = %e, "handler not reachable yet, class installed waiting");
        }
        self.classes.insert(name, Arc::clone(&adapter));
        Ok(adapter)
    }

    pub fn class(&self, name: &str) -> Option<Arc<ClassAdapter>> {
        self.classes.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Fan an object-added bus event out to every class link; only the one
    /// watching that endpoint reacts.
    pub async fn handle_object_added(&self, object: &str) {
        let adapters: Vec<Arc<ClassAdapter>> = self
            .classes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for adapter in adapters {
            if let Err(e) = adapter.object_added(object).await {
                warn!(
                    class = %adapter.class().name(),
                    object,
                    error = %e,
                    "re-subscription after object appearance failed"
                );
            }
        }
    }
}
