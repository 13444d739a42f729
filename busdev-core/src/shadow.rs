use crate::adapter::ClassAdapter;
use crate::invoker::Rpc;
use crate::sync::{schedule_retry, RetryTimer, SyncState};
use busdev_error::{BusDevError, BusDevResult};
use busdev_sdk::{ConfigChange, DeviceHandle, HandlerMethod};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

/// Local record of one non-bridge device coupled to the remote handler.
///
/// Wraps the daemon's device handle and tracks which remote request, if
/// any, is outstanding for it.
pub(crate) struct DeviceShadow {
    pub device: Arc<dyn DeviceHandle>,
    pub config: Arc<Value>,
    pub sync: SyncState,
    pub timer: RetryTimer,
}

impl DeviceShadow {
    fn new(device: Arc<dyn DeviceHandle>, config: Arc<Value>) -> Self {
        Self {
            device,
            config,
            sync: SyncState::Synced,
            timer: RetryTimer::default(),
        }
    }
}

impl ClassAdapter {
    pub(crate) async fn device_create(&self, name: &str, config: Value) -> BusDevResult<()> {
        if self.devices.contains_key(name) {
            return Err(BusDevError::Msg(format!("device '{name}' already exists")));
        }
        let device = self
            .registry
            .get(name, true)
            .ok_or_else(|| BusDevError::NotFound(name.to_string()))?;
        let peer = self.class.link().peer()?;
        let config = Arc::new(config);
        // a failed dispatch fails the whole creation; no shadow is kept
        self.invoker
            .invoke_async(peer, HandlerMethod::Create, (*config).clone(), name)
            .await?;
        let mut shadow = DeviceShadow::new(device, Arc::clone(&config));
        shadow.sync = SyncState::PendingCreate(config);
        self.arm_device_timer(&mut shadow.timer, name);
        // the daemon's automatic config-init stays suppressed: the device is
        // marked present only once the create notification arrives
        self.devices.insert(name.to_string(), shadow);
        Ok(())
    }

    pub(crate) fn device_config_init(&self, name: &str) -> BusDevResult<()> {
        let shadow = self
            .devices
            .get(name)
            .ok_or_else(|| BusDevError::NotFound(name.to_string()))?;
        shadow.device.set_present(true);
        Ok(())
    }

    pub(crate) async fn device_reload(&self, name: &str, config: Value) -> BusDevResult<ConfigChange> {
        let changed = {
            let shadow = self
                .devices
                .get(name)
                .ok_or_else(|| BusDevError::NotFound(name.to_string()))?;
            if !shadow.sync.is_synced() {
                return Ok(ConfigChange::NoChange);
            }
            self.class.config_schema().diff(&shadow.config, &config)
        };
        if !changed {
            return Ok(ConfigChange::NoChange);
        }
        let peer = self.class.link().peer()?;
        if self
            .invoker
            .invoke_async(peer, HandlerMethod::Reload, config.clone(), name)
            .await
            .is_err()
        {
            // dispatch failed; keep the old configuration in force
            return Ok(ConfigChange::NoChange);
        }
        let Some(mut shadow) = self.devices.get_mut(name) else {
            return Ok(ConfigChange::NoChange);
        };
        shadow.device.set_present(false);
        let config = Arc::new(config);
        shadow.config = Arc::clone(&config);
        shadow.sync = SyncState::PendingReload(config);
        self.arm_device_timer(&mut shadow.timer, name);
        Ok(ConfigChange::Restart)
    }

    pub(crate) async fn device_free(&self, name: &str) -> BusDevResult<()> {
        {
            let mut shadow = self
                .devices
                .get_mut(name)
                .ok_or_else(|| BusDevError::NotFound(name.to_string()))?;
            shadow.sync = SyncState::PendingFree;
            self.arm_device_timer(&mut shadow.timer, name);
        }
        let peer = self.class.link().peer()?;
        let _ = self
            .invoker
            .invoke_async(peer, HandlerMethod::Free, json!({ "name": name }), name)
            .await;
        Ok(())
    }

    pub(crate) fn arm_device_timer(&self, timer: &mut RetryTimer, name: &str) {
        let token = timer.arm();
        let adapter = self.clone();
        let name = name.to_string();
        schedule_retry(token, self.retry.interval(), async move {
            adapter.on_device_timer(&name).await;
        });
    }

    /// Reissue the pending request for a non-bridge shadow, bounded by the
    /// retry policy.
    pub(crate) async fn on_device_timer(&self, name: &str) {
        let rpc = {
            let Some(mut shadow) = self.devices.get_mut(name) else {
                return;
            };
            let Some(method) = shadow.sync.reissue_method() else {
                return;
            };
            let attempts = shadow.timer.bump();
            if attempts > self.retry.max_attempts {
                let err = BusDevError::ExhaustedRetries {
                    device: name.to_string(),
                    method: method.as_str(),
                };
                error!(error = %err, "giving up on pending handler operation");
                shadow.timer.halt();
                return;
            }
            let args = match &shadow.sync {
                SyncState::PendingCreate(cfg) | SyncState::PendingReload(cfg) => (**cfg).clone(),
                _ => json!({ "name": name }),
            };
            self.arm_device_timer(&mut shadow.timer, name);
            Rpc::new(method, args, name)
        };
        match self.class.link().peer() {
            Ok(peer) => {
                let _ = self
                    .invoker
                    .invoke_async(peer, rpc.method, rpc.args, &rpc.device)
                    .await;
            }
            Err(_) => warn!(device = name, "handler not subscribed, reissue skipped"),
        }
    }
}
