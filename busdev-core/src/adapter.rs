use crate::bridge::BridgeShadow;
use crate::class::DeviceClass;
use crate::invoker::{Invoker, Rpc};
use crate::shadow::DeviceShadow;
use crate::sync::SyncTag;
use busdev_error::{bus::BusError, BusDevResult};
use busdev_sdk::{
    BusTransport, ConfigChange, DeviceEvent, DeviceRegistry, HandlerMethod, PeerId, RetryPolicy,
};
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Daemon-facing surface of one registered device class.
///
/// Implements the device-type operations by driving the per-device shadows,
/// the handler link, and the invoker. Every operation that would issue RPC
/// first checks that the link is subscribed; without a subscription the
/// operation is rejected with `HandlerAbsent` and no local state changes.
///
/// Cheap to clone; all state is shared. Clones are handed to retry-timer
/// tasks.
#[derive(Clone)]
pub struct ClassAdapter {
    pub(crate) class: Arc<DeviceClass>,
    pub(crate) registry: Arc<dyn DeviceRegistry>,
    pub(crate) invoker: Invoker,
    pub(crate) retry: RetryPolicy,
    pub(crate) devices: Arc<DashMap<String, DeviceShadow>>,
    pub(crate) bridges: Arc<DashMap<String, BridgeShadow>>,
}

impl ClassAdapter {
    pub(crate) fn new(
        class: Arc<DeviceClass>,
        registry: Arc<dyn DeviceRegistry>,
        bus: Arc<dyn BusTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            class,
            registry,
            invoker: Invoker::new(bus),
            retry,
            devices: Arc::new(DashMap::new()),
            bridges: Arc::new(DashMap::new()),
        }
    }

    #[inline]
    pub fn class(&self) -> &DeviceClass {
        &self.class
    }

    pub(crate) fn ensure_subscribed(&self, op: &str) -> BusDevResult<PeerId> {
        self.class.link().peer().inspect_err(|_| {
            warn!(
                class = %self.class.name(),
                op,
                "handler not subscribed, rejecting operation"
            );
        })
    }

    /// Dispatch calls queued while a shadow guard was held.
    ///
    /// Must not be called with any shadow-map guard alive.
    pub(crate) async fn flush_rpcs(&self, rpcs: Vec<Rpc>) {
        if rpcs.is_empty() {
            return;
        }
        let peer = match self.class.link().peer() {
            Ok(peer) => peer,
            Err(_) => {
                warn!(
                    class = %self.class.name(),
                    count = rpcs.len(),
                    "handler not subscribed, dropping queued handler calls"
                );
                return;
            }
        };
        for rpc in rpcs {
            let _ = self
                .invoker
                .invoke_async(peer, rpc.method, rpc.args, &rpc.device)
                .await;
        }
    }

    // === device-type operations ===

    /// Create a device of this class and ask the handler to realize it.
    pub async fn create(&self, name: &str, config: Value) -> BusDevResult<()> {
        self.ensure_subscribed("create")?;
        if self.class.bridge_capability() {
            self.bridge_create(name, config).await
        } else {
            self.device_create(name, config).await
        }
    }

    /// Apply a new configuration to an existing device.
    ///
    /// With no live subscription this degrades to `NoChange` so the daemon
    /// keeps the device as-is; nothing is mutated and no RPC is issued.
    pub async fn reload(&self, name: &str, config: Value) -> BusDevResult<ConfigChange> {
        if !self.class.link().is_subscribed() {
            warn!(
                class = %self.class.name(),
                device = name,
                "handler not subscribed, config reload skipped"
            );
            return Ok(ConfigChange::NoChange);
        }
        if self.class.bridge_capability() {
            self.bridge_reload(name, config).await
        } else {
            self.device_reload(name, config).await
        }
    }

    /// Release a device locally and at the handler.
    ///
    /// The shadow is destroyed only when the handler's `free` notification
    /// confirms the release.
    pub async fn free(&self, name: &str) -> BusDevResult<()> {
        self.ensure_subscribed("free")?;
        if self.class.bridge_capability() {
            self.bridge_free(name).await
        } else {
            self.device_free(name).await
        }
    }

    /// Apply the stored configuration to a freshly created device.
    pub async fn config_init(&self, name: &str) -> BusDevResult<()> {
        self.ensure_subscribed("config_init")?;
        if self.class.bridge_capability() {
            self.bridge_config_init(name).await
        } else {
            self.device_config_init(name)
        }
    }

    /// Bring a bridge device up or down on behalf of the daemon.
    pub async fn set_state(&self, name: &str, up: bool) -> BusDevResult<()> {
        if !self.class.bridge_capability() {
            return Err(BusError::MethodNotSupported.into());
        }
        self.ensure_subscribed("set_state")?;
        if up {
            self.bridge_set_up(name).await
        } else {
            self.bridge_set_down(name).await
        }
    }

    /// Pre-activate a bridge so a hotplug member can attach to it.
    pub async fn hotplug_prepare(&self, name: &str) -> BusDevResult<()> {
        if !self.class.bridge_capability() {
            return Err(BusError::MethodNotSupported.into());
        }
        self.ensure_subscribed("hotplug_prepare")?;
        self.bridge_prepare(name).await
    }

    /// Ask the handler to attach `member` to `bridge`.
    ///
    /// No member record is created here; the handler's `add` notification
    /// introduces it as a hotplug-origin member.
    pub async fn hotplug_add(&self, bridge: &str, member: &str) -> BusDevResult<()> {
        if !self.class.bridge_capability() {
            return Err(BusError::MethodNotSupported.into());
        }
        let peer = self.ensure_subscribed("hotplug_add")?;
        if !self.bridges.contains_key(bridge) {
            return Err(busdev_error::BusDevError::NotFound(bridge.to_string()));
        }
        self.invoker
            .invoke_async(
                peer,
                HandlerMethod::Add,
                json!({ "bridge": bridge, "member": member }),
                member,
            )
            .await
    }

    /// Detach `member` from `bridge` and drop its record.
    pub async fn hotplug_remove(&self, bridge: &str, member: &str) -> BusDevResult<()> {
        if !self.class.bridge_capability() {
            return Err(BusError::MethodNotSupported.into());
        }
        self.ensure_subscribed("hotplug_remove")?;
        self.bridge_hotplug_remove(bridge, member).await
    }

    /// Collate the handler's info dump for `name` into `out`.
    pub async fn dump_info(&self, name: &str, out: &mut Map<String, Value>) -> BusDevResult<()> {
        self.dump(name, HandlerMethod::DumpInfo, self.class.info_schema(), out)
            .await
    }

    /// Collate the handler's statistics dump for `name` into `out`.
    pub async fn dump_stats(&self, name: &str, out: &mut Map<String, Value>) -> BusDevResult<()> {
        self.dump(name, HandlerMethod::DumpStats, self.class.stats_schema(), out)
            .await
    }

    async fn dump(
        &self,
        name: &str,
        method: HandlerMethod,
        schema: Option<&busdev_sdk::BlobSchema>,
        out: &mut Map<String, Value>,
    ) -> BusDevResult<()> {
        // an absent schema suppresses the capability for the whole class
        let Some(schema) = schema else {
            return Ok(());
        };
        let peer = self.ensure_subscribed(method.as_str())?;
        let key = if self.class.bridge_capability() {
            "bridge"
        } else {
            "name"
        };
        let reply = self
            .invoker
            .invoke_sync(peer, method, json!({ key: name }), name)
            .await?;
        for (field, value) in schema.project(&reply) {
            out.insert(field, value);
        }
        Ok(())
    }

    // === inbound edges ===

    /// A device event broadcast by the daemon's registry for a device that
    /// may be a member of one of this class's bridges.
    pub async fn handle_device_event(&self, device: &str, event: DeviceEvent) {
        if !self.class.bridge_capability() {
            return;
        }
        let bridge_names: Vec<String> = self
            .bridges
            .iter()
            .filter(|entry| entry.value().members.contains_key(device))
            .map(|entry| entry.key().clone())
            .collect();
        for bridge_name in bridge_names {
            let mut rpcs = Vec::new();
            {
                let Some(mut guard) = self.bridges.get_mut(&bridge_name) else {
                    continue;
                };
                let br = &mut *guard;
                match event {
                    DeviceEvent::Add => {
                        self.member_device_added(&bridge_name, br, device, &mut rpcs)
                    }
                    DeviceEvent::Remove => {
                        self.member_device_removed(&bridge_name, br, device, &mut rpcs)
                    }
                    _ => {}
                }
            }
            self.flush_rpcs(rpcs).await;
        }
    }

    /// The bus dropped the subscription to this class's handler.
    pub async fn handler_gone(&self) {
        self.class.link().handler_gone().await;
    }

    /// An object appeared on the bus; re-subscribe if it is our endpoint.
    pub async fn object_added(&self, object: &str) -> BusDevResult<()> {
        self.class.link().object_added(object).await
    }

    // === introspection ===

    pub fn device_snapshot(&self, name: &str) -> Option<DeviceSnapshot> {
        self.devices.get(name).map(|shadow| DeviceSnapshot {
            sync: shadow.sync.tag(),
            attempts: shadow.timer.attempts(),
            timer_armed: shadow.timer.armed(),
        })
    }

    pub fn bridge_snapshot(&self, name: &str) -> Option<BridgeSnapshot> {
        self.bridges.get(name).map(|br| BridgeSnapshot {
            sync: br.sync.tag(),
            attempts: br.timer.attempts(),
            timer_armed: br.timer.armed(),
            active: br.active,
            force_active: br.force_active,
            empty: br.empty,
            n_present: br.n_present,
            n_failed: br.n_failed,
            members: br
                .members
                .values()
                .map(|m| MemberSnapshot {
                    name: m.name.clone(),
                    sync: m.sync.tag(),
                    present: m.present,
                    hotplug: m.hotplug,
                    claimed: m.claimed,
                    attempts: m.timer.attempts(),
                    timer_armed: m.timer.armed(),
                })
                .collect(),
        })
    }
}

/// Point-in-time view of a non-bridge shadow.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub sync: SyncTag,
    pub attempts: u32,
    pub timer_armed: bool,
}

/// Point-in-time view of a bridge shadow and its membership.
#[derive(Debug, Clone)]
pub struct BridgeSnapshot {
    pub sync: SyncTag,
    pub attempts: u32,
    pub timer_armed: bool,
    pub active: bool,
    pub force_active: bool,
    pub empty: bool,
    pub n_present: usize,
    pub n_failed: usize,
    pub members: Vec<MemberSnapshot>,
}

impl BridgeSnapshot {
    pub fn member(&self, name: &str) -> Option<&MemberSnapshot> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct MemberSnapshot {
    pub name: String,
    pub sync: SyncTag,
    pub present: bool,
    pub hotplug: bool,
    pub claimed: bool,
    pub attempts: u32,
    pub timer_armed: bool,
}
