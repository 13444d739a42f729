use crate::adapter::ClassAdapter;
use crate::invoker::Rpc;
use crate::member::MemberShadow;
use crate::sync::{schedule_retry, RetryTimer, SyncState};
use busdev_error::{BusDevError, BusDevResult};
use busdev_sdk::{ConfigChange, DeviceActivator, DeviceHandle, HandlerMethod};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Recognized fields of a bridge-capable class configuration. Everything
/// else in the blob is opaque and only forwarded to the handler.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BridgeConfig {
    #[serde(default)]
    pub empty: bool,
    #[serde(default)]
    pub ifname: Vec<String>,
}

impl BridgeConfig {
    pub fn parse(config: &Value) -> BusDevResult<Self> {
        serde_json::from_value(config.clone())
            .map_err(|e| BusDevError::Config(format!("bad bridge configuration: {e}")))
    }
}

/// Local record of one bridge device coupled to the remote handler.
///
/// Owns the configuration blob and the membership map. `active` means the
/// remote bridge exists and the device has been brought up through the
/// composed activator; it only flips true after a `create` notification.
pub(crate) struct BridgeShadow {
    pub device: Arc<dyn DeviceHandle>,
    pub activator: Arc<dyn DeviceActivator>,
    pub config: Option<Arc<Value>>,
    pub empty: bool,
    pub ifnames: Vec<String>,
    pub active: bool,
    pub force_active: bool,
    pub members: BTreeMap<String, MemberShadow>,
    pub n_present: usize,
    pub n_failed: usize,
    /// Configuration update round, bumped on every config-init. Members not
    /// re-listed in the current round are flushed, hotplug members excepted.
    pub round: u64,
    pub sync: SyncState,
    pub timer: RetryTimer,
    /// Scheduler for the post-synchronization member-enable walk.
    pub member_retry: RetryTimer,
}

impl BridgeShadow {
    fn new(device: Arc<dyn DeviceHandle>, activator: Arc<dyn DeviceActivator>) -> Self {
        Self {
            device,
            activator,
            config: None,
            empty: false,
            ifnames: Vec::new(),
            active: false,
            force_active: false,
            members: BTreeMap::new(),
            n_present: 0,
            n_failed: 0,
            round: 0,
            sync: SyncState::Synced,
            timer: RetryTimer::default(),
            member_retry: RetryTimer::default(),
        }
    }

    /// Stored configuration, or an empty blob for a bridge that never got
    /// one.
    pub fn config_blob(&self) -> Arc<Value> {
        self.config
            .clone()
            .unwrap_or_else(|| Arc::new(Value::Object(Map::new())))
    }

    fn absorb(&mut self, parsed: BridgeConfig, config: Arc<Value>) {
        self.empty = parsed.empty;
        // member names are ignored for explicitly empty bridges
        self.ifnames = if parsed.empty { Vec::new() } else { parsed.ifname };
        self.config = Some(config);
    }
}

impl ClassAdapter {
    pub(crate) async fn bridge_create(&self, name: &str, config: Value) -> BusDevResult<()> {
        if self.bridges.contains_key(name) {
            return Err(BusDevError::Msg(format!("bridge '{name}' already exists")));
        }
        let device = self
            .registry
            .get(name, true)
            .ok_or_else(|| BusDevError::NotFound(name.to_string()))?;
        let activator = self
            .registry
            .activator(name)
            .ok_or_else(|| BusDevError::NotFound(name.to_string()))?;
        let parsed = BridgeConfig::parse(&config)?;
        let mut br = BridgeShadow::new(device, activator);
        br.absorb(parsed, Arc::new(config));
        // the remote create is deferred: it goes out when the first member
        // appears, or straight from config-init for an empty bridge
        self.bridges.insert(name.to_string(), br);
        Ok(())
    }

    pub(crate) async fn bridge_reload(&self, name: &str, config: Value) -> BusDevResult<ConfigChange> {
        let parsed = BridgeConfig::parse(&config)?;
        let first_config = {
            let br = self
                .bridges
                .get(name)
                .ok_or_else(|| BusDevError::NotFound(name.to_string()))?;
            if !br.sync.is_synced() {
                return Ok(ConfigChange::NoChange);
            }
            match &br.config {
                Some(old) => {
                    if !self.class.config_schema().diff(old, &config) {
                        return Ok(ConfigChange::NoChange);
                    }
                    false
                }
                None => true,
            }
        };
        if first_config {
            if let Some(mut br) = self.bridges.get_mut(name) {
                br.absorb(parsed, Arc::new(config));
            }
            return Ok(ConfigChange::Applied);
        }
        let peer = self.class.link().peer()?;
        if self
            .invoker
            .invoke_async(peer, HandlerMethod::Reload, config.clone(), name)
            .await
            .is_err()
        {
            // dispatch failed; the stored configuration stays in force
            return Ok(ConfigChange::NoChange);
        }
        let Some(mut guard) = self.bridges.get_mut(name) else {
            return Ok(ConfigChange::NoChange);
        };
        let br = &mut *guard;
        let config = Arc::new(config);
        br.absorb(parsed, Arc::clone(&config));
        br.sync = SyncState::PendingReload(config);
        self.arm_bridge_timer(&mut br.timer, name);
        Ok(ConfigChange::Restart)
    }

    /// Apply the stored configuration: mark an empty bridge for activation
    /// and request its remote creation, or run a membership update round
    /// over the configured member names.
    pub(crate) async fn bridge_config_init(&self, name: &str) -> BusDevResult<()> {
        let mut rpcs = Vec::new();
        {
            let Some(mut guard) = self.bridges.get_mut(name) else {
                return Err(BusDevError::NotFound(name.to_string()));
            };
            let br = &mut *guard;
            if br.empty {
                br.force_active = true;
                br.device.set_present(true);
                // no member event will ever trigger the remote create
                self.bridge_request_create(name, br, &mut rpcs);
            } else {
                br.n_failed = 0;
                br.round += 1;
                for member_name in br.ifnames.clone() {
                    let Some(device) = self.registry.get(&member_name, true) else {
                        continue;
                    };
                    self.create_member_locked(name, br, device, false, &mut rpcs);
                }
                let stale: Vec<String> = br
                    .members
                    .iter()
                    .filter(|(_, m)| !m.hotplug && m.round != br.round)
                    .map(|(member_name, _)| member_name.clone())
                    .collect();
                for member_name in stale {
                    self.bridge_free_member(name, br, &member_name, &mut rpcs);
                }
            }
        }
        self.flush_rpcs(rpcs).await;
        Ok(())
    }

    /// Request remote creation of the bridge with its stored configuration.
    /// Idempotent while a create is already outstanding.
    pub(crate) fn bridge_request_create(
        &self,
        name: &str,
        br: &mut BridgeShadow,
        rpcs: &mut Vec<Rpc>,
    ) {
        if br.active || matches!(br.sync, SyncState::PendingCreate(_)) {
            return;
        }
        let config = br.config_blob();
        br.sync = SyncState::PendingCreate(Arc::clone(&config));
        self.arm_bridge_timer(&mut br.timer, name);
        rpcs.push(Rpc::new(HandlerMethod::Create, (*config).clone(), name));
    }

    pub(crate) async fn bridge_set_up(&self, name: &str) -> BusDevResult<()> {
        let mut rpcs = Vec::new();
        let result = {
            let Some(mut guard) = self.bridges.get_mut(name) else {
                return Err(BusDevError::NotFound(name.to_string()));
            };
            let br = &mut *guard;
            if br.n_present == 0 && !br.force_active {
                return Err(busdev_error::device::DeviceError::NoMembers.into());
            }
            br.n_failed = 0;
            let member_names: Vec<String> = br.members.keys().cloned().collect();
            for member_name in &member_names {
                self.enable_member_locked(name, br, member_name, &mut rpcs);
            }
            if br.n_failed > 0 {
                self.arm_member_retry(name, br);
            }
            if !br.force_active && br.n_present == 0 {
                // every member failed to come up
                br.active = false;
                br.device.set_present(false);
                Err(busdev_error::device::DeviceError::NoMembers.into())
            } else {
                Ok(())
            }
        };
        self.flush_rpcs(rpcs).await;
        result
    }

    pub(crate) async fn bridge_set_down(&self, name: &str) -> BusDevResult<()> {
        let mut rpcs = Vec::new();
        {
            let Some(mut guard) = self.bridges.get_mut(name) else {
                return Err(BusDevError::NotFound(name.to_string()));
            };
            let br = &mut *guard;
            if let Err(e) = br.activator.set_state(false) {
                warn!(bridge = name, error = %e, "bringing bridge device down failed");
            }
            let member_names: Vec<String> = br.members.keys().cloned().collect();
            for member_name in &member_names {
                self.disable_member_locked(name, br, member_name, &mut rpcs);
            }
            br.active = false;
            // the record survives; only a free through the adapter destroys it
            br.sync = SyncState::PendingDisable;
            self.arm_bridge_timer(&mut br.timer, name);
            rpcs.push(Rpc::new(
                HandlerMethod::Free,
                json!({ "name": name }),
                name,
            ));
        }
        self.flush_rpcs(rpcs).await;
        Ok(())
    }

    pub(crate) async fn bridge_free(&self, name: &str) -> BusDevResult<()> {
        {
            let mut br = self
                .bridges
                .get_mut(name)
                .ok_or_else(|| BusDevError::NotFound(name.to_string()))?;
            br.sync = SyncState::PendingFree;
            let br = &mut *br;
            self.arm_bridge_timer(&mut br.timer, name);
        }
        let peer = self.class.link().peer()?;
        let _ = self
            .invoker
            .invoke_async(peer, HandlerMethod::Free, json!({ "name": name }), name)
            .await;
        Ok(())
    }

    /// Pre-activate the bridge for an incoming hotplug member and tell the
    /// handler to prepare it.
    pub(crate) async fn bridge_prepare(&self, name: &str) -> BusDevResult<()> {
        let dispatch = {
            let Some(mut guard) = self.bridges.get_mut(name) else {
                return Err(BusDevError::NotFound(name.to_string()));
            };
            let br = &mut *guard;
            br.force_active = true;
            br.device.set_present(true);
            if br.sync.is_synced() {
                br.sync = SyncState::PendingPrepare;
                self.arm_bridge_timer(&mut br.timer, name);
                true
            } else {
                false
            }
        };
        if dispatch {
            let peer = self.class.link().peer()?;
            let _ = self
                .invoker
                .invoke_async(
                    peer,
                    HandlerMethod::Prepare,
                    json!({ "bridge": name }),
                    name,
                )
                .await;
        }
        Ok(())
    }

    pub(crate) fn arm_bridge_timer(&self, timer: &mut RetryTimer, name: &str) {
        let token = timer.arm();
        let adapter = self.clone();
        let name = name.to_string();
        schedule_retry(token, self.retry.interval(), async move {
            adapter.on_bridge_timer(&name).await;
        });
    }

    pub(crate) fn arm_member_retry(&self, name: &str, br: &mut BridgeShadow) {
        let token = br.member_retry.arm();
        let adapter = self.clone();
        let name = name.to_string();
        schedule_retry(token, self.retry.interval(), async move {
            adapter.on_member_retry_walk(&name).await;
        });
    }

    /// Reissue the pending request for a bridge shadow, bounded by the
    /// retry policy.
    pub(crate) async fn on_bridge_timer(&self, name: &str) {
        let rpc = {
            let Some(mut guard) = self.bridges.get_mut(name) else {
                return;
            };
            let br = &mut *guard;
            let Some(method) = br.sync.reissue_method() else {
                return;
            };
            let attempts = br.timer.bump();
            if attempts > self.retry.max_attempts {
                let err = BusDevError::ExhaustedRetries {
                    device: name.to_string(),
                    method: method.as_str(),
                };
                error!(error = %err, "giving up on pending handler operation");
                br.timer.halt();
                return;
            }
            let args = match &br.sync {
                SyncState::PendingCreate(cfg) | SyncState::PendingReload(cfg) => (**cfg).clone(),
                SyncState::PendingPrepare => json!({ "bridge": name }),
                _ => json!({ "name": name }),
            };
            self.arm_bridge_timer(&mut br.timer, name);
            Rpc::new(method, args, name)
        };
        match self.class.link().peer() {
            Ok(peer) => {
                let _ = self
                    .invoker
                    .invoke_async(peer, rpc.method, rpc.args, &rpc.device)
                    .await;
            }
            Err(_) => warn!(bridge = name, "handler not subscribed, reissue skipped"),
        }
    }

    /// Scheduled walk retrying member attachment after the bridge became
    /// synchronized.
    pub(crate) async fn on_member_retry_walk(&self, name: &str) {
        let mut rpcs = Vec::new();
        {
            let Some(mut guard) = self.bridges.get_mut(name) else {
                return;
            };
            let br = &mut *guard;
            if !br.sync.is_synced() || !br.active {
                return;
            }
            let walks = br.member_retry.bump();
            if walks > self.retry.max_attempts {
                warn!(bridge = name, "member enable retries exhausted");
                br.member_retry.halt();
                return;
            }
            self.retry_enable_members_locked(name, br, &mut rpcs);
        }
        self.flush_rpcs(rpcs).await;
    }

    /// Walk the membership and re-enable every member still waiting to
    /// attach. Failures re-arm the walk, bounded by the retry policy.
    pub(crate) fn retry_enable_members_locked(
        &self,
        name: &str,
        br: &mut BridgeShadow,
        rpcs: &mut Vec<Rpc>,
    ) {
        br.n_failed = 0;
        let member_names: Vec<String> = br.members.keys().cloned().collect();
        for member_name in &member_names {
            let (present, device_present, synced, claimed) = {
                let m = &br.members[member_name];
                (m.present, m.device.present(), m.sync.is_synced(), m.claimed)
            };
            if !device_present {
                continue;
            }
            // synced members only need their claim completed
            if synced && (claimed || !present) {
                continue;
            }
            if !present {
                let m = br.members.get_mut(member_name).expect("member exists");
                m.present = true;
                br.n_present += 1;
            }
            self.enable_member_locked(name, br, member_name, rpcs);
        }
        if br.n_failed > 0 {
            self.arm_member_retry(name, br);
        }
    }
}
