use crate::adapter::ClassAdapter;
use crate::sync::{SyncState, SyncTag};
use busdev_error::{bus::BusError, BusDevError, BusDevResult};
use busdev_sdk::{DeviceEvent, DeviceListPayload, HotplugPayload};
use serde_json::Value;
use tracing::{debug, error, info, warn};

impl ClassAdapter {
    /// Route an inbound subscription notification to the affected shadows.
    ///
    /// Device-list payloads carry `create`, `reload`, and `free`; hotplug
    /// pairs carry `prepare`, `add`, and `remove`. Notifications naming
    /// devices with no local shadow are dropped silently; an unknown kind
    /// is answered with an invalid-argument status.
    pub async fn handle_notification(&self, kind: &str, payload: &Value) -> BusDevResult<()> {
        match kind {
            "create" | "reload" | "free" => {
                let list: DeviceListPayload =
                    serde_json::from_value(payload.clone()).map_err(|e| {
                        warn!(
                            class = %self.class.name(),
                            kind,
                            error = %e,
                            "dropping malformed notification"
                        );
                        BusDevError::Protocol(format!("bad '{kind}' payload: {e}"))
                    })?;
                if let Some(message) = &list.message {
                    info!(class = %self.class.name(), kind, %message, "handler message");
                }
                for device in &list.devices {
                    match kind {
                        "create" => self.on_create_notify(device).await,
                        "reload" => self.on_reload_notify(device),
                        _ => self.on_free_notify(device),
                    }
                }
                Ok(())
            }
            "prepare" | "add" | "remove" => {
                let pair: HotplugPayload = serde_json::from_value(payload.clone()).map_err(|e| {
                    warn!(
                        class = %self.class.name(),
                        kind,
                        error = %e,
                        "dropping malformed notification"
                    );
                    BusDevError::Protocol(format!("bad '{kind}' payload: {e}"))
                })?;
                if let Some(message) = &pair.message {
                    info!(class = %self.class.name(), kind, %message, "handler message");
                }
                match kind {
                    "prepare" => {
                        self.on_prepare_notify(&pair.bridge);
                        Ok(())
                    }
                    _ => {
                        let member = pair.member.ok_or_else(|| {
                            BusDevError::Protocol(format!("'{kind}' notification without member"))
                        })?;
                        if kind == "add" {
                            self.on_add_notify(&pair.bridge, &member).await
                        } else {
                            self.on_remove_notify(&pair.bridge, &member)
                        }
                    }
                }
            }
            other => {
                warn!(class = %self.class.name(), kind = other, "unknown notification type");
                Err(BusError::InvalidArgument.into())
            }
        }
    }

    /// The handler confirmed device creation.
    ///
    /// A pending bridge is brought up through its composed activator and
    /// becomes active; members that queued up behind the create are walked
    /// shortly after. A pending plain device runs its deferred config-init.
    async fn on_create_notify(&self, name: &str) {
        let mut bring_down = false;
        if let Some(mut guard) = self.bridges.get_mut(name) {
            let br = &mut *guard;
            if !matches!(br.sync, SyncState::PendingCreate(_)) {
                return;
            }
            match br.activator.set_state(true) {
                Ok(()) => {
                    br.active = true;
                    br.sync = SyncState::Synced;
                    br.timer.disarm();
                    br.device.set_present(true);
                    let waiting = br
                        .members
                        .values()
                        .any(|m| !m.sync.is_synced() || (m.present && !m.claimed));
                    if br.n_failed > 0 || waiting {
                        self.arm_member_retry(name, br);
                    }
                }
                Err(e) => {
                    error!(bridge = name, error = %e, "bringing bridge up failed");
                    bring_down = true;
                }
            }
        } else if let Some(mut shadow) = self.devices.get_mut(name) {
            if matches!(shadow.sync, SyncState::PendingCreate(_)) {
                shadow.sync = SyncState::Synced;
                shadow.timer.disarm();
                // deferred config-init
                shadow.device.set_present(true);
            }
        } else {
            debug!(device = name, "create notification for unknown device");
        }
        if bring_down {
            let _ = self.bridge_set_down(name).await;
        }
    }

    fn on_reload_notify(&self, name: &str) {
        if let Some(mut guard) = self.bridges.get_mut(name) {
            let br = &mut *guard;
            if matches!(br.sync, SyncState::PendingReload(_)) {
                br.sync = SyncState::Synced;
                br.timer.disarm();
                br.device.set_present(true);
            }
        } else if let Some(mut shadow) = self.devices.get_mut(name) {
            if matches!(shadow.sync, SyncState::PendingReload(_)) {
                shadow.sync = SyncState::Synced;
                shadow.timer.disarm();
                shadow.device.set_present(true);
            }
        } else {
            debug!(device = name, "reload notification for unknown device");
        }
    }

    /// The handler confirmed a free.
    ///
    /// A set-down bridge merely becomes inactive and keeps its record and
    /// configuration; only a shadow awaiting destruction is flushed and
    /// dropped. A free for a shadow with nothing pending means the handler
    /// disabled the device out-of-band.
    fn on_free_notify(&self, name: &str) {
        let mut destroy_bridge = false;
        let mut destroy_device = false;
        if let Some(mut guard) = self.bridges.get_mut(name) {
            let br = &mut *guard;
            if br.sync.tag() == SyncTag::PendingFree {
                destroy_bridge = true;
            } else {
                br.active = false;
                br.sync = SyncState::Synced;
                br.timer.disarm();
            }
        } else if let Some(shadow) = self.devices.get(name) {
            if matches!(shadow.sync, SyncState::PendingFree) {
                destroy_device = true;
            }
        } else {
            debug!(device = name, "free notification for unknown device");
        }
        if destroy_bridge {
            if let Some((_, mut br)) = self.bridges.remove(name) {
                br.timer.disarm();
                br.member_retry.disarm();
                let member_names: Vec<String> = br.members.keys().cloned().collect();
                for member_name in member_names {
                    if let Some(mut m) = br.members.remove(&member_name) {
                        m.timer.disarm();
                        if m.claimed {
                            m.device.release();
                        }
                    }
                }
                br.device.set_present(false);
            }
        }
        if destroy_device {
            if let Some((_, mut shadow)) = self.devices.remove(name) {
                shadow.timer.disarm();
                shadow.device.set_present(false);
            }
        }
    }

    fn on_prepare_notify(&self, bridge: &str) {
        let Some(mut guard) = self.bridges.get_mut(bridge) else {
            debug!(bridge, "prepare notification for unknown bridge");
            return;
        };
        let br = &mut *guard;
        if matches!(br.sync, SyncState::PendingPrepare) {
            br.sync = SyncState::Synced;
            br.timer.disarm();
            br.force_active = true;
            br.device.set_present(true);
        }
    }

    /// The handler confirmed a member attach, or attached one on its own.
    ///
    /// An unknown member is treated as an unsolicited hotplug add and gets
    /// a hotplug-origin record, exempt from update rounds.
    async fn on_add_notify(&self, bridge: &str, member: &str) -> BusDevResult<()> {
        let mut rpcs = Vec::new();
        let result = {
            let Some(mut guard) = self.bridges.get_mut(bridge) else {
                debug!(bridge, "add notification for unknown bridge");
                return Ok(());
            };
            let br = &mut *guard;
            if br.members.contains_key(member) {
                let m = br.members.get_mut(member).expect("member exists");
                if matches!(m.sync, SyncState::PendingAdd) {
                    m.sync = SyncState::Synced;
                    m.timer.disarm();
                    br.device.set_present(true);
                    br.device.broadcast(DeviceEvent::TopologyChange);
                }
                Ok(())
            } else {
                match self.registry.get(member, false) {
                    Some(device) => {
                        self.create_member_locked(bridge, br, device, true, &mut rpcs);
                        Ok(())
                    }
                    None => Err(BusDevError::NotFound(member.to_string())),
                }
            }
        };
        self.flush_rpcs(rpcs).await;
        result
    }

    fn on_remove_notify(&self, bridge: &str, member: &str) -> BusDevResult<()> {
        let Some(mut guard) = self.bridges.get_mut(bridge) else {
            debug!(bridge, "remove notification for unknown bridge");
            return Ok(());
        };
        let br = &mut *guard;
        let Some(m) = br.members.get_mut(member) else {
            debug!(bridge, member, "remove notification for unknown member");
            return Ok(());
        };
        if matches!(m.sync, SyncState::PendingRemove) {
            m.sync = SyncState::Synced;
            m.timer.disarm();
            if m.claimed {
                m.device.release();
                m.claimed = false;
            }
            br.device.broadcast(DeviceEvent::TopologyChange);
        }
        Ok(())
    }
}
