use crate::adapter::ClassAdapter;
use crate::bridge::BridgeShadow;
use crate::invoker::Rpc;
use crate::sync::{schedule_retry, RetryTimer, SyncState, SyncTag};
use busdev_error::{device::DeviceError, BusDevError, BusDevResult};
use busdev_sdk::{DeviceHandle, HandlerMethod};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// One member of a bridge's membership map.
///
/// The record holds a device-user relation to the underlying device, which
/// stays owned by the daemon's registry. Hotplug-origin members are exempt
/// from configuration update rounds.
pub(crate) struct MemberShadow {
    pub name: String,
    pub device: Arc<dyn DeviceHandle>,
    pub present: bool,
    pub hotplug: bool,
    pub claimed: bool,
    pub round: u64,
    pub sync: SyncState,
    pub timer: RetryTimer,
}

impl ClassAdapter {
    /// Insert a member record keyed by interface name. An existing record
    /// wins: it is stamped with the current round and kept.
    ///
    /// The registry delivers an add event immediately for devices that are
    /// already present, so presence bookkeeping runs inline here.
    pub(crate) fn create_member_locked(
        &self,
        bridge_name: &str,
        br: &mut BridgeShadow,
        device: Arc<dyn DeviceHandle>,
        hotplug: bool,
        rpcs: &mut Vec<Rpc>,
    ) {
        let member_name = device.name().to_string();
        if let Some(existing) = br.members.get_mut(&member_name) {
            if !existing.hotplug {
                existing.round = br.round;
            }
            return;
        }
        let member = MemberShadow {
            name: member_name.clone(),
            device: Arc::clone(&device),
            present: false,
            hotplug,
            claimed: false,
            round: br.round,
            // hotplug members are already attached at the handler
            sync: if hotplug {
                SyncState::Synced
            } else {
                SyncState::PendingAdd
            },
            timer: RetryTimer::default(),
        };
        br.members.insert(member_name.clone(), member);
        if device.present() {
            self.member_device_added(bridge_name, br, &member_name, rpcs);
        }
    }

    /// The underlying device of a member came up.
    pub(crate) fn member_device_added(
        &self,
        bridge_name: &str,
        br: &mut BridgeShadow,
        member_name: &str,
        rpcs: &mut Vec<Rpc>,
    ) {
        {
            let Some(m) = br.members.get_mut(member_name) else {
                return;
            };
            if m.present {
                return;
            }
            m.present = true;
        }
        br.n_present += 1;
        if br.n_present == 1 {
            br.device.set_present(true);
        }
        if br.n_present == 1 && !br.active {
            // first member up: have the handler create the bridge itself;
            // the attach follows once the create notification lands
            self.bridge_request_create(bridge_name, br, rpcs);
        } else {
            self.enable_member_locked(bridge_name, br, member_name, rpcs);
        }
    }

    /// The underlying device of a member went away.
    pub(crate) fn member_device_removed(
        &self,
        bridge_name: &str,
        br: &mut BridgeShadow,
        member_name: &str,
        rpcs: &mut Vec<Rpc>,
    ) {
        let hotplug = match br.members.get(member_name) {
            Some(m) => m.hotplug,
            None => return,
        };
        if hotplug {
            // hotplug members die with their device
            self.bridge_free_member(bridge_name, br, member_name, rpcs);
        } else {
            self.remove_member_locked(bridge_name, br, member_name, rpcs);
        }
    }

    /// Attach a present member to the bridge at the handler.
    ///
    /// A member whose bridge is not yet confirmed goes into failure
    /// bookkeeping instead; the post-synchronization walk picks it up.
    pub(crate) fn enable_member_locked(
        &self,
        bridge_name: &str,
        br: &mut BridgeShadow,
        member_name: &str,
        rpcs: &mut Vec<Rpc>,
    ) {
        let (present, hotplug) = match br.members.get(member_name) {
            Some(m) => (m.present, m.hotplug),
            None => return,
        };
        if !present {
            return;
        }
        if !br.active {
            self.bridge_request_create(bridge_name, br, rpcs);
        }
        let claim_err = {
            let m = br.members.get_mut(member_name).expect("member exists");
            if m.claimed {
                None
            } else if !m.device.present() {
                // the underlying device vanished between the event and the
                // attach
                Some(DeviceError::NotPresent {
                    device: m.name.clone(),
                })
            } else {
                match m.device.claim() {
                    Ok(()) => {
                        m.claimed = true;
                        None
                    }
                    Err(e) => Some(e),
                }
            }
        };
        if let Some(e) = claim_err {
            warn!(
                bridge = bridge_name,
                member = member_name,
                error = %e,
                "claiming member device failed"
            );
            self.fail_member_locked(br, member_name);
            return;
        }
        if !br.sync.is_synced() {
            // the attach is strictly ordered after the bridge's create
            // notification
            self.fail_member_locked(br, member_name);
            return;
        }
        if hotplug {
            return;
        }
        {
            let m = br.members.get_mut(member_name).expect("member exists");
            if !matches!(m.sync, SyncState::PendingAdd) {
                return;
            }
            self.arm_member_timer(bridge_name, member_name, &mut m.timer);
        }
        rpcs.push(Rpc::new(
            HandlerMethod::Add,
            json!({ "bridge": bridge_name, "member": member_name }),
            member_name,
        ));
    }

    fn fail_member_locked(&self, br: &mut BridgeShadow, member_name: &str) {
        let m = br.members.get_mut(member_name).expect("member exists");
        if m.claimed {
            m.device.release();
            m.claimed = false;
        }
        if m.present {
            m.present = false;
            br.n_present -= 1;
        }
        m.sync = SyncState::PendingAdd;
        br.n_failed += 1;
    }

    /// Detach a present member at the handler.
    pub(crate) fn disable_member_locked(
        &self,
        bridge_name: &str,
        br: &mut BridgeShadow,
        member_name: &str,
        rpcs: &mut Vec<Rpc>,
    ) {
        let Some(m) = br.members.get_mut(member_name) else {
            return;
        };
        if !m.present {
            return;
        }
        m.sync = SyncState::PendingRemove;
        self.arm_member_timer(bridge_name, member_name, &mut m.timer);
        rpcs.push(Rpc::new(
            HandlerMethod::Remove,
            json!({ "bridge": bridge_name, "member": member_name }),
            member_name,
        ));
    }

    /// Drop a member's presence bookkeeping, detaching it remotely first
    /// when the bridge is active.
    pub(crate) fn remove_member_locked(
        &self,
        bridge_name: &str,
        br: &mut BridgeShadow,
        member_name: &str,
        rpcs: &mut Vec<Rpc>,
    ) {
        let present = match br.members.get(member_name) {
            Some(m) => m.present,
            None => return,
        };
        if !present {
            return;
        }
        if br.active {
            self.disable_member_locked(bridge_name, br, member_name, rpcs);
        }
        let m = br.members.get_mut(member_name).expect("member exists");
        m.present = false;
        br.n_present -= 1;
        if br.n_present == 0 {
            br.device.set_present(false);
        }
    }

    /// Tear down a member record entirely (update-round flush, hotplug
    /// removal, bridge destruction).
    pub(crate) fn bridge_free_member(
        &self,
        bridge_name: &str,
        br: &mut BridgeShadow,
        member_name: &str,
        rpcs: &mut Vec<Rpc>,
    ) {
        self.remove_member_locked(bridge_name, br, member_name, rpcs);
        if let Some(mut m) = br.members.remove(member_name) {
            m.timer.disarm();
            if m.claimed {
                m.device.release();
            }
            // another bridge may have raced to claim this device while it
            // still belonged here; toggling presence makes it retry
            if m.device.present() {
                m.device.set_present(false);
                m.device.set_present(true);
            }
        }
    }

    pub(crate) async fn bridge_hotplug_remove(
        &self,
        bridge_name: &str,
        member_name: &str,
    ) -> BusDevResult<()> {
        let mut rpcs = Vec::new();
        {
            let Some(mut guard) = self.bridges.get_mut(bridge_name) else {
                return Err(BusDevError::NotFound(bridge_name.to_string()));
            };
            let br = &mut *guard;
            if !br.members.contains_key(member_name) {
                return Err(BusDevError::NotFound(member_name.to_string()));
            }
            self.bridge_free_member(bridge_name, br, member_name, &mut rpcs);
        }
        self.flush_rpcs(rpcs).await;
        Ok(())
    }

    pub(crate) fn arm_member_timer(
        &self,
        bridge_name: &str,
        member_name: &str,
        timer: &mut RetryTimer,
    ) {
        let token = timer.arm();
        let adapter = self.clone();
        let bridge = bridge_name.to_string();
        let member = member_name.to_string();
        schedule_retry(token, self.retry.interval(), async move {
            adapter.on_member_timer(&bridge, &member).await;
        });
    }

    /// Per-member reissue timer. A stuck attach re-enters the bridge-wide
    /// enable walk; a stuck detach re-issues the remove directly. Past the
    /// retry cap the member's device-user is released and the member is
    /// left in its last state.
    pub(crate) async fn on_member_timer(&self, bridge_name: &str, member_name: &str) {
        enum Next {
            Walk,
            Reissue(Rpc),
            Stop,
        }
        let next = {
            let Some(mut guard) = self.bridges.get_mut(bridge_name) else {
                return;
            };
            let br = &mut *guard;
            let Some(m) = br.members.get_mut(member_name) else {
                return;
            };
            match m.sync.tag() {
                tag @ (SyncTag::PendingAdd | SyncTag::PendingRemove) => {
                    let attempts = m.timer.bump();
                    if attempts > self.retry.max_attempts {
                        let err = BusDevError::ExhaustedRetries {
                            device: member_name.to_string(),
                            method: m.sync.reissue_method().map(|m| m.as_str()).unwrap_or(""),
                        };
                        error!(bridge = bridge_name, error = %err, "giving up on member operation");
                        m.timer.halt();
                        if m.claimed {
                            m.device.release();
                            m.claimed = false;
                        }
                        Next::Stop
                    } else if tag == SyncTag::PendingAdd {
                        Next::Walk
                    } else {
                        self.arm_member_timer(bridge_name, member_name, &mut m.timer);
                        Next::Reissue(Rpc::new(
                            HandlerMethod::Remove,
                            json!({ "bridge": bridge_name, "member": member_name }),
                            member_name,
                        ))
                    }
                }
                _ => Next::Stop,
            }
        };
        match next {
            Next::Walk => {
                let mut rpcs = Vec::new();
                {
                    let Some(mut guard) = self.bridges.get_mut(bridge_name) else {
                        return;
                    };
                    let br = &mut *guard;
                    if br.sync.is_synced() && br.active {
                        self.retry_enable_members_locked(bridge_name, br, &mut rpcs);
                    } else if let Some(m) = br.members.get_mut(member_name) {
                        // bridge still unconfirmed; keep the member timer
                        // counting toward its own cap
                        self.arm_member_timer(bridge_name, member_name, &mut m.timer);
                    }
                }
                self.flush_rpcs(rpcs).await;
            }
            Next::Reissue(rpc) => match self.class.link().peer() {
                Ok(peer) => {
                    let _ = self
                        .invoker
                        .invoke_async(peer, rpc.method, rpc.args, &rpc.device)
                        .await;
                }
                Err(_) => {
                    warn!(member = member_name, "handler not subscribed, reissue skipped")
                }
            },
            Next::Stop => {}
        }
    }
}
