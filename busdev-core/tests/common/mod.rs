#![allow(dead_code)]

use async_trait::async_trait;
use busdev_core::{BusDevPlugin, ClassAdapter};
use busdev_error::bus::{BusError, BusResult};
use busdev_error::device::DeviceError;
use busdev_sdk::{
    BusTransport, ClassSpec, DeviceActivator, DeviceEvent, DeviceHandle, DeviceRegistry, PeerId,
    RetryPolicy,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ENDPOINT: &str = "h";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Let spawned timer/dispatch tasks run to completion.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time past one retry interval and settle.
pub async fn advance_one_interval() {
    tokio::time::advance(Duration::from_millis(1_000)).await;
    settle().await;
}

#[derive(Debug, Clone)]
pub struct BusCall {
    pub peer: PeerId,
    pub method: String,
    pub args: Value,
}

#[derive(Default)]
struct BusState {
    objects: HashMap<String, PeerId>,
    next_peer: u32,
    calls: Vec<BusCall>,
    subscribes: Vec<PeerId>,
    watches: Vec<String>,
    dispatch_fail: bool,
    invoke_reply: Option<Value>,
}

/// In-memory bus double: records every call, serves name resolution from a
/// configurable object table, and can be told to fail dispatches.
pub struct MockBus {
    state: Mutex<BusState>,
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BusState {
                next_peer: 1,
                ..Default::default()
            }),
        })
    }

    pub fn add_object(&self, name: &str) -> PeerId {
        let mut state = self.state.lock().unwrap();
        let peer = PeerId(state.next_peer);
        state.next_peer += 1;
        state.objects.insert(name.to_string(), peer);
        peer
    }

    pub fn remove_object(&self, name: &str) {
        self.state.lock().unwrap().objects.remove(name);
    }

    pub fn set_dispatch_fail(&self, fail: bool) {
        self.state.lock().unwrap().dispatch_fail = fail;
    }

    pub fn set_invoke_reply(&self, reply: Value) {
        self.state.lock().unwrap().invoke_reply = Some(reply);
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, method: &str) -> Vec<BusCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }

    pub fn subscribe_count(&self) -> usize {
        self.state.lock().unwrap().subscribes.len()
    }

    pub fn watch_count(&self) -> usize {
        self.state.lock().unwrap().watches.len()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }
}

#[async_trait]
impl BusTransport for MockBus {
    async fn lookup(&self, object: &str) -> BusResult<PeerId> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(object)
            .copied()
            .ok_or_else(|| BusError::NotFound {
                object: object.to_string(),
            })
    }

    async fn dispatch(&self, peer: PeerId, method: &str, args: Value) -> BusResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.dispatch_fail {
            return Err(BusError::RequestFailed { status: 7 });
        }
        state.calls.push(BusCall {
            peer,
            method: method.to_string(),
            args,
        });
        Ok(())
    }

    async fn invoke(&self, peer: PeerId, method: &str, args: Value) -> BusResult<Value> {
        let mut state = self.state.lock().unwrap();
        if state.dispatch_fail {
            return Err(BusError::RequestFailed { status: 7 });
        }
        state.calls.push(BusCall {
            peer,
            method: method.to_string(),
            args,
        });
        Ok(state.invoke_reply.clone().unwrap_or_else(|| json!({})))
    }

    async fn subscribe(&self, peer: PeerId) -> BusResult<()> {
        self.state.lock().unwrap().subscribes.push(peer);
        Ok(())
    }

    async fn watch_object_add(&self, object: &str) -> BusResult<()> {
        self.state.lock().unwrap().watches.push(object.to_string());
        Ok(())
    }
}

/// Device double with presence, claim accounting, and broadcast recording.
pub struct MockDevice {
    name: String,
    present: AtomicBool,
    claims: AtomicI32,
    claim_fail: AtomicBool,
    events: Mutex<Vec<DeviceEvent>>,
}

impl MockDevice {
    fn new(name: &str, present: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            present: AtomicBool::new(present),
            claims: AtomicI32::new(0),
            claim_fail: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn claims(&self) -> i32 {
        self.claims.load(Ordering::SeqCst)
    }

    pub fn set_claim_fail(&self, fail: bool) {
        self.claim_fail.store(fail, Ordering::SeqCst);
    }

    pub fn broadcasts_of(&self, event: DeviceEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == event)
            .count()
    }
}

impl DeviceHandle for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    fn claim(&self) -> Result<(), DeviceError> {
        if self.claim_fail.load(Ordering::SeqCst) {
            return Err(DeviceError::ClaimFailed {
                device: self.name.clone(),
            });
        }
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.claims.fetch_sub(1, Ordering::SeqCst);
    }

    fn broadcast(&self, event: DeviceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Activator double recording up/down transitions.
pub struct MockActivator {
    fail: AtomicBool,
    transitions: Mutex<Vec<bool>>,
}

impl MockActivator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            transitions: Mutex::new(Vec::new()),
        })
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn transitions(&self) -> Vec<bool> {
        self.transitions.lock().unwrap().clone()
    }
}

impl DeviceActivator for MockActivator {
    fn set_state(&self, up: bool) -> Result<(), DeviceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeviceError::StateRejected("mock failure".into()));
        }
        self.transitions.lock().unwrap().push(up);
        Ok(())
    }
}

/// Registry double handing out `MockDevice`s and per-device activators.
pub struct MockRegistry {
    devices: Mutex<HashMap<String, Arc<MockDevice>>>,
    activators: Mutex<HashMap<String, Arc<MockActivator>>>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(HashMap::new()),
            activators: Mutex::new(HashMap::new()),
        })
    }

    pub fn add_device(&self, name: &str, present: bool) -> Arc<MockDevice> {
        let device = MockDevice::new(name, present);
        self.devices
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&device));
        device
    }

    pub fn device(&self, name: &str) -> Option<Arc<MockDevice>> {
        self.devices.lock().unwrap().get(name).cloned()
    }

    pub fn activator_mock(&self, name: &str) -> Arc<MockActivator> {
        Arc::clone(
            self.activators
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_insert_with(MockActivator::new),
        )
    }
}

impl DeviceRegistry for MockRegistry {
    fn get(&self, name: &str, create: bool) -> Option<Arc<dyn DeviceHandle>> {
        let mut devices = self.devices.lock().unwrap();
        if let Some(device) = devices.get(name) {
            return Some(Arc::clone(device) as Arc<dyn DeviceHandle>);
        }
        if !create {
            return None;
        }
        let device = MockDevice::new(name, false);
        devices.insert(name.to_string(), Arc::clone(&device));
        Some(device as Arc<dyn DeviceHandle>)
    }

    fn activator(&self, name: &str) -> Option<Arc<dyn DeviceActivator>> {
        Some(self.activator_mock(name) as Arc<dyn DeviceActivator>)
    }
}

pub struct Harness {
    pub plugin: BusDevPlugin,
    pub bus: Arc<MockBus>,
    pub registry: Arc<MockRegistry>,
}

/// Harness whose handler endpoint is already published on the bus.
pub fn harness_with_handler() -> Harness {
    init_tracing();
    let bus = MockBus::new();
    bus.add_object(ENDPOINT);
    harness_on(bus)
}

/// Harness with an absent handler endpoint.
pub fn harness_without_handler() -> Harness {
    init_tracing();
    harness_on(MockBus::new())
}

fn harness_on(bus: Arc<MockBus>) -> Harness {
    let registry = MockRegistry::new();
    let plugin = BusDevPlugin::new(
        Arc::clone(&bus) as Arc<dyn BusTransport>,
        Arc::clone(&registry) as Arc<dyn DeviceRegistry>,
        RetryPolicy::default(),
    );
    Harness {
        plugin,
        bus,
        registry,
    }
}

pub fn bridge_class_spec() -> ClassSpec {
    serde_json::from_value(json!({
        "name": "ubr",
        "handler": ENDPOINT,
        "bridge": true,
        "br-prefix": "ubr",
        "config": [["empty", 7], ["ifname", 1]],
        "info": [["members", 1], ["mtu", 5]],
        "stats": [["rx_packets", 4], ["tx_packets", 4]],
    }))
    .expect("valid bridge class metadata")
}

pub fn device_class_spec() -> ClassSpec {
    serde_json::from_value(json!({
        "name": "utun",
        "handler": ENDPOINT,
        "config": [["mode", 3], ["mtu", 5]],
        "info": [["mode", 3]],
    }))
    .expect("valid device class metadata")
}

/// Drive a bridge through create, config-init, member appearance, and the
/// full notification round-trip until it is synchronized and active.
pub async fn bring_up_bridge(
    harness: &Harness,
    adapter: &ClassAdapter,
    name: &str,
    members: &[&str],
) {
    let config = if members.is_empty() {
        json!({ "empty": true })
    } else {
        json!({ "ifname": members })
    };
    adapter.create(name, config).await.expect("bridge create");
    adapter.config_init(name).await.expect("bridge config-init");
    for member in members {
        let device = harness.registry.device(member).expect("member device");
        device.set_present(true);
        adapter.handle_device_event(member, DeviceEvent::Add).await;
    }
    adapter
        .handle_notification("create", &json!({ "devices": [name] }))
        .await
        .expect("create notification");
    if !members.is_empty() {
        // let the scheduled member walk dispatch the attach calls
        advance_one_interval().await;
        for member in members {
            adapter
                .handle_notification("add", &json!({ "bridge": name, "member": member }))
                .await
                .expect("add notification");
        }
    }
}
