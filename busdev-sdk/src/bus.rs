use async_trait::async_trait;
use busdev_error::bus::BusResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};

/// Object-name prefix under which per-class subscriber objects are
/// registered on the bus. The full name is `<prefix><handler endpoint>`.
pub const SUBSCRIBER_PREFIX: &str = "network.device.ubus.";

/// Bus peer identifier obtained from name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{:08x}", self.0)
    }
}

/// Method vocabulary of the external handler interface.
///
/// `CheckState` is part of the vocabulary but reserved; the engine never
/// invokes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMethod {
    Create,
    ConfigInit,
    Reload,
    DumpInfo,
    DumpStats,
    CheckState,
    Free,
    Add,
    Remove,
    Prepare,
}

impl HandlerMethod {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            HandlerMethod::Create => "create",
            HandlerMethod::ConfigInit => "config_init",
            HandlerMethod::Reload => "reload",
            HandlerMethod::DumpInfo => "dump_info",
            HandlerMethod::DumpStats => "dump_stats",
            HandlerMethod::CheckState => "check_state",
            HandlerMethod::Free => "free",
            HandlerMethod::Add => "add",
            HandlerMethod::Remove => "remove",
            HandlerMethod::Prepare => "prepare",
        }
    }
}

impl Display for HandlerMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrow view of the local message bus consumed by the engine.
///
/// The concrete transport (request framing, reply demultiplexing, event
/// registration) lives outside the plug-in; the engine only needs name
/// resolution, two dispatch flavors, subscription, and a one-shot
/// object-added watch.
#[async_trait]
pub trait BusTransport: Send + Sync + 'static {
    /// Translate an object name to a peer identifier.
    async fn lookup(&self, object: &str) -> BusResult<PeerId>;

    /// Dispatch `method` on `peer` without waiting for the reply.
    ///
    /// Returns once the request has been accepted by the bus. Completion of
    /// the remote call is observed only through subscription notifications.
    async fn dispatch(&self, peer: PeerId, method: &str, args: Value) -> BusResult<()>;

    /// Invoke `method` on `peer` and wait for the reply blob.
    async fn invoke(&self, peer: PeerId, method: &str, args: Value) -> BusResult<Value>;

    /// Subscribe to notifications published by `peer`.
    async fn subscribe(&self, peer: PeerId) -> BusResult<()>;

    /// Arm a one-shot watch that fires when an object named `object`
    /// appears on the bus. Arming an already-armed watch collapses into a
    /// single pending watch.
    async fn watch_object_add(&self, object: &str) -> BusResult<()>;
}

/// Payload shape of `create`, `reload`, and `free` notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceListPayload {
    pub devices: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload shape of `prepare`, `add`, and `remove` notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct HotplugPayload {
    pub bridge: String,
    #[serde(default)]
    pub member: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
