use busdev_error::device::DeviceError;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// Events broadcast by the daemon's generic device object to its users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Add,
    Remove,
    TopologyChange,
    SetUp,
    SetDown,
}

impl Display for DeviceEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceEvent::Add => "add",
            DeviceEvent::Remove => "remove",
            DeviceEvent::TopologyChange => "topology-change",
            DeviceEvent::SetUp => "up",
            DeviceEvent::SetDown => "down",
        };
        f.write_str(s)
    }
}

/// Outcome of applying a configuration to an existing device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    /// The new configuration is identical to the current one.
    NoChange,
    /// The configuration was absorbed without restarting the device.
    Applied,
    /// The device must be torn down and brought back up.
    Restart,
}

/// Handle onto one device owned by the daemon's device registry.
///
/// The registry keeps lifecycle flags and user/claim accounting; the engine
/// only reads and flips the narrow surface below.
pub trait DeviceHandle: Send + Sync {
    fn name(&self) -> &str;

    fn present(&self) -> bool;

    fn set_present(&self, present: bool);

    /// Claim the local I/O path of the device on behalf of a user.
    fn claim(&self) -> Result<(), DeviceError>;

    /// Release a previously claimed device.
    fn release(&self);

    /// Broadcast an event to every registered user of the device.
    fn broadcast(&self, event: DeviceEvent);
}

/// Bring-up/tear-down capability of a generic device.
///
/// Bridge shadows compose this instead of saving and replacing a state
/// callback on the device itself; the daemon hands out the generic
/// implementation and the shadow delegates to it when the remote handler
/// confirms creation.
pub trait DeviceActivator: Send + Sync {
    fn set_state(&self, up: bool) -> Result<(), DeviceError>;
}

/// Lookup surface of the daemon's device registry.
pub trait DeviceRegistry: Send + Sync {
    /// Look up a device by name. With `create` set, a plain device record
    /// is allocated when none exists.
    fn get(&self, name: &str, create: bool) -> Option<Arc<dyn DeviceHandle>>;

    /// The generic activator for a device, used by bridge shadows to bring
    /// the underlying device up or down.
    fn activator(&self, name: &str) -> Option<Arc<dyn DeviceActivator>>;
}
