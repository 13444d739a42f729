//! State-synchronization engine for externally handled device classes.
//!
//! For each registered class the daemon gets a [`ClassAdapter`] that
//! translates device-type operations into remote calls on the class's
//! external handler, keeps a per-device shadow in sync through the
//! handler's notifications, and bounds every outstanding request with a
//! reissue timer.

mod adapter;
mod bridge;
mod class;
mod invoker;
mod link;
mod member;
mod notify;
mod registry;
mod shadow;
mod sync;

pub use adapter::{BridgeSnapshot, ClassAdapter, DeviceSnapshot, MemberSnapshot};
pub use class::DeviceClass;
pub use link::{HandlerLink, LinkState};
pub use registry::{BusDevPlugin, CONFIG_SUBDIR};
pub use sync::{SyncState, SyncTag};
