mod bus;
mod class;
mod device;
mod retry;
mod schema;

pub use bus::{
    BusTransport, DeviceListPayload, HandlerMethod, HotplugPayload, PeerId, SUBSCRIBER_PREFIX,
};
pub use class::ClassSpec;
pub use device::{ConfigChange, DeviceActivator, DeviceEvent, DeviceHandle, DeviceRegistry};
pub use retry::RetryPolicy;
pub use schema::{BlobSchema, FieldSpec, FieldType};
