use busdev_error::BusDevResult;
use busdev_sdk::{BusTransport, HandlerMethod, PeerId};
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

/// One remote call queued while a shadow guard was held.
///
/// Shadow mutation and RPC dispatch are kept apart: entry points mutate
/// state under the shadow-map guard and collect the calls to make, then
/// flush them after the guard is dropped.
#[derive(Debug)]
pub(crate) struct Rpc {
    pub method: HandlerMethod,
    pub args: Value,
    pub device: String,
}

impl Rpc {
    pub fn new(method: HandlerMethod, args: Value, device: &str) -> Self {
        Self {
            method,
            args,
            device: device.to_string(),
        }
    }
}

/// RPC dispatch on behalf of shadows.
///
/// `invoke_async` returns once the request is on the wire; the outcome of
/// the remote operation is observed only through notifications, never
/// through the call itself. `invoke_sync` waits for the reply and is used
/// only by the dump paths.
#[derive(Clone)]
pub(crate) struct Invoker {
    bus: Arc<dyn BusTransport>,
}

impl Invoker {
    pub fn new(bus: Arc<dyn BusTransport>) -> Self {
        Self { bus }
    }

    pub async fn invoke_async(
        &self,
        peer: PeerId,
        method: HandlerMethod,
        args: Value,
        device: &str,
    ) -> BusDevResult<()> {
        self.bus
            .dispatch(peer, method.as_str(), args)
            .await
            .map_err(|e| {
                error!(
                    device,
                    method = %method,
                    error = %e,
                    "invocation of handler method failed"
                );
                e.into()
            })
    }

    pub async fn invoke_sync(
        &self,
        peer: PeerId,
        method: HandlerMethod,
        args: Value,
        device: &str,
    ) -> BusDevResult<Value> {
        self.bus
            .invoke(peer, method.as_str(), args)
            .await
            .map_err(|e| {
                error!(
                    device,
                    method = %method,
                    error = %e,
                    "invocation of handler method failed"
                );
                e.into()
            })
    }
}
