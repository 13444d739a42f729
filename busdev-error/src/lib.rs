pub mod bus;
pub mod device;

use bus::BusError;
use device::DeviceError;
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use thiserror::Error;

pub type BusDevResult<T, E = BusDevError> = Result<T, E>;

/// Top-level error taxonomy of the plug-in.
///
/// Variants map onto the surfaced failure classes: `HandlerAbsent` is a
/// warn-level typed failure that performs no state mutation, `Transport`
/// leaves the affected shadow in its pending state for the retry timer,
/// `Protocol` drops the offending notification, and `ExhaustedRetries` is
/// terminal for the operation that hit it.
#[derive(Error, Debug)]
pub enum BusDevError {
    #[error("no live handler subscription for device class '{class}'")]
    HandlerAbsent { class: String },
    #[error("{0}")]
    Transport(#[from] BusError),
    #[error("malformed notification: {0}")]
    Protocol(String),
    #[error("unknown device or member: {0}")]
    NotFound(String),
    #[error("retries exhausted for device '{device}' (method '{method}')")]
    ExhaustedRetries { device: String, method: &'static str },
    #[error("class metadata error: {0}")]
    Config(String),
    #[error("{0}")]
    Device(#[from] DeviceError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
    #[error("{0}")]
    Io(#[from] IoError),
    #[error("{0}")]
    Msg(String),
}

impl From<String> for BusDevError {
    #[inline]
    fn from(e: String) -> Self {
        BusDevError::Msg(e)
    }
}

impl From<&str> for BusDevError {
    #[inline]
    fn from(e: &str) -> Self {
        BusDevError::Msg(e.to_string())
    }
}

impl BusDevError {
    /// True when the failure means the remote handler is unreachable and the
    /// caller should skip RPC entirely.
    #[inline]
    pub fn is_handler_absent(&self) -> bool {
        matches!(self, BusDevError::HandlerAbsent { .. })
    }
}
