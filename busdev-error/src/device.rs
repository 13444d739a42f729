use thiserror::Error;

/// Failures raised by the daemon's generic device layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("failed to claim device '{device}'")]
    ClaimFailed { device: String },
    #[error("device '{device}' is not present")]
    NotPresent { device: String },
    #[error("bridge has no members to bring up")]
    NoMembers,
    #[error("device state change rejected: {0}")]
    StateRejected(String),
}
