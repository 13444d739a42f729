use thiserror::Error;

pub type BusResult<T, E = BusError> = Result<T, E>;

/// Transport-level failures reported by the message bus.
///
/// These mirror the status vocabulary of the underlying bus: name
/// resolution, dispatch, and reply statuses all surface through this enum.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no such object on the bus: '{object}'")]
    NotFound { object: String },
    #[error("bus connection lost")]
    Disconnected,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("method not supported")]
    MethodNotSupported,
    #[error("request failed with status {status}")]
    RequestFailed { status: i32 },
    #[error("request timed out")]
    Timeout,
}

impl BusError {
    /// Numeric status carried back to the bus for notification replies.
    #[inline]
    pub fn status(&self) -> i32 {
        match self {
            BusError::NotFound { .. } => 4,
            BusError::Disconnected => 7,
            BusError::InvalidArgument => 2,
            BusError::MethodNotSupported => 5,
            BusError::RequestFailed { status } => *status,
            BusError::Timeout => 10,
        }
    }
}
