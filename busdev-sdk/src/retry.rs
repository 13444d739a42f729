use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded reissue policy for pending remote operations.
///
/// The synchronization protocol reissues the outstanding request at a fixed
/// period until the handler's notification confirms it, capped at
/// `max_attempts` reissues beyond the original dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of reissues before the operation is abandoned.
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: u32,

    /// Reissue period in milliseconds.
    #[serde(default = "RetryPolicy::default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            interval_ms: Self::default_interval_ms(),
        }
    }
}

impl RetryPolicy {
    fn default_max_attempts() -> u32 {
        3
    }

    fn default_interval_ms() -> u64 {
        1_000
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}
