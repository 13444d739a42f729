use busdev_sdk::HandlerMethod;
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Which remote request, if any, a shadow is currently awaiting.
///
/// Pending states whose reissue argument varies carry it, so the timer
/// handler never reconstructs arguments by case analysis on shadow fields;
/// stateless requests (`free`, `prepare`, `add`, `remove`) are rebuilt from
/// the shadow's identity alone.
#[derive(Debug, Clone, Default)]
pub enum SyncState {
    #[default]
    Synced,
    PendingCreate(Arc<Value>),
    PendingReload(Arc<Value>),
    PendingFree,
    PendingDisable,
    PendingPrepare,
    PendingAdd,
    PendingRemove,
}

/// Payload-free tag of a [`SyncState`], for snapshots and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
    Synced,
    PendingCreate,
    PendingReload,
    PendingFree,
    PendingDisable,
    PendingPrepare,
    PendingAdd,
    PendingRemove,
}

impl SyncState {
    #[inline]
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncState::Synced)
    }

    #[inline]
    pub fn tag(&self) -> SyncTag {
        match self {
            SyncState::Synced => SyncTag::Synced,
            SyncState::PendingCreate(_) => SyncTag::PendingCreate,
            SyncState::PendingReload(_) => SyncTag::PendingReload,
            SyncState::PendingFree => SyncTag::PendingFree,
            SyncState::PendingDisable => SyncTag::PendingDisable,
            SyncState::PendingPrepare => SyncTag::PendingPrepare,
            SyncState::PendingAdd => SyncTag::PendingAdd,
            SyncState::PendingRemove => SyncTag::PendingRemove,
        }
    }

    /// The handler method a reissue of this state dispatches.
    pub fn reissue_method(&self) -> Option<HandlerMethod> {
        match self {
            SyncState::Synced => None,
            SyncState::PendingCreate(_) => Some(HandlerMethod::Create),
            SyncState::PendingReload(_) => Some(HandlerMethod::Reload),
            // a set-down bridge re-frees until the handler confirms
            SyncState::PendingFree | SyncState::PendingDisable => Some(HandlerMethod::Free),
            SyncState::PendingPrepare => Some(HandlerMethod::Prepare),
            SyncState::PendingAdd => Some(HandlerMethod::Add),
            SyncState::PendingRemove => Some(HandlerMethod::Remove),
        }
    }
}

impl Display for SyncTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncTag::Synced => "synced",
            SyncTag::PendingCreate => "pending-create",
            SyncTag::PendingReload => "pending-reload",
            SyncTag::PendingFree => "pending-free",
            SyncTag::PendingDisable => "pending-disable",
            SyncTag::PendingPrepare => "pending-prepare",
            SyncTag::PendingAdd => "pending-add",
            SyncTag::PendingRemove => "pending-remove",
        };
        f.write_str(s)
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.tag(), f)
    }
}

/// Single-shot reissue timer backing one pending remote operation.
///
/// Arming hands back a fresh cancellation token for the sleeper task;
/// disarming cancels it and resets the attempt counter. `halt` cancels
/// without resetting, which is the terminal shape after retries are
/// exhausted: attempts stay above the cap as the marker that no further
/// reissue may fire.
#[derive(Debug, Default)]
pub(crate) struct RetryTimer {
    token: Option<CancellationToken>,
    attempts: u32,
}

impl RetryTimer {
    #[inline]
    pub fn armed(&self) -> bool {
        self.token.is_some()
    }

    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Cancel any armed sleeper and hand back a token for the next one.
    /// The attempt counter carries over; it only resets on `disarm`.
    pub fn arm(&mut self) -> CancellationToken {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        let token = CancellationToken::new();
        self.token = Some(token.clone());
        token
    }

    /// Record one more reissue attempt.
    pub fn bump(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Cancel and reset. Used on the transition to `Synced`.
    pub fn disarm(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        self.attempts = 0;
    }

    /// Cancel without resetting the counter. Terminal.
    pub fn halt(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

/// Spawn the sleeper task behind an armed [`RetryTimer`].
///
/// The fire future runs once after `delay` unless the token is cancelled
/// first.
pub(crate) fn schedule_retry<Fut>(token: CancellationToken, delay: Duration, fire: Fut)
where
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => fire.await,
        }
    });
}
