use arc_swap::ArcSwap;
use busdev_error::{bus::BusError, BusDevError, BusDevResult};
use busdev_sdk::{BusTransport, PeerId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Subscription state of a handler link.
///
/// `Unresolved → Resolving → Subscribed ↔ Waiting`. A link that is not
/// `Subscribed` always has an object-added watch armed on the endpoint name
/// so that the handler's (re)appearance triggers exactly one subscribe
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unresolved,
    Resolving,
    Subscribed,
    Waiting,
}

#[derive(Debug, Clone)]
struct LinkSnapshot {
    state: LinkState,
    peer: Option<PeerId>,
}

/// Live subscription to one external handler's bus endpoint.
///
/// The current state is published through an atomically swapped snapshot so
/// adapter entry points can gate on it without locking.
pub struct HandlerLink {
    class: String,
    endpoint: String,
    bus: Arc<dyn BusTransport>,
    snapshot: ArcSwap<LinkSnapshot>,
}

impl HandlerLink {
    pub fn new(class: String, endpoint: String, bus: Arc<dyn BusTransport>) -> Self {
        Self {
            class,
            endpoint,
            bus,
            snapshot: ArcSwap::from_pointee(LinkSnapshot {
                state: LinkState::Unresolved,
                peer: None,
            }),
        }
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[inline]
    pub fn state(&self) -> LinkState {
        self.snapshot.load().state
    }

    #[inline]
    pub fn is_subscribed(&self) -> bool {
        self.state() == LinkState::Subscribed
    }

    /// Peer of the subscribed handler, or `HandlerAbsent` when the link is
    /// in any other state.
    pub fn peer(&self) -> BusDevResult<PeerId> {
        let snap = self.snapshot.load();
        match (snap.state, snap.peer) {
            (LinkState::Subscribed, Some(peer)) => Ok(peer),
            _ => Err(BusDevError::HandlerAbsent {
                class: self.class.clone(),
            }),
        }
    }

    fn store(&self, state: LinkState, peer: Option<PeerId>) {
        self.snapshot.store(Arc::new(LinkSnapshot { state, peer }));
    }

    async fn arm_watch(&self) {
        if let Err(e) = self.bus.watch_object_add(&self.endpoint).await {
            warn!(
                class = %self.class,
                endpoint = %self.endpoint,
                error = %e,
                "failed to arm object-added watch"
            );
        }
    }

    /// Translate the endpoint name to a peer identifier.
    ///
    /// On failure the link falls back to `Unresolved` with a watch armed so
    /// a later appearance of the endpoint restarts the subscription.
    pub async fn resolve(&self) -> BusDevResult<PeerId> {
        self.store(LinkState::Resolving, None);
        match self.bus.lookup(&self.endpoint).await {
            Ok(peer) => Ok(peer),
            Err(BusError::NotFound { .. }) => {
                self.store(LinkState::Unresolved, None);
                self.arm_watch().await;
                debug!(
                    class = %self.class,
                    endpoint = %self.endpoint,
                    "handler endpoint not on the bus, waiting for it to appear"
                );
                Err(BusDevError::HandlerAbsent {
                    class: self.class.clone(),
                })
            }
            Err(e) => {
                self.store(LinkState::Unresolved, None);
                self.arm_watch().await;
                Err(e.into())
            }
        }
    }

    /// Resolve the endpoint and subscribe to its notifications.
    pub async fn subscribe(&self) -> BusDevResult<()> {
        let peer = self.resolve().await?;
        match self.bus.subscribe(peer).await {
            Ok(()) => {
                self.store(LinkState::Subscribed, Some(peer));
                info!(class = %self.class, endpoint = %self.endpoint, %peer, "subscribed to handler");
                Ok(())
            }
            Err(e) => {
                self.store(LinkState::Waiting, None);
                self.arm_watch().await;
                warn!(
                    class = %self.class,
                    endpoint = %self.endpoint,
                    error = %e,
                    "subscription to handler failed"
                );
                Err(e.into())
            }
        }
    }

    /// The subscription was dropped by the bus (handler went away).
    ///
    /// Transitions `Subscribed → Waiting` and arms the reappearance watch.
    /// Outstanding shadow timers are left alone; their reissues fail until
    /// re-subscription completes.
    pub async fn handler_gone(&self) {
        warn!(class = %self.class, endpoint = %self.endpoint, "handler disappeared from the bus");
        self.store(LinkState::Waiting, None);
        self.arm_watch().await;
    }

    /// An object with `object` appeared on the bus.
    ///
    /// Idempotent: events for other names, or while already subscribed or
    /// mid-resolve, collapse into no work.
    pub async fn object_added(&self, object: &str) -> BusDevResult<()> {
        if object != self.endpoint {
            return Ok(());
        }
        match self.state() {
            LinkState::Subscribed | LinkState::Resolving => Ok(()),
            LinkState::Unresolved | LinkState::Waiting => self.subscribe().await,
        }
    }
}
