use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;

/// Closed enumeration of everything the supervisors can report upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WifiEvent {
    ClientStarted,
    ClientStopped,
    ClientFailed,
    ClientDisabled,
    ClientInactive,
    ClientScanning,
    ClientConnecting,
    ClientConnected,
    ClientDisconnecting,
    ClientDisconnected,
    ClientIpAcquired,
    HotspotStarted,
    HotspotStopped,
    HotspotFailed,
    HotspotPeerConnected,
    HotspotPeerReconnected,
    HotspotPeerDisconnected,
}

impl fmt::Display for WifiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// DHCP lease holder reported by the hotspot's DHCP server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub name: String,
    pub ip: String,
    pub mac: String,
}

/// Payload attached to an event delivery. Lifecycle events carry nothing,
/// peer events carry the lease holder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventData {
    pub peer: Option<PeerInfo>,
}

impl EventData {
    pub fn peer(peer: PeerInfo) -> Self {
        EventData { peer: Some(peer) }
    }
}

/// Handler invoked by a supervisor when the event it is registered for fires.
/// Delivery is serialized per unit; the future completes before the next
/// event from the same unit is dispatched.
pub type EventCallback = Arc<dyn Fn(WifiEvent, EventData) -> BoxFuture<'static, ()> + Send + Sync>;

/// Convenience for building an [`EventCallback`] out of an async closure.
pub fn callback<F, Fut>(f: F) -> EventCallback
where
    F: Fn(WifiEvent, EventData) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event, data| Box::pin(f(event, data)))
}
