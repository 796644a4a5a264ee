use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use super::{
    client_state_event, ServiceCore, ServiceDependencies, Supervisor, WifiClientService,
    WifiService, CLIENT_STATE_EVENTS,
};
use crate::event::{EventData, WifiEvent};
use crate::nm_dbus::{device_state, NetworkManagerDbus};
use crate::store::{NetworkStore, WifiNetwork};
use crate::Result;

const UNIT_PATH: &str = "/org/freedesktop/systemd1/unit/NetworkManager_2eservice";

/// NetworkManager supervisor: the Debian 12+ client variant. Credentials are
/// keyfiles NetworkManager picks up itself, so `add_network` only touches the
/// store; association state comes from the wlan device's StateChanged signal.
pub struct NetworkManagerService {
    core: ServiceCore,
    store: Arc<dyn NetworkStore>,
    dbus: Arc<NetworkManagerDbus>,
}

impl NetworkManagerService {
    pub fn new(
        deps: ServiceDependencies,
        store: Arc<dyn NetworkStore>,
        dbus: Arc<NetworkManagerDbus>,
    ) -> Arc<Self> {
        Arc::new(NetworkManagerService {
            core: ServiceCore::new("NetworkManager", UNIT_PATH, deps),
            store,
            dbus,
        })
    }
}

#[async_trait]
impl Supervisor for NetworkManagerService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn supported_events(&self) -> Vec<WifiEvent> {
        let mut events = vec![
            WifiEvent::ClientDisabled,
            WifiEvent::ClientInactive,
            WifiEvent::ClientDisconnected,
            WifiEvent::ClientScanning,
            WifiEvent::ClientConnecting,
            WifiEvent::ClientIpAcquired,
            WifiEvent::ClientConnected,
            WifiEvent::ClientDisconnecting,
        ];
        events.extend(CLIENT_STATE_EVENTS);
        events
    }

    fn map_unit_state(&self, state: &str) -> Option<WifiEvent> {
        client_state_event(state)
    }

    /// The wlan device registers on the bus some time after the unit goes
    /// active, so the handler attach retries until it appears.
    async fn complete_start(self: Arc<Self>) -> Result<()> {
        let mut states = self.dbus.state_changes().await?;
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(state) = states.next().await {
                debug!(state, "NetworkManager device state changed");
                if let Some(event) = nm_state_event(state) {
                    this.execute_callback(event, EventData::default()).await;
                }
            }
        });

        self.dbus.enable_wireless().await
    }
}

#[async_trait]
impl WifiService for NetworkManagerService {
    fn interface(&self) -> &str {
        self.dbus.interface()
    }
}

#[async_trait]
impl WifiClientService for NetworkManagerService {
    async fn connected_ssid(&self) -> Option<String> {
        self.dbus.active_ssid().await
    }

    fn network_count(&self) -> usize {
        self.store.list().len()
    }

    fn networks(&self) -> Vec<WifiNetwork> {
        self.store.list()
    }

    async fn add_network(&self, network: &WifiNetwork) -> Result<()> {
        self.store.add(network)
    }

    async fn reset_wireless(&self) -> Result<()> {
        self.dbus.reset_wireless().await
    }
}

/// NetworkManager device state codes mapped to events.
fn nm_state_event(state: u32) -> Option<WifiEvent> {
    match state {
        device_state::UNKNOWN | device_state::UNMANAGED => Some(WifiEvent::ClientDisabled),
        device_state::UNAVAILABLE => Some(WifiEvent::ClientInactive),
        device_state::DISCONNECTED => Some(WifiEvent::ClientDisconnected),
        device_state::PREPARE => Some(WifiEvent::ClientScanning),
        device_state::CONFIG | device_state::IP_CONFIG => Some(WifiEvent::ClientConnecting),
        device_state::IP_CHECK => Some(WifiEvent::ClientIpAcquired),
        device_state::ACTIVATED => Some(WifiEvent::ClientConnected),
        device_state::DEACTIVATING => Some(WifiEvent::ClientDisconnecting),
        device_state::FAILED => Some(WifiEvent::ClientFailed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_states_map_to_client_events() {
        assert_eq!(nm_state_event(10), Some(WifiEvent::ClientDisabled));
        assert_eq!(nm_state_event(20), Some(WifiEvent::ClientInactive));
        assert_eq!(nm_state_event(40), Some(WifiEvent::ClientScanning));
        assert_eq!(nm_state_event(70), Some(WifiEvent::ClientConnecting));
        assert_eq!(nm_state_event(80), Some(WifiEvent::ClientIpAcquired));
        assert_eq!(nm_state_event(100), Some(WifiEvent::ClientConnected));
        assert_eq!(nm_state_event(120), Some(WifiEvent::ClientFailed));
        // intermediate codes with no mapping stay silent
        assert_eq!(nm_state_event(60), None);
    }
}
