use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{error, info};

use crate::event::{EventCallback, WifiEvent};
use crate::platform::Platform;
use crate::service::{Supervisor, WifiClientService, WifiHotspotService};
use crate::{Error, Result};

/// High-level regime of the wireless interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    Client,
    Hotspot,
    WifiOff,
    /// Both units report active at once. A transient bug condition, never a
    /// target state.
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiStatus {
    pub ssid: String,
    pub ip: String,
    pub mac: String,
}

#[derive(Debug, Clone)]
pub struct WifiControlConfig {
    pub switch_fail_limit: u32,
    pub switch_fail_command: String,
}

/// Mode controller: enforces "exactly one of client/hotspot active", accounts
/// for switch failures, and aggregates status from whichever side is up.
pub struct WifiControl {
    client: Arc<dyn WifiClientService>,
    hotspot: Arc<dyn WifiHotspotService>,
    platform: Arc<dyn Platform>,
    config: WifiControlConfig,
    failures: AtomicU32,
    event_sources: Mutex<HashMap<WifiEvent, Arc<dyn Supervisor>>>,
}

impl WifiControl {
    pub fn new(
        client: Arc<dyn WifiClientService>,
        hotspot: Arc<dyn WifiHotspotService>,
        platform: Arc<dyn Platform>,
        config: WifiControlConfig,
    ) -> Arc<Self> {
        Arc::new(WifiControl {
            client,
            hotspot,
            platform,
            config,
            failures: AtomicU32::new(0),
            event_sources: Mutex::new(HashMap::new()),
        })
    }

    /// First registrant wins; later attempts are logged and dropped.
    pub fn register_event_source(&self, event: WifiEvent, source: Arc<dyn Supervisor>) {
        let mut sources = self.event_sources.lock().unwrap();
        if sources.contains_key(&event) {
            error!(%event, "event source already registered for event");
        } else {
            sources.insert(event, source);
        }
    }

    /// Forwards the callback to the supervisor registered for `event`;
    /// dropped (logged) when no source is known.
    pub fn register_callback(&self, event: WifiEvent, callback: EventCallback) {
        let source = self.event_sources.lock().unwrap().get(&event).cloned();
        match source {
            Some(source) => {
                if let Err(error) = source.register_callback(event, callback) {
                    error!(%event, %error, "failed to register callback");
                }
            }
            None => error!(%event, "event source not found for event"),
        }
    }

    pub async fn start_client_mode(&self) -> Result<()> {
        info!("starting client mode");

        let switch = async {
            if self.hotspot.is_active().await {
                self.hotspot.stop().await?;
            }
            if self.client.is_active().await {
                self.client.clone().restart().await
            } else {
                self.client.clone().start().await
            }
        };

        match switch.await {
            Ok(()) => {
                self.failures.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(error) => self.handle_failure(error).await,
        }
    }

    pub async fn start_hotspot_mode(&self) -> Result<()> {
        info!("starting hotspot mode");

        let switch = async {
            if self.client.is_active().await {
                self.client.stop().await?;
            }
            if self.hotspot.is_active().await {
                self.hotspot.clone().restart().await
            } else {
                self.hotspot.clone().start().await
            }
        };

        match switch.await {
            Ok(()) => {
                self.failures.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(error) => self.handle_failure(error).await,
        }
    }

    pub async fn state(&self) -> WifiMode {
        match (
            self.client.is_active().await,
            self.hotspot.is_active().await,
        ) {
            (true, true) => WifiMode::Ambiguous,
            (true, false) => WifiMode::Client,
            (false, true) => WifiMode::Hotspot,
            (false, false) => WifiMode::WifiOff,
        }
    }

    /// `{ssid, ip, mac}` of whichever side is active; `None` in the off and
    /// ambiguous states.
    pub async fn status(&self) -> Option<WifiStatus> {
        let ssid = match self.state().await {
            WifiMode::Client => self.client.connected_ssid().await?,
            WifiMode::Hotspot => self.hotspot.hotspot_ssid().to_string(),
            WifiMode::WifiOff | WifiMode::Ambiguous => return None,
        };

        Some(WifiStatus {
            ssid,
            ip: self.ip_address().await,
            mac: self.mac_address().await,
        })
    }

    pub async fn ip_address(&self) -> String {
        match self.state().await {
            WifiMode::Hotspot => self.hotspot.ip_address().await,
            _ => self.client.ip_address().await,
        }
    }

    pub async fn mac_address(&self) -> String {
        match self.state().await {
            WifiMode::Hotspot => self.hotspot.mac_address().await,
            _ => self.client.mac_address().await,
        }
    }

    pub fn network_count(&self) -> usize {
        self.client.network_count()
    }

    pub async fn add_network(&self, network: &crate::store::WifiNetwork) -> Result<()> {
        self.client.add_network(network).await
    }

    /// Self-diagnostic: the client came up but the interface still carries
    /// the hotspot's static address.
    pub async fn is_hotspot_ip_set(&self) -> bool {
        self.ip_address().await == self.hotspot.hotspot_ip()
    }

    pub fn client(&self) -> &Arc<dyn WifiClientService> {
        &self.client
    }

    async fn handle_failure(&self, error: Error) -> Result<()> {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        error!(%error, failures, "failed to switch mode");

        if failures >= self.config.switch_fail_limit {
            error!(
                limit = self.config.switch_fail_limit,
                action = %self.config.switch_fail_command,
                "switching modes failure limit reached, taking action"
            );
            if let Err(command_error) = self
                .platform
                .execute_command(&self.config.switch_fail_command)
                .await
            {
                error!(error = %command_error, "failure action failed");
            }
            self.failures.store(0, Ordering::SeqCst);
            Ok(())
        } else {
            Err(error)
        }
    }
}
