use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::blink::{BlinkControl, BlinkDevice};
use crate::control::{WifiControl, WifiMode};
use crate::event::{EventData, WifiEvent};
use crate::monitor::ConnectionMonitor;
use crate::timer::ReusableTimer;

/// Operator request to provision a network, from the JSON API or web form.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkRequest {
    pub ssid: String,
    pub password: String,
    #[serde(default)]
    pub priority: Option<i32>,
}

const MIN_PASSWORD_LEN: usize = 8;

/// Timeout-driven policy layer: wires the unified event stream to mode
/// transitions through one re-armable timer, and carries the operator
/// actions the control plane calls into.
pub struct WifiEventHandler {
    control: Arc<WifiControl>,
    timer: Arc<ReusableTimer>,
    monitor: Arc<ConnectionMonitor>,
    blink: Arc<BlinkControl>,
    blink_device: Arc<Mutex<Box<dyn BlinkDevice>>>,
    client_timeout: Duration,
    peer_timeout: Duration,
}

impl WifiEventHandler {
    pub fn new(
        control: Arc<WifiControl>,
        timer: Arc<ReusableTimer>,
        monitor: Arc<ConnectionMonitor>,
        blink: Arc<BlinkControl>,
        blink_device: Box<dyn BlinkDevice>,
        client_timeout: Duration,
        peer_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(WifiEventHandler {
            control,
            timer,
            monitor,
            blink,
            blink_device: Arc::new(Mutex::new(blink_device)),
            client_timeout,
            peer_timeout,
        })
    }

    pub fn register_event_handlers(self: Arc<Self>) {
        Self::register(&self, WifiEvent::ClientStarted, Self::on_client_not_connected);
        Self::register(&self, WifiEvent::ClientDisabled, Self::on_client_not_connected);
        Self::register(&self, WifiEvent::ClientInactive, Self::on_client_not_connected);
        Self::register(&self, WifiEvent::ClientScanning, Self::on_client_not_connected);
        Self::register(&self, WifiEvent::ClientDisconnected, Self::on_client_not_connected);
        Self::register(&self, WifiEvent::ClientConnected, Self::on_client_connected);
        Self::register(&self, WifiEvent::ClientIpAcquired, Self::on_client_ip_acquired);

        Self::register(&self, WifiEvent::HotspotStarted, Self::on_hotspot_started);
        Self::register(&self, WifiEvent::HotspotPeerConnected, Self::on_peer_connected);
        Self::register(&self, WifiEvent::HotspotPeerReconnected, Self::on_peer_connected);
        Self::register(&self, WifiEvent::HotspotPeerDisconnected, Self::on_peer_disconnected);
    }

    fn register<F, Fut>(this: &Arc<Self>, event: WifiEvent, handler: F)
    where
        F: Fn(Arc<Self>, WifiEvent, EventData) -> Fut + Send + Sync + Copy + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let control = this.control.clone();
        let this = this.clone();
        control.register_callback(
            event,
            crate::event::callback(move |event, data| handler(this.clone(), event, data)),
        );
    }

    // ---- operator actions ----

    /// Validates and stores a new network. Success means the credentials are
    /// persisted; the actual client switch happens in
    /// [`on_add_network_completed`] once the HTTP response is out.
    pub async fn on_add_network_requested(&self, request: &NetworkRequest) -> bool {
        if request.password.len() < MIN_PASSWORD_LEN {
            return false;
        }

        let network = crate::store::WifiNetwork {
            ssid: request.ssid.clone(),
            password: request.password.clone(),
            enabled: true,
            priority: request
                .priority
                .unwrap_or(self.control.network_count() as i32),
        };

        match self.control.add_network(&network).await {
            Ok(()) => {
                info!(ssid = %network.ssid, "added network");
                true
            }
            Err(add_error) => {
                error!(ssid = %network.ssid, error = %add_error, "failed to add network");
                false
            }
        }
    }

    pub async fn on_add_network_completed(self: Arc<Self>) {
        info!("configuration completed");
        match self.control.start_client_mode().await {
            Ok(()) => self.timer.cancel(),
            Err(switch_error) => {
                self.timer.restart();
                error!(error = %switch_error, "failed to (re)start client mode");
            }
        }
    }

    pub async fn on_restart_requested(self: Arc<Self>) -> bool {
        info!("client restart requested");
        match self.control.start_client_mode().await {
            Ok(()) => {
                self.timer.cancel();
                true
            }
            Err(switch_error) => {
                error!(error = %switch_error, "failed to restart client mode");
                false
            }
        }
    }

    /// Runs the blink waveform on a blocking worker; one identification at a
    /// time (the device mutex serializes concurrent requests).
    pub async fn on_identify_requested(self: Arc<Self>) -> bool {
        info!("sending identification signal");
        let blink = self.blink.clone();
        let device = self.blink_device.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut device = device.lock().unwrap();
            blink.blink(device.as_mut())
        })
        .await;

        match result {
            Ok(Ok(())) => true,
            Ok(Err(blink_error)) => {
                error!(error = %blink_error, "identification signal failed");
                false
            }
            Err(join_error) => {
                error!(error = %join_error, "identification task panicked");
                false
            }
        }
    }

    // ---- event reactions ----

    async fn on_client_not_connected(self: Arc<Self>, event: WifiEvent, _data: EventData) {
        let state = self.control.state().await;
        info!(
            wifi_mode = ?state,
            wifi_event = %event,
            timeout_seconds = self.client_timeout.as_secs(),
            "trying to connect to a network"
        );
        self.monitor.stop();

        let this = self.clone();
        self.timer.start(self.client_timeout, move || {
            this.clone().on_client_connect_timeout()
        });
    }

    async fn on_client_connected(self: Arc<Self>, event: WifiEvent, _data: EventData) {
        let state = self.control.state().await;
        let status = self.control.status().await;
        info!(wifi_mode = ?state, wifi_event = %event, network = ?status, "connected to network");
        self.timer.cancel();
    }

    async fn on_client_ip_acquired(self: Arc<Self>, event: WifiEvent, _data: EventData) {
        let state = self.control.state().await;
        let status = self.control.status().await;
        info!(wifi_mode = ?state, wifi_event = %event, network = ?status, "IP address acquired");
        self.monitor.clone().start();
    }

    async fn on_hotspot_started(self: Arc<Self>, event: WifiEvent, _data: EventData) {
        let state = self.control.state().await;
        let status = self.control.status().await;
        info!(wifi_mode = ?state, wifi_event = %event, hotspot = ?status, "started hotspot");
        self.monitor.stop();

        if self.control.network_count() > 0 {
            let this = self.clone();
            self.timer.start(self.peer_timeout, move || {
                this.clone().on_peer_connect_timeout()
            });
        }
    }

    async fn on_peer_connected(self: Arc<Self>, event: WifiEvent, data: EventData) {
        let state = self.control.state().await;
        info!(wifi_mode = ?state, wifi_event = %event, peer = ?data.peer, "peer connected");
        self.timer.cancel();
    }

    async fn on_peer_disconnected(self: Arc<Self>, event: WifiEvent, data: EventData) {
        let state = self.control.state().await;
        info!(wifi_mode = ?state, wifi_event = %event, peer = ?data.peer, "peer disconnected");

        if state != WifiMode::Hotspot || self.control.network_count() == 0 {
            return;
        }

        self.timer.cancel();
        if let Err(switch_error) = self.control.start_client_mode().await {
            error!(error = %switch_error, "failed switching to client mode");
            self.timer.restart();
        }
    }

    async fn on_client_connect_timeout(self: Arc<Self>) {
        let state = self.control.state().await;
        info!(
            wifi_mode = ?state,
            timeout_seconds = self.client_timeout.as_secs(),
            "waiting for connection timed out"
        );
        if let Err(switch_error) = self.control.start_hotspot_mode().await {
            error!(wifi_mode = ?state, error = %switch_error, "failed switching to hotspot mode");
            self.timer.restart();
        }
    }

    async fn on_peer_connect_timeout(self: Arc<Self>) {
        let state = self.control.state().await;
        info!(
            wifi_mode = ?state,
            timeout_seconds = self.peer_timeout.as_secs(),
            "waiting for peers timed out"
        );
        if let Err(switch_error) = self.control.start_client_mode().await {
            error!(error = %switch_error, "failed switching to client mode");
            self.timer.restart();
        }
    }

    pub fn cancel_timer(&self) {
        self.timer.cancel();
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer.is_alive()
    }

    pub fn stop_monitor(&self) {
        self.monitor.stop();
    }
}
