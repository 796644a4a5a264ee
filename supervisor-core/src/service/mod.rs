mod avahi;
mod dhcpcd;
mod dnsmasq;
mod hostapd;
mod network_manager;
mod resolved;
mod wpa;

pub use avahi::AvahiService;
pub use dhcpcd::DhcpcdService;
pub use dnsmasq::{DnsmasqConfig, DnsmasqService};
pub use hostapd::{HostapdConfig, HostapdService};
pub use network_manager::NetworkManagerService;
pub use resolved::SystemdResolvedService;
pub use wpa::WpaSupplicantService;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::event::{EventCallback, EventData, WifiEvent};
use crate::journal::Journal;
use crate::platform::Platform;
use crate::store::WifiNetwork;
use crate::systemd::Systemd;
use crate::{Error, Result};

/// Journal lines dumped when a unit enters `failed`.
const FAILURE_JOURNAL_LINES: u32 = 5;

/// One-shot latch, set once when the unit completes `activating → active`
/// after a controlled config reload.
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Latch { tx }
    }

    pub fn set(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|latched| *latched).await;
    }
}

/// Shared collaborators injected into every supervisor.
#[derive(Clone)]
pub struct ServiceDependencies {
    pub platform: Arc<dyn Platform>,
    pub systemd: Arc<dyn Systemd>,
    pub journal: Arc<dyn Journal>,
}

/// Lifecycle state shared by all supervisor variants. Variants embed one of
/// these instead of inheriting from a base class.
pub struct ServiceCore {
    name: String,
    unit_path: String,
    deps: ServiceDependencies,
    auto_start: AtomicBool,
    force_stop: AtomicBool,
    failed: AtomicBool,
    last_state: Mutex<Option<String>>,
    config_reloaded: Latch,
    callbacks: Mutex<HashMap<WifiEvent, EventCallback>>,
}

impl ServiceCore {
    pub fn new(
        name: impl Into<String>,
        unit_path: impl Into<String>,
        deps: ServiceDependencies,
    ) -> Self {
        ServiceCore {
            name: name.into(),
            unit_path: unit_path.into(),
            deps,
            auto_start: AtomicBool::new(true),
            force_stop: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            last_state: Mutex::new(None),
            config_reloaded: Latch::new(),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_path(&self) -> &str {
        &self.unit_path
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.deps.platform
    }

    pub fn systemd(&self) -> &Arc<dyn Systemd> {
        &self.deps.systemd
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.deps.journal
    }

    pub fn set_auto_start(&self, auto_start: bool) {
        self.auto_start.store(auto_start, Ordering::SeqCst);
    }

    pub fn set_force_stop(&self, force_stop: bool) {
        self.force_stop.store(force_stop, Ordering::SeqCst);
    }

    pub fn is_auto_start(&self) -> bool {
        !self.is_force_stop() && self.auto_start.load(Ordering::SeqCst)
    }

    pub fn is_force_stop(&self) -> bool {
        self.force_stop.load(Ordering::SeqCst)
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn set_failed(&self, failed: bool) {
        self.failed.store(failed, Ordering::SeqCst);
    }

    pub fn config_reloaded(&self) -> &Latch {
        &self.config_reloaded
    }

    fn last_state(&self) -> Option<String> {
        self.last_state.lock().unwrap().clone()
    }

    fn set_last_state(&self, state: &str) {
        *self.last_state.lock().unwrap() = Some(state.to_string());
    }

    fn store_callback(&self, event: WifiEvent, callback: EventCallback) {
        let mut callbacks = self.callbacks.lock().unwrap();
        if callbacks.insert(event, callback).is_some() {
            warn!(service = %self.name, %event, "overwriting existing callback");
        }
    }

    fn callback_for(&self, event: WifiEvent) -> Option<EventCallback> {
        self.callbacks.lock().unwrap().get(&event).cloned()
    }
}

/// Per-unit supervisor: owns the unit's lifecycle, reconciles it to the
/// desired configuration and fans unit signals out as [`WifiEvent`]s.
///
/// Default method bodies implement the shared protocol; variants override the
/// small hooks (`prepare_start`, `need_config_setup`, `map_unit_state`, ...).
#[async_trait]
pub trait Supervisor: Send + Sync + 'static {
    fn core(&self) -> &ServiceCore;

    fn supported_events(&self) -> Vec<WifiEvent> {
        Vec::new()
    }

    /// Maps a unit `ActiveState` onto the high-level event it implies.
    fn map_unit_state(&self, _state: &str) -> Option<WifiEvent> {
        None
    }

    /// Runs before the unit is (re)started, e.g. clearing a stale address or
    /// run file.
    async fn prepare_start(&self) -> Result<()> {
        Ok(())
    }

    /// Runs after the unit has been commanded to start, e.g. attaching
    /// D-Bus handlers the daemon only exposes once alive.
    async fn complete_start(self: Arc<Self>) -> Result<()> {
        Ok(())
    }

    async fn need_config_setup(&self) -> Result<bool> {
        Ok(false)
    }

    async fn setup_config(&self) -> Result<()> {
        Ok(())
    }

    async fn reload_config(&self) -> Result<()> {
        let core = self.core();
        core.systemd().restart_service(core.name()).await
    }

    /// Subscribes to signals owned by the supervised daemon itself (not
    /// systemd), e.g. wpa_supplicant state or dnsmasq leases.
    async fn setup_custom_events(self: Arc<Self>) -> Result<()> {
        Ok(())
    }

    // ---- provided protocol ----

    /// One-time reconciliation; must run before `start`/`stop`. Any subphase
    /// failure is fatal for the daemon.
    async fn setup(self: Arc<Self>) -> Result<()> {
        let name = self.core().name().to_string();
        self.run_setup_phases()
            .await
            .map_err(|error| Error::service(name, error))
    }

    async fn run_setup_phases(self: Arc<Self>) -> Result<()> {
        self.setup_masking().await?;
        self.clone().setup_auto_start().await?;
        self.clone().subscribe_unit_state().await?;
        self.clone().setup_config_and_reload().await?;
        self.setup_custom_events().await?;
        Ok(())
    }

    async fn setup_masking(&self) -> Result<()> {
        let core = self.core();
        let systemd = core.systemd();

        if core.is_force_stop() {
            if !systemd.is_masked(core.name()).await {
                info!(service = %core.name(), "service is unmasked, masking service");
                systemd.mask_service(core.name()).await?;
                systemd.reload_daemon().await?;
            }
        } else if systemd.is_masked(core.name()).await {
            info!(service = %core.name(), "service is masked, unmasking service");
            systemd.unmask_service(core.name()).await?;
            systemd.reload_daemon().await?;
        }
        Ok(())
    }

    async fn setup_auto_start(self: Arc<Self>) -> Result<()> {
        let core = self.core();
        if core.is_auto_start() {
            if !self.is_enabled().await {
                info!(service = %core.name(), "service is not enabled, enabling service");
                core.systemd().enable_service(core.name()).await?;
            }
            self.clone().start().await
        } else {
            if self.is_enabled().await {
                info!(service = %core.name(), "service is enabled, disabling service");
                core.systemd().disable_service(core.name()).await?;
            }
            self.stop().await
        }
    }

    async fn subscribe_unit_state(self: Arc<Self>) -> Result<()> {
        let core = self.core();
        let mut stream = core.systemd().watch_active_state(core.unit_path()).await?;
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(state) = stream.next().await {
                this.clone().handle_unit_state(state).await;
            }
        });
        Ok(())
    }

    async fn setup_config_and_reload(self: Arc<Self>) -> Result<()> {
        let core = self.core();
        if self.need_config_setup().await? {
            info!(service = %core.name(), "service configuration setup required");
            self.setup_config().await?;

            if self.need_config_setup().await? {
                return Err(Error::InvalidConfig(
                    "configuration check failed after setup".to_string(),
                ));
            }

            if core.is_auto_start() {
                self.reload_config().await?;
                core.config_reloaded().wait().await;
            }
        }
        core.config_reloaded().set();
        Ok(())
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        self.start_unit().await
    }

    async fn stop(&self) -> Result<()> {
        debug!(service = %self.core().name(), "stopping service");
        self.core().systemd().stop_service(self.core().name()).await
    }

    async fn restart(self: Arc<Self>) -> Result<()> {
        self.restart_unit().await
    }

    /// Shared unit-start sequence; `start` overrides (e.g. hostapd chaining
    /// its DHCP server) call back into this.
    async fn start_unit(self: Arc<Self>) -> Result<()> {
        self.prepare_start().await?;
        debug!(service = %self.core().name(), "starting service");
        self.core().systemd().start_service(self.core().name()).await?;
        self.complete_start().await
    }

    async fn restart_unit(self: Arc<Self>) -> Result<()> {
        self.prepare_start().await?;
        debug!(service = %self.core().name(), "restarting service");
        self.core()
            .systemd()
            .restart_service(self.core().name())
            .await?;
        self.complete_start().await
    }

    async fn is_active(&self) -> bool {
        self.core().systemd().is_active(self.core().unit_path()).await
    }

    async fn is_enabled(&self) -> bool {
        self.core().systemd().is_enabled(self.core().name()).await
    }

    async fn is_installed(&self) -> bool {
        self.core().systemd().is_installed(self.core().name()).await
    }

    /// Registers the one handler for `event`. Replacing an existing handler
    /// is allowed (with a warning); unsupported kinds are rejected.
    fn register_callback(&self, event: WifiEvent, callback: EventCallback) -> Result<()> {
        if !self.supported_events().contains(&event) {
            return Err(Error::service(
                self.core().name(),
                format!("unsupported event: {event}"),
            ));
        }
        self.core().store_callback(event, callback);
        Ok(())
    }

    async fn execute_callback(&self, event: WifiEvent, data: EventData) {
        if let Some(callback) = self.core().callback_for(event) {
            debug!(service = %self.core().name(), %event, "dispatching event");
            callback(event, data).await;
        }
    }

    /// Property-change protocol: deduplicate against the last seen state,
    /// then apply the default failed/active handling and the variant mapping.
    async fn handle_unit_state(self: Arc<Self>, state: String) {
        let core = self.core();
        let previous = core.last_state();
        if previous.as_deref() == Some(state.as_str()) {
            return;
        }
        debug!(
            service = %core.name(),
            old_state = previous.as_deref().unwrap_or("-"),
            new_state = %state,
            "service state changed"
        );

        match state.as_str() {
            "failed" if !core.is_failed() => {
                core.set_failed(true);
                error!(service = %core.name(), "service failed, loading journal entries");
                core.journal()
                    .log_last_entries(core.name(), FAILURE_JOURNAL_LINES)
                    .await;
                if !core.is_force_stop() {
                    error!(service = %core.name(), "service failed, restarting service");
                    if let Err(restart_error) = self.clone().restart().await {
                        error!(service = %self.core().name(), error = %restart_error,
                               "failed to restart failed service");
                    }
                }
            }
            "active" => {
                if core.is_failed() {
                    info!(service = %core.name(), "service restored");
                    core.set_failed(false);
                }
                if !core.config_reloaded().is_set() && previous.as_deref() == Some("activating") {
                    info!(service = %core.name(), "service configuration reloaded");
                    core.config_reloaded().set();
                }
                if core.is_force_stop() {
                    info!(service = %core.name(), "force stopping service");
                    if let Err(stop_error) = self.stop().await {
                        error!(service = %self.core().name(), error = %stop_error,
                               "failed to force stop service");
                    }
                }
            }
            _ => {}
        }

        self.core().set_last_state(&state);

        if let Some(event) = self.map_unit_state(&state) {
            self.execute_callback(event, EventData::default()).await;
        }
    }
}

/// A supervisor bound to the wireless interface.
#[async_trait]
pub trait WifiService: Supervisor {
    fn interface(&self) -> &str;

    async fn ip_address(&self) -> String {
        self.core().platform().ip_address(self.interface()).await
    }

    async fn mac_address(&self) -> String {
        self.core().platform().mac_address(self.interface()).await
    }
}

/// Client-side supervisor (wpa_supplicant or NetworkManager); the mode
/// controller is unaware of which variant is wired in.
#[async_trait]
pub trait WifiClientService: WifiService {
    async fn connected_ssid(&self) -> Option<String>;

    fn network_count(&self) -> usize;

    fn networks(&self) -> Vec<WifiNetwork>;

    async fn add_network(&self, network: &WifiNetwork) -> Result<()>;

    /// Drops and re-establishes the wireless association; wired into the
    /// connection-restore chain.
    async fn reset_wireless(&self) -> Result<()>;
}

/// Hotspot-side supervisor (hostapd).
#[async_trait]
pub trait WifiHotspotService: WifiService {
    fn hotspot_ssid(&self) -> &str;

    fn hotspot_ip(&self) -> &str;
}

/// DHCP/DNS server paired with the hotspot (dnsmasq).
pub trait DhcpServerService: Supervisor {
    fn static_ip(&self) -> &str;
}

/// Client unit `ActiveState` mapping shared by both client variants.
pub(crate) fn client_state_event(state: &str) -> Option<WifiEvent> {
    match state {
        "active" => Some(WifiEvent::ClientStarted),
        "inactive" => Some(WifiEvent::ClientStopped),
        "failed" => Some(WifiEvent::ClientFailed),
        _ => None,
    }
}

pub(crate) fn hotspot_state_event(state: &str) -> Option<WifiEvent> {
    match state {
        "active" => Some(WifiEvent::HotspotStarted),
        "inactive" => Some(WifiEvent::HotspotStopped),
        "failed" => Some(WifiEvent::HotspotFailed),
        _ => None,
    }
}

pub(crate) const CLIENT_STATE_EVENTS: [WifiEvent; 3] = [
    WifiEvent::ClientStarted,
    WifiEvent::ClientStopped,
    WifiEvent::ClientFailed,
];

pub(crate) const HOTSPOT_STATE_EVENTS: [WifiEvent; 3] = [
    WifiEvent::HotspotStarted,
    WifiEvent::HotspotStopped,
    WifiEvent::HotspotFailed,
];
