//! In-memory doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::event::WifiEvent;
use crate::journal::Journal;
use crate::platform::Platform;
use crate::service::{
    ServiceCore, ServiceDependencies, Supervisor, WifiClientService, WifiHotspotService,
    WifiService,
};
use crate::store::WifiNetwork;
use crate::systemd::{Systemd, UnitStateStream};
use crate::{Error, Result};

pub fn test_dependencies(systemd: Arc<MockSystemd>) -> ServiceDependencies {
    ServiceDependencies {
        platform: Arc::new(MockPlatform::with_interfaces(&["wlan0"])),
        systemd,
        journal: Arc::new(MockJournal::default()),
    }
}

#[derive(Default)]
pub struct MockSystemd {
    calls: Mutex<Vec<String>>,
    active: Mutex<HashSet<String>>,
    enabled: Mutex<HashSet<String>>,
    masked: Mutex<HashSet<String>>,
    missing: Mutex<HashSet<String>>,
    units_by_pattern: Mutex<HashMap<String, Vec<String>>>,
    state_senders: Mutex<HashMap<String, Vec<tokio::sync::mpsc::UnboundedSender<String>>>>,
}

impl MockSystemd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn set_active(&self, key: &str, active: bool) {
        let mut set = self.active.lock().unwrap();
        if active {
            set.insert(key.to_string());
        } else {
            set.remove(key);
        }
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        let mut set = self.enabled.lock().unwrap();
        if enabled {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    pub fn set_masked(&self, name: &str, masked: bool) {
        let mut set = self.masked.lock().unwrap();
        if masked {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    pub fn set_missing(&self, name: &str) {
        self.missing.lock().unwrap().insert(name.to_string());
    }

    pub fn set_units_for_pattern(&self, pattern: &str, units: &[&str]) {
        self.units_by_pattern.lock().unwrap().insert(
            pattern.to_string(),
            units.iter().map(|u| u.to_string()).collect(),
        );
    }

    /// Feeds a unit state to every subscriber of `unit_path`.
    pub fn push_state(&self, unit_path: &str, state: &str) {
        if let Some(senders) = self.state_senders.lock().unwrap().get(unit_path) {
            for sender in senders {
                let _ = sender.send(state.to_string());
            }
        }
    }
}

#[async_trait]
impl Systemd for MockSystemd {
    async fn start_service(&self, name: &str) -> Result<()> {
        self.record(format!("start {name}"));
        self.set_active(name, true);
        Ok(())
    }

    async fn stop_service(&self, name: &str) -> Result<()> {
        self.record(format!("stop {name}"));
        self.set_active(name, false);
        Ok(())
    }

    async fn restart_service(&self, name: &str) -> Result<()> {
        self.record(format!("restart {name}"));
        self.set_active(name, true);
        Ok(())
    }

    async fn enable_service(&self, name: &str) -> Result<()> {
        self.record(format!("enable {name}"));
        self.set_enabled(name, true);
        Ok(())
    }

    async fn disable_service(&self, name: &str) -> Result<()> {
        self.record(format!("disable {name}"));
        self.set_enabled(name, false);
        Ok(())
    }

    async fn mask_service(&self, name: &str) -> Result<()> {
        self.record(format!("mask {name}"));
        self.set_masked(name, true);
        Ok(())
    }

    async fn unmask_service(&self, name: &str) -> Result<()> {
        self.record(format!("unmask {name}"));
        self.set_masked(name, false);
        Ok(())
    }

    async fn reload_daemon(&self) -> Result<()> {
        self.record("daemon-reload".to_string());
        Ok(())
    }

    async fn is_active(&self, unit_path: &str) -> bool {
        self.active.lock().unwrap().contains(unit_path)
    }

    async fn is_enabled(&self, name: &str) -> bool {
        self.enabled.lock().unwrap().contains(name)
    }

    async fn is_masked(&self, name: &str) -> bool {
        self.masked.lock().unwrap().contains(name)
    }

    async fn is_installed(&self, name: &str) -> bool {
        !self.missing.lock().unwrap().contains(name)
    }

    async fn list_service_names(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .units_by_pattern
            .lock()
            .unwrap()
            .get(pattern)
            .cloned()
            .unwrap_or_default())
    }

    async fn watch_active_state(&self, unit_path: &str) -> Result<UnitStateStream> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.state_senders
            .lock()
            .unwrap()
            .entry(unit_path.to_string())
            .or_default()
            .push(tx);
        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async {
            rx.recv().await.map(|state| (state, rx))
        })))
    }
}

pub struct MockPlatform {
    interfaces: Vec<String>,
    ips: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<String>>,
    gateway_pings: Mutex<VecDeque<bool>>,
    hostname: Mutex<String>,
}

impl MockPlatform {
    pub fn with_interfaces(interfaces: &[&str]) -> Self {
        MockPlatform {
            interfaces: interfaces.iter().map(|i| i.to_string()).collect(),
            ips: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            gateway_pings: Mutex::new(VecDeque::new()),
            hostname: Mutex::new("raspberrypi".to_string()),
        }
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn set_ip(&self, interface: &str, ip: &str) {
        self.ips
            .lock()
            .unwrap()
            .insert(interface.to_string(), ip.to_string());
    }

    /// Queues outcomes for successive gateway pings; defaults to success when
    /// the queue runs dry.
    pub fn queue_gateway_pings(&self, outcomes: &[bool]) {
        self.gateway_pings
            .lock()
            .unwrap()
            .extend(outcomes.iter().copied());
    }

    pub fn set_hostname(&self, hostname: &str) {
        *self.hostname.lock().unwrap() = hostname.to_string();
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn platform_version(&self) -> Result<f64> {
        Ok(12.0)
    }

    async fn enable_wlan_interfaces(&self) -> Result<()> {
        Ok(())
    }

    async fn wlan_interfaces(&self) -> Vec<String> {
        self.interfaces.clone()
    }

    async fn set_wlan_power_save(&self, _interface: &str, _enable: bool) -> Result<()> {
        Ok(())
    }

    async fn hostname(&self) -> Result<String> {
        Ok(self.hostname.lock().unwrap().clone())
    }

    async fn cpu_serial(&self) -> Result<String> {
        Ok("0000abcd".to_string())
    }

    async fn mac_address(&self, _interface: &str) -> String {
        "00:11:22:33:44:55".to_string()
    }

    async fn ip_address(&self, interface: &str) -> String {
        self.ips
            .lock()
            .unwrap()
            .get(interface)
            .cloned()
            .unwrap_or_default()
    }

    async fn set_ip_address(&self, interface: &str, ip_address: &str) -> Result<()> {
        self.set_ip(interface, ip_address);
        Ok(())
    }

    async fn flush_ip_addresses(&self, interface: &str) -> Result<()> {
        self.ips.lock().unwrap().remove(interface);
        Ok(())
    }

    async fn set_up_ip_tables(&self, _ip_address: &str, _destination_host: &str) -> Result<()> {
        self.commands.lock().unwrap().push("iptables-setup".to_string());
        Ok(())
    }

    async fn clean_up_ip_tables(&self) -> Result<()> {
        self.commands.lock().unwrap().push("iptables-cleanup".to_string());
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> Result<String> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(String::new())
    }

    async fn ping_default_gateway(&self, _timeout_s: u64) -> bool {
        self.gateway_pings.lock().unwrap().pop_front().unwrap_or(true)
    }

    async fn ping_tunnel_endpoint(&self, _timeout_s: u64) -> bool {
        true
    }
}

#[derive(Default)]
pub struct MockJournal {
    pub requests: Mutex<Vec<(String, u32)>>,
}

#[async_trait]
impl Journal for MockJournal {
    async fn log_last_entries(&self, service: &str, count: u32) {
        self.requests
            .lock()
            .unwrap()
            .push((service.to_string(), count));
    }
}

/// Scriptable client supervisor used by the controller/handler/manager tests.
pub struct MockClientService {
    core: ServiceCore,
    active: AtomicBool,
    fail_ops: AtomicBool,
    networks: Mutex<Vec<WifiNetwork>>,
    ssid: Mutex<Option<String>>,
    ip: Mutex<String>,
    resets: AtomicUsize,
    ops: Mutex<Vec<String>>,
}

impl MockClientService {
    pub fn new() -> Arc<Self> {
        Arc::new(MockClientService {
            core: ServiceCore::new(
                "mock-client",
                "/org/freedesktop/systemd1/unit/mock_2dclient_2eservice",
                test_dependencies(Arc::new(MockSystemd::new())),
            ),
            active: AtomicBool::new(false),
            fail_ops: AtomicBool::new(false),
            networks: Mutex::new(Vec::new()),
            ssid: Mutex::new(None),
            ip: Mutex::new(String::new()),
            resets: AtomicUsize::new(0),
            ops: Mutex::new(Vec::new()),
        })
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn fail_operations(&self, fail: bool) {
        self.fail_ops.store(fail, Ordering::SeqCst);
    }

    pub fn set_connected(&self, ssid: &str, ip: &str) {
        *self.ssid.lock().unwrap() = Some(ssid.to_string());
        *self.ip.lock().unwrap() = ip.to_string();
    }

    pub fn clear_ip(&self) {
        self.ip.lock().unwrap().clear();
    }

    pub fn set_networks(&self, networks: Vec<WifiNetwork>) {
        *self.networks.lock().unwrap() = networks;
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn operations(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn attempt(&self, op: &str, active_after: bool) -> Result<()> {
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(Error::CommandFailed(format!("mock client {op} failed")));
        }
        self.ops.lock().unwrap().push(op.to_string());
        self.active.store(active_after, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Supervisor for MockClientService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn supported_events(&self) -> Vec<WifiEvent> {
        vec![
            WifiEvent::ClientStarted,
            WifiEvent::ClientStopped,
            WifiEvent::ClientFailed,
            WifiEvent::ClientDisabled,
            WifiEvent::ClientInactive,
            WifiEvent::ClientScanning,
            WifiEvent::ClientConnecting,
            WifiEvent::ClientConnected,
            WifiEvent::ClientDisconnected,
            WifiEvent::ClientIpAcquired,
        ]
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        self.attempt("start", true)
    }

    async fn stop(&self) -> Result<()> {
        self.attempt("stop", false)
    }

    async fn restart(self: Arc<Self>) -> Result<()> {
        self.attempt("restart", true)
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WifiService for MockClientService {
    fn interface(&self) -> &str {
        "wlan0"
    }

    async fn ip_address(&self) -> String {
        self.ip.lock().unwrap().clone()
    }

    async fn mac_address(&self) -> String {
        "00:11:22:33:44:55".to_string()
    }
}

#[async_trait]
impl WifiClientService for MockClientService {
    async fn connected_ssid(&self) -> Option<String> {
        self.ssid.lock().unwrap().clone()
    }

    fn network_count(&self) -> usize {
        self.networks.lock().unwrap().len()
    }

    fn networks(&self) -> Vec<WifiNetwork> {
        self.networks.lock().unwrap().clone()
    }

    async fn add_network(&self, network: &WifiNetwork) -> Result<()> {
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(Error::CommandFailed("mock add_network failed".to_string()));
        }
        let mut networks = self.networks.lock().unwrap();
        networks.retain(|n| n.ssid != network.ssid);
        networks.push(network.clone());
        Ok(())
    }

    async fn reset_wireless(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockHotspotService {
    core: ServiceCore,
    active: AtomicBool,
    fail_ops: AtomicBool,
    ip: Mutex<String>,
    ops: Mutex<Vec<String>>,
}

impl MockHotspotService {
    pub fn new() -> Arc<Self> {
        Arc::new(MockHotspotService {
            core: ServiceCore::new(
                "mock-hotspot",
                "/org/freedesktop/systemd1/unit/mock_2dhotspot_2eservice",
                test_dependencies(Arc::new(MockSystemd::new())),
            ),
            active: AtomicBool::new(false),
            fail_ops: AtomicBool::new(false),
            ip: Mutex::new(String::new()),
            ops: Mutex::new(Vec::new()),
        })
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn fail_operations(&self, fail: bool) {
        self.fail_ops.store(fail, Ordering::SeqCst);
    }

    pub fn set_ip(&self, ip: &str) {
        *self.ip.lock().unwrap() = ip.to_string();
    }

    pub fn operations(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn attempt(&self, op: &str, active_after: bool) -> Result<()> {
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(Error::CommandFailed(format!("mock hotspot {op} failed")));
        }
        self.ops.lock().unwrap().push(op.to_string());
        self.active.store(active_after, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Supervisor for MockHotspotService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn supported_events(&self) -> Vec<WifiEvent> {
        vec![
            WifiEvent::HotspotStarted,
            WifiEvent::HotspotStopped,
            WifiEvent::HotspotFailed,
        ]
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        self.attempt("start", true)
    }

    async fn stop(&self) -> Result<()> {
        self.attempt("stop", false)
    }

    async fn restart(self: Arc<Self>) -> Result<()> {
        self.attempt("restart", true)
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WifiService for MockHotspotService {
    fn interface(&self) -> &str {
        "wlan0"
    }

    async fn ip_address(&self) -> String {
        self.ip.lock().unwrap().clone()
    }

    async fn mac_address(&self) -> String {
        "00:11:22:33:44:55".to_string()
    }
}

#[async_trait]
impl WifiHotspotService for MockHotspotService {
    fn hotspot_ssid(&self) -> &str {
        "er-edge-0000abcd"
    }

    fn hotspot_ip(&self) -> &str {
        "192.168.100.1"
    }
}
