use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{
    hotspot_state_event, DhcpServerService, ServiceCore, ServiceDependencies, Supervisor,
    WifiHotspotService, WifiService, HOTSPOT_STATE_EVENTS,
};
use crate::event::WifiEvent;
use crate::util;
use crate::Result;

const UNIT_PATH: &str = "/org/freedesktop/systemd1/unit/hostapd_2eservice";
const CONFIG_TEMPLATE: &str = include_str!("../../resources/config/hostapd.conf.template");

#[derive(Debug, Clone)]
pub struct HostapdConfig {
    pub interface: String,
    pub mac_address: String,
    pub ssid: String,
    pub password: String,
    pub country: String,
    pub startup_delay: u64,
}

impl HostapdConfig {
    fn render(&self) -> String {
        let mut context = HashMap::new();
        context.insert("interface", self.interface.clone());
        context.insert("mac_address", self.mac_address.clone());
        context.insert("ssid", self.ssid.clone());
        context.insert("password", self.password.clone());
        context.insert("country", self.country.clone());
        util::render(CONFIG_TEMPLATE, &context)
    }
}

/// hostapd supervisor. Never auto-started: the mode controller brings it up
/// explicitly, and starting it always brings the DHCP server up first.
pub struct HostapdService {
    core: ServiceCore,
    config: HostapdConfig,
    dhcp_server: Arc<dyn DhcpServerService>,
    config_file: PathBuf,
    rendered: String,
}

impl HostapdService {
    pub fn new(
        deps: ServiceDependencies,
        config: HostapdConfig,
        dhcp_server: Arc<dyn DhcpServerService>,
    ) -> Arc<Self> {
        Self::with_config_file(deps, config, dhcp_server, "/etc/hostapd/hostapd.conf")
    }

    pub fn with_config_file(
        deps: ServiceDependencies,
        config: HostapdConfig,
        dhcp_server: Arc<dyn DhcpServerService>,
        config_file: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let core = ServiceCore::new("hostapd", UNIT_PATH, deps);
        core.set_auto_start(false);
        let rendered = config.render();
        Arc::new(HostapdService {
            core,
            config,
            dhcp_server,
            config_file: config_file.into(),
            rendered,
        })
    }
}

#[async_trait]
impl Supervisor for HostapdService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn supported_events(&self) -> Vec<WifiEvent> {
        HOTSPOT_STATE_EVENTS.to_vec()
    }

    fn map_unit_state(&self, state: &str) -> Option<WifiEvent> {
        hotspot_state_event(state)
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        self.dhcp_server.clone().start().await?;
        self.start_unit().await
    }

    async fn restart(self: Arc<Self>) -> Result<()> {
        self.dhcp_server.clone().restart().await?;
        self.restart_unit().await
    }

    async fn prepare_start(&self) -> Result<()> {
        self.core
            .platform()
            .set_ip_address(&self.config.interface, self.dhcp_server.static_ip())
            .await?;
        // The radio needs a moment after address assignment before hostapd
        // can claim it.
        tokio::time::sleep(Duration::from_secs(self.config.startup_delay)).await;
        Ok(())
    }

    async fn need_config_setup(&self) -> Result<bool> {
        let expected: Vec<String> = self.rendered.lines().map(str::to_string).collect();
        Ok(!util::file_matches_lines(&self.config_file, &expected))
    }

    async fn setup_config(&self) -> Result<()> {
        info!(
            service = %self.core.name(),
            file = %self.config_file.display(),
            "creating service configuration file"
        );
        util::create_file(&self.config_file, &self.rendered)
    }
}

#[async_trait]
impl WifiService for HostapdService {
    fn interface(&self) -> &str {
        &self.config.interface
    }
}

#[async_trait]
impl WifiHotspotService for HostapdService {
    fn hotspot_ssid(&self) -> &str {
        &self.config.ssid
    }

    fn hotspot_ip(&self) -> &str {
        self.dhcp_server.static_ip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{test_dependencies, MockSystemd};
    use std::sync::Mutex;

    struct MockDhcpServer {
        core: ServiceCore,
        ops: Mutex<Vec<String>>,
    }

    impl MockDhcpServer {
        fn new() -> Arc<Self> {
            Arc::new(MockDhcpServer {
                core: ServiceCore::new(
                    "mock-dnsmasq",
                    "/org/freedesktop/systemd1/unit/mock_2ddnsmasq_2eservice",
                    test_dependencies(Arc::new(MockSystemd::new())),
                ),
                ops: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Supervisor for MockDhcpServer {
        fn core(&self) -> &ServiceCore {
            &self.core
        }

        async fn start(self: Arc<Self>) -> Result<()> {
            self.ops.lock().unwrap().push("start".to_string());
            Ok(())
        }

        async fn restart(self: Arc<Self>) -> Result<()> {
            self.ops.lock().unwrap().push("restart".to_string());
            Ok(())
        }
    }

    impl DhcpServerService for MockDhcpServer {
        fn static_ip(&self) -> &str {
            "192.168.100.1"
        }
    }

    fn hostapd_config(startup_delay: u64) -> HostapdConfig {
        HostapdConfig {
            interface: "wlan0".to_string(),
            mac_address: "00:11:22:33:44:55".to_string(),
            ssid: "er-edge-0000abcd".to_string(),
            password: "p4ssw0rd".to_string(),
            country: "HU".to_string(),
            startup_delay,
        }
    }

    #[test]
    fn rendered_config_substitutes_all_fields() {
        let rendered = hostapd_config(0).render();
        assert!(rendered.contains("interface=wlan0"));
        assert!(rendered.contains("bssid=00:11:22:33:44:55"));
        assert!(rendered.contains("ssid=er-edge-0000abcd"));
        assert!(rendered.contains("wpa_passphrase=p4ssw0rd"));
        assert!(rendered.contains("country_code=HU"));
        assert!(!rendered.contains("{{"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_chains_dhcp_server_and_sets_static_ip() {
        let dir = tempfile::tempdir().unwrap();
        let systemd = Arc::new(MockSystemd::new());
        let dhcp = MockDhcpServer::new();
        let service = HostapdService::with_config_file(
            test_dependencies(systemd.clone()),
            hostapd_config(3),
            dhcp.clone(),
            dir.path().join("hostapd.conf"),
        );

        let start = tokio::spawn(service.clone().start());
        tokio::time::sleep(Duration::from_secs(4)).await;
        start.await.unwrap().unwrap();

        assert_eq!(dhcp.ops.lock().unwrap().as_slice(), ["start"]);
        assert!(systemd.calls().contains(&"start hostapd".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn startup_delay_blocks_before_unit_start() {
        let dir = tempfile::tempdir().unwrap();
        let systemd = Arc::new(MockSystemd::new());
        let service = HostapdService::with_config_file(
            test_dependencies(systemd.clone()),
            hostapd_config(5),
            MockDhcpServer::new(),
            dir.path().join("hostapd.conf"),
        );

        let start = tokio::spawn(service.clone().start());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!systemd.calls().contains(&"start hostapd".to_string()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        start.await.unwrap().unwrap();
        assert!(systemd.calls().contains(&"start hostapd".to_string()));
    }

    #[tokio::test]
    async fn setup_with_correct_config_does_not_restart_unit() {
        let dir = tempfile::tempdir().unwrap();
        let systemd = Arc::new(MockSystemd::new());
        let service = HostapdService::with_config_file(
            test_dependencies(systemd.clone()),
            hostapd_config(0),
            MockDhcpServer::new(),
            dir.path().join("hostapd.conf"),
        );
        service.setup_config().await.unwrap();

        service.clone().setup().await.unwrap();

        let calls = systemd.calls();
        assert!(!calls.contains(&"restart hostapd".to_string()));
        assert!(service.core().config_reloaded().is_set());
    }

    #[tokio::test]
    async fn config_setup_round_trips(){
        let dir = tempfile::tempdir().unwrap();
        let service = HostapdService::with_config_file(
            test_dependencies(Arc::new(MockSystemd::new())),
            hostapd_config(0),
            MockDhcpServer::new(),
            dir.path().join("hostapd.conf"),
        );

        assert!(service.need_config_setup().await.unwrap());
        service.setup_config().await.unwrap();
        assert!(!service.need_config_setup().await.unwrap());
    }
}
