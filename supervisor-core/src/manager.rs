use std::sync::Arc;

use tracing::{debug, error, info};

use crate::control::{WifiControl, WifiMode};
use crate::handler::WifiEventHandler;
use crate::monitor::ConnectionMonitor;
use crate::service::Supervisor;
use crate::web::WifiWebServer;
use crate::{Error, Result};

/// Top-level orchestrator: reconciles every supervisor, wires the event
/// fan-out, decides the boot-time mode and owns shutdown.
pub struct WifiManager {
    services: Vec<Arc<dyn Supervisor>>,
    control: Arc<WifiControl>,
    handler: Arc<WifiEventHandler>,
    monitor: Arc<ConnectionMonitor>,
    web: Arc<WifiWebServer>,
}

impl WifiManager {
    pub fn new(
        services: Vec<Arc<dyn Supervisor>>,
        control: Arc<WifiControl>,
        handler: Arc<WifiEventHandler>,
        monitor: Arc<ConnectionMonitor>,
        web: Arc<WifiWebServer>,
    ) -> Arc<Self> {
        Arc::new(WifiManager {
            services,
            control,
            handler,
            monitor,
            web,
        })
    }

    /// Runs until shutdown. A `ServiceError` from any supervisor's setup is
    /// fatal: the daemon cleans up and exits non-zero.
    pub async fn run(&self) -> Result<()> {
        match self.try_run().await {
            Ok(()) => Ok(()),
            Err(run_error) => {
                if let Error::Service { service, reason } = &run_error {
                    error!(
                        service = service.as_str(),
                        reason = reason.as_str(),
                        "fatal error occurred while running service"
                    );
                }
                self.shutdown().await;
                Err(run_error)
            }
        }
    }

    pub async fn shutdown(&self) {
        self.handler.cancel_timer();
        self.monitor.stop();
        self.web.shutdown();
    }

    async fn try_run(&self) -> Result<()> {
        for service in &self.services {
            debug!(service = service.core().name(), "setting up service");
            service.clone().setup().await?;
        }

        self.setup_event_handling();
        self.handle_initial_status().await?;

        self.web.run().await
    }

    fn setup_event_handling(&self) {
        for service in &self.services {
            for event in service.supported_events() {
                debug!(
                    event_source = service.core().name(),
                    event_type = %event,
                    "registering event source"
                );
                self.control.register_event_source(event, service.clone());
            }
        }

        self.handler.clone().register_event_handlers();
    }

    /// Boot-time reconciliation: no networks forces the hotspot; anything
    /// short of a healthy client association (re)starts the client; a
    /// healthy client just gets the connection monitor.
    async fn handle_initial_status(&self) -> Result<()> {
        let state = self.control.state().await;
        let status = self.control.status().await;
        info!(wifi_mode = ?state, wifi_status = ?status, "retrieved initial status");

        if self.control.network_count() == 0 {
            info!("no networks configured, starting hotspot mode");
            return self.control.start_hotspot_mode().await;
        }

        let start_client = if state != WifiMode::Client {
            info!("not running in client mode, starting client mode");
            true
        } else {
            match &status {
                None => {
                    info!("not connected to any network, restarting client mode");
                    true
                }
                Some(_) if self.control.is_hotspot_ip_set().await => {
                    info!("removing static IP address, restarting client mode");
                    true
                }
                Some(status) if status.ip.is_empty() => {
                    info!("no IP address acquired, restarting client mode");
                    true
                }
                Some(_) => false,
            }
        };

        if start_client {
            self.control.start_client_mode().await
        } else {
            self.monitor.clone().start();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blink::{BlinkConfig, BlinkControl, BlinkDevice};
    use crate::control::WifiControlConfig;
    use crate::event::WifiEvent;
    use crate::monitor::ConnectionMonitorConfig;
    use crate::store::WifiNetwork;
    use crate::testkit::{MockClientService, MockHotspotService, MockPlatform};
    use crate::timer::ReusableTimer;
    use crate::web::{WebServerConfig, WifiWebServer};
    use std::time::Duration;

    struct NullDevice;

    impl BlinkDevice for NullDevice {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn on(&mut self) {}
        fn off(&mut self) {}
    }

    struct Fixture {
        client: Arc<MockClientService>,
        hotspot: Arc<MockHotspotService>,
        handler: Arc<WifiEventHandler>,
        manager: Arc<WifiManager>,
    }

    fn fixture() -> Fixture {
        let client = MockClientService::new();
        let hotspot = MockHotspotService::new();
        let platform = Arc::new(MockPlatform::with_interfaces(&["wlan0"]));
        let control = WifiControl::new(
            client.clone(),
            hotspot.clone(),
            platform.clone(),
            WifiControlConfig {
                switch_fail_limit: 5,
                switch_fail_command: "reboot".to_string(),
            },
        );
        let monitor = ConnectionMonitor::new(
            platform.clone(),
            ConnectionMonitorConfig {
                ping_interval: Duration::from_secs(60),
                ping_timeout: 5,
                ping_fail_limit: 3,
            },
            Vec::new(),
        );
        let handler = WifiEventHandler::new(
            control.clone(),
            Arc::new(ReusableTimer::new()),
            monitor.clone(),
            Arc::new(BlinkControl::new(BlinkConfig::default())),
            Box::new(NullDevice),
            Duration::from_secs(15),
            Duration::from_secs(120),
        );
        let web = WifiWebServer::new(
            WebServerConfig {
                hotspot_ip: "192.168.100.1".to_string(),
                server_port: 8080,
            },
            platform.clone(),
            handler.clone(),
            "er-edge-0000abcd",
            Vec::new(),
        );
        let services: Vec<Arc<dyn Supervisor>> = vec![client.clone(), hotspot.clone()];
        let manager = WifiManager::new(services, control, handler.clone(), monitor, web);
        Fixture {
            client,
            hotspot,
            handler,
            manager,
        }
    }

    fn one_network() -> Vec<WifiNetwork> {
        vec![WifiNetwork {
            ssid: "home".to_string(),
            password: "secret-pass".to_string(),
            enabled: true,
            priority: 0,
        }]
    }

    #[tokio::test]
    async fn cold_boot_without_networks_forces_hotspot() {
        let fx = fixture();

        fx.manager.handle_initial_status().await.unwrap();

        assert!(fx.hotspot.is_active().await);
        assert!(!fx.client.is_active().await);
    }

    #[tokio::test]
    async fn cold_boot_without_networks_forces_hotspot_even_in_client_mode() {
        let fx = fixture();
        fx.client.set_active(true);

        fx.manager.handle_initial_status().await.unwrap();

        assert!(fx.hotspot.is_active().await);
        assert!(!fx.client.is_active().await);
    }

    #[tokio::test]
    async fn configured_network_but_wifi_off_starts_client() {
        let fx = fixture();
        fx.client.set_networks(one_network());

        fx.manager.handle_initial_status().await.unwrap();

        assert!(fx.client.is_active().await);
        assert_eq!(fx.client.operations(), ["start"]);
    }

    #[tokio::test]
    async fn client_with_hotspot_ip_is_restarted() {
        let fx = fixture();
        fx.client.set_networks(one_network());
        fx.client.set_active(true);
        fx.client.set_connected("home", "192.168.100.1");

        fx.manager.handle_initial_status().await.unwrap();

        assert_eq!(fx.client.operations(), ["restart"]);
    }

    #[tokio::test]
    async fn client_without_ip_is_restarted() {
        let fx = fixture();
        fx.client.set_networks(one_network());
        fx.client.set_active(true);
        fx.client.set_connected("home", "192.168.1.7");
        fx.client.clear_ip();

        fx.manager.handle_initial_status().await.unwrap();

        assert_eq!(fx.client.operations(), ["restart"]);
    }

    #[tokio::test]
    async fn healthy_client_is_left_alone() {
        let fx = fixture();
        fx.client.set_networks(one_network());
        fx.client.set_active(true);
        fx.client.set_connected("home", "192.168.1.7");

        fx.manager.handle_initial_status().await.unwrap();

        assert!(fx.client.operations().is_empty());
        assert!(fx.hotspot.operations().is_empty());
    }

    #[tokio::test]
    async fn cold_boot_without_networks_leaves_peer_timer_disarmed() {
        let fx = fixture();
        fx.manager.setup_event_handling();

        fx.manager.handle_initial_status().await.unwrap();
        fx.hotspot
            .execute_callback(WifiEvent::HotspotStarted, Default::default())
            .await;

        assert!(fx.hotspot.is_active().await);
        assert!(!fx.handler.is_timer_armed());
    }

    #[tokio::test]
    async fn hotspot_start_with_networks_arms_peer_timer_through_wiring() {
        let fx = fixture();
        fx.manager.setup_event_handling();
        fx.client.set_networks(one_network());

        fx.hotspot
            .execute_callback(WifiEvent::HotspotStarted, Default::default())
            .await;

        assert!(fx.handler.is_timer_armed());
    }
}
