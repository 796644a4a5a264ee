use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::info;
use zbus::Connection;

use super::{DhcpServerService, ServiceCore, ServiceDependencies, Supervisor};
use crate::event::{EventData, PeerInfo, WifiEvent};
use crate::util;
use crate::Result;

const UNIT_PATH: &str = "/org/freedesktop/systemd1/unit/dnsmasq_2eservice";
const DNSMASQ_DBUS_SERVICE: &str = "uk.org.thekelleys.dnsmasq";
const DNSMASQ_DBUS_PATH: &str = "/uk/org/thekelleys/dnsmasq";
const CONFIG_TEMPLATE: &str = include_str!("../../resources/config/dnsmasq.conf.template");

#[derive(Debug, Clone)]
pub struct DnsmasqConfig {
    pub interface: String,
    pub static_ip: String,
    pub dhcp_range: String,
    pub server_port: u16,
}

impl DnsmasqConfig {
    fn render(&self) -> String {
        let mut context = HashMap::new();
        context.insert("interface", self.interface.clone());
        context.insert("hotspot_ip", self.static_ip.clone());
        context.insert("dhcp_range", self.dhcp_range.clone());
        context.insert("server_port", self.server_port.to_string());
        util::render(CONFIG_TEMPLATE, &context)
    }
}

/// dnsmasq supervisor: the hotspot's DHCP/DNS server. Lease signals on the
/// daemon's own bus name become the peer events the timeout policy runs on.
pub struct DnsmasqService {
    core: ServiceCore,
    connection: Connection,
    config: DnsmasqConfig,
    config_file: PathBuf,
    rendered: String,
}

impl DnsmasqService {
    pub fn new(
        deps: ServiceDependencies,
        connection: Connection,
        config: DnsmasqConfig,
    ) -> Arc<Self> {
        Self::with_config_file(deps, connection, config, "/etc/dnsmasq.conf")
    }

    pub fn with_config_file(
        deps: ServiceDependencies,
        connection: Connection,
        config: DnsmasqConfig,
        config_file: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let rendered = config.render();
        Arc::new(DnsmasqService {
            core: ServiceCore::new("dnsmasq", UNIT_PATH, deps),
            connection,
            config,
            config_file: config_file.into(),
            rendered,
        })
    }

    async fn subscribe_lease_signal(
        self: Arc<Self>,
        signal_name: &'static str,
        event: WifiEvent,
    ) -> Result<()> {
        let proxy = zbus::Proxy::new(
            &self.connection,
            DNSMASQ_DBUS_SERVICE,
            DNSMASQ_DBUS_PATH,
            DNSMASQ_DBUS_SERVICE,
        )
        .await?;

        let mut stream = proxy.receive_signal(signal_name).await?;
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let data = match message.body().deserialize::<(String, String, String)>() {
                    Ok((ip, mac, name)) => EventData::peer(PeerInfo { name, ip, mac }),
                    Err(_) => EventData::default(),
                };
                this.execute_callback(event, data).await;
            }
        });
        Ok(())
    }
}

#[async_trait]
impl Supervisor for DnsmasqService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn supported_events(&self) -> Vec<WifiEvent> {
        vec![
            WifiEvent::HotspotPeerConnected,
            WifiEvent::HotspotPeerReconnected,
            WifiEvent::HotspotPeerDisconnected,
        ]
    }

    async fn prepare_start(&self) -> Result<()> {
        self.core
            .platform()
            .set_ip_address(&self.config.interface, &self.config.static_ip)
            .await
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

    async fn setup_custom_events(self: Arc<Self>) -> Result<()> {
        self.clone()
            .subscribe_lease_signal("DhcpLeaseAdded", WifiEvent::HotspotPeerConnected)
            .await?;
        self.clone()
            .subscribe_lease_signal("DhcpLeaseUpdated", WifiEvent::HotspotPeerReconnected)
            .await?;
        self.subscribe_lease_signal("DhcpLeaseDeleted", WifiEvent::HotspotPeerDisconnected)
            .await?;
        Ok(())
    }
}

impl DhcpServerService for DnsmasqService {
    fn static_ip(&self) -> &str {
        &self.config.static_ip
    }
}
