use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::info;
use zbus::zvariant::OwnedValue;
use zbus::Connection;

use super::{ServiceCore, ServiceDependencies, Supervisor};
use crate::event::{EventData, WifiEvent};
use crate::util;
use crate::Result;

const UNIT_PATH: &str = "/org/freedesktop/systemd1/unit/dhcpcd_2eservice";
const DHCPCD_DBUS_SERVICE: &str = "name.marples.roy.dhcpcd";
const DHCPCD_DBUS_PATH: &str = "/name/marples/roy/dhcpcd";

/// dhcpcd supervisor: the client-side DHCP client. Its `Event` signal with
/// `Reason=BOUND` on our interface is the CLIENT_IP_ACQUIRED source.
pub struct DhcpcdService {
    core: ServiceCore,
    connection: Connection,
    interface: String,
    config_file: PathBuf,
}

impl DhcpcdService {
    pub fn new(
        deps: ServiceDependencies,
        connection: Connection,
        interface: impl Into<String>,
    ) -> Arc<Self> {
        Self::with_config_file(deps, connection, interface, "/etc/dhcpcd.conf")
    }

    pub fn with_config_file(
        deps: ServiceDependencies,
        connection: Connection,
        interface: impl Into<String>,
        config_file: impl Into<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(DhcpcdService {
            core: ServiceCore::new("dhcpcd", UNIT_PATH, deps),
            connection,
            interface: interface.into(),
            config_file: config_file.into(),
        })
    }

    fn config_lines(&self) -> [String; 2] {
        [
            format!("interface {}", self.interface),
            "nohook wpa_supplicant".to_string(),
        ]
    }
}

#[async_trait]
impl Supervisor for DhcpcdService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn supported_events(&self) -> Vec<WifiEvent> {
        vec![WifiEvent::ClientIpAcquired]
    }

    /// A leftover address (typically the hotspot's static IP) must not
    /// survive into the new lease.
    async fn prepare_start(&self) -> Result<()> {
        self.core
            .platform()
            .flush_ip_addresses(&self.interface)
            .await
    }

    async fn need_config_setup(&self) -> Result<bool> {
        let lines = self.config_lines();
        let expected: Vec<&str> = lines.iter().map(String::as_str).collect();
        Ok(!util::file_contains_sequence(&self.config_file, &expected))
    }

    async fn setup_config(&self) -> Result<()> {
        info!(file = %self.config_file.display(), "appending configuration file");
        let [interface_line, nohook_line] = self.config_lines();
        util::append_line(&self.config_file, &format!("\n{interface_line}\n{nohook_line}"))
    }

    async fn setup_custom_events(self: Arc<Self>) -> Result<()> {
        let proxy = zbus::Proxy::new(
            &self.connection,
            DHCPCD_DBUS_SERVICE,
            DHCPCD_DBUS_PATH,
            DHCPCD_DBUS_SERVICE,
        )
        .await?;

        let mut stream = proxy.receive_signal("Event").await?;
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let Ok(event) = message.body().deserialize::<HashMap<String, OwnedValue>>() else {
                    continue;
                };
                if field(&event, "Interface").as_deref() == Some(&this.interface)
                    && field(&event, "Reason").as_deref() == Some("BOUND")
                {
                    this.execute_callback(WifiEvent::ClientIpAcquired, EventData::default())
                        .await;
                }
            }
        });
        Ok(())
    }
}

fn field(event: &HashMap<String, OwnedValue>, key: &str) -> Option<String> {
    event.get(key)?.clone().try_into().ok()
}
