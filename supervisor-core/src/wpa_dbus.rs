use std::collections::HashMap;

use futures_util::stream::{BoxStream, StreamExt};
use tracing::warn;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::Connection;
use zbus_macros::proxy;

use crate::store::WifiNetwork;
use crate::{Error, Result};

#[proxy(
    interface = "fi.w1.wpa_supplicant1",
    default_service = "fi.w1.wpa_supplicant1",
    default_path = "/fi/w1/wpa_supplicant1"
)]
trait WpaSupplicant {
    fn get_interface(&self, name: &str) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(
    interface = "fi.w1.wpa_supplicant1.Interface",
    default_service = "fi.w1.wpa_supplicant1"
)]
trait WpaInterface {
    fn add_network(&self, args: HashMap<String, OwnedValue>) -> zbus::Result<OwnedObjectPath>;
    fn disconnect(&self) -> zbus::Result<()>;
    fn reconnect(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn current_network(&self) -> zbus::Result<OwnedObjectPath>;

    /// The daemon's own signal on the Interface object, distinct from
    /// `org.freedesktop.DBus.Properties`.
    #[zbus(signal)]
    fn properties_changed(&self, properties: HashMap<String, OwnedValue>) -> zbus::Result<()>;
}

#[proxy(
    interface = "fi.w1.wpa_supplicant1.Network",
    default_service = "fi.w1.wpa_supplicant1"
)]
trait WpaNetwork {
    #[zbus(property)]
    fn properties(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
}

/// wpa_supplicant system-bus client for one wireless interface.
pub struct WpaSupplicantDbus {
    connection: Connection,
    interface: String,
}

impl WpaSupplicantDbus {
    pub fn new(connection: Connection, interface: impl Into<String>) -> Self {
        WpaSupplicantDbus {
            connection,
            interface: interface.into(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    async fn interface_proxy(&self) -> Result<WpaInterfaceProxy<'static>> {
        let root = WpaSupplicantProxy::new(&self.connection).await?;
        let path = root.get_interface(&self.interface).await?;
        Ok(WpaInterfaceProxy::builder(&self.connection)
            .path(path)?
            .build()
            .await?)
    }

    /// SSID of the currently selected network, quotes stripped.
    pub async fn active_ssid(&self) -> Option<String> {
        let iface = self.interface_proxy().await.ok()?;
        let network_path = iface.current_network().await.ok()?;
        if network_path.as_str() == "/" {
            return None;
        }

        let network = WpaNetworkProxy::builder(&self.connection)
            .path(network_path)
            .ok()?
            .build()
            .await
            .ok()?;
        let properties = network.properties().await.ok()?;
        let ssid: String = properties.get("ssid")?.clone().try_into().ok()?;
        Some(ssid.trim_matches('"').to_string())
    }

    /// Registers the network with the running daemon (the persisted store is
    /// written separately).
    pub async fn add_network(&self, network: &WifiNetwork) -> Result<()> {
        let iface = self.interface_proxy().await?;

        let mut args: HashMap<String, OwnedValue> = HashMap::new();
        args.insert("ssid".into(), owned(network.ssid.trim_matches('"'))?);
        args.insert("psk".into(), owned(network.password.trim_matches('"'))?);
        args.insert("disabled".into(), owned(i32::from(!network.enabled))?);
        args.insert("priority".into(), owned(network.priority)?);

        iface.add_network(args).await?;
        Ok(())
    }

    /// Drops and re-establishes the association.
    pub async fn reset_wireless(&self) -> Result<()> {
        let iface = self.interface_proxy().await?;
        if let Err(error) = iface.disconnect().await {
            warn!(%error, "disconnect before reconnect failed");
        }
        iface.reconnect().await?;
        Ok(())
    }

    /// Stream of the daemon's `State` values (`scanning`, `associating`,
    /// `completed`, ...).
    pub async fn state_changes(&self) -> Result<BoxStream<'static, String>> {
        let iface = self.interface_proxy().await?;
        let stream = iface.receive_properties_changed().await?;

        Ok(Box::pin(stream.filter_map(|signal| async move {
            let args = signal.args().ok()?;
            let state: String = args.properties().get("State")?.clone().try_into().ok()?;
            Some(state)
        })))
    }
}

fn owned<'a, T: Into<Value<'a>>>(value: T) -> Result<OwnedValue> {
    OwnedValue::try_from(value.into())
        .map_err(|e| Error::Dbus(zbus::Error::Variant(e)))
}
