use std::time::Duration;

use futures_util::stream::{BoxStream, StreamExt};
use tracing::{info, warn};
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;
use zbus_macros::proxy;

use crate::{Error, Result};

/// NetworkManager device state codes, mapped to events in the supervisor.
pub mod device_state {
    pub const UNKNOWN: u32 = 0;
    pub const UNMANAGED: u32 = 10;
    pub const UNAVAILABLE: u32 = 20;
    pub const DISCONNECTED: u32 = 30;
    pub const PREPARE: u32 = 40;
    pub const CONFIG: u32 = 50;
    pub const IP_CONFIG: u32 = 70;
    pub const IP_CHECK: u32 = 80;
    pub const ACTIVATED: u32 = 100;
    pub const DEACTIVATING: u32 = 110;
    pub const FAILED: u32 = 120;
}

#[proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
trait NetworkManager {
    fn get_device_by_ip_iface(&self, iface: &str) -> zbus::Result<OwnedObjectPath>;

    #[zbus(property)]
    fn wireless_enabled(&self) -> zbus::Result<bool>;
    #[zbus(property)]
    fn set_wireless_enabled(&self, value: bool) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.NetworkManager.Device",
    default_service = "org.freedesktop.NetworkManager"
)]
trait NmDevice {
    fn disconnect(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn state_changed(&self, new_state: u32, old_state: u32, reason: u32) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.NetworkManager.Device.Wireless",
    default_service = "org.freedesktop.NetworkManager"
)]
trait NmWirelessDevice {
    #[zbus(property)]
    fn active_access_point(&self) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(
    interface = "org.freedesktop.NetworkManager.AccessPoint",
    default_service = "org.freedesktop.NetworkManager"
)]
trait NmAccessPoint {
    #[zbus(property)]
    fn ssid(&self) -> zbus::Result<Vec<u8>>;
}

/// NetworkManager system-bus client for one wireless device.
pub struct NetworkManagerDbus {
    connection: Connection,
    interface: String,
    retry_delay: Duration,
}

impl NetworkManagerDbus {
    /// Attempts before giving up on the wlan device appearing on the bus.
    const DEVICE_RETRY_LIMIT: u32 = 30;

    pub fn new(
        connection: Connection,
        interface: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        NetworkManagerDbus {
            connection,
            interface: interface.into(),
            retry_delay,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    async fn device_path(&self) -> Result<OwnedObjectPath> {
        let nm = NetworkManagerProxy::new(&self.connection).await?;
        Ok(nm.get_device_by_ip_iface(&self.interface).await?)
    }

    /// The wlan device may register on the bus noticeably after the daemon's
    /// unit reports active, so the lookup retries with a fixed backoff.
    pub async fn wait_for_device(&self) -> Result<OwnedObjectPath> {
        for attempt in 1..=Self::DEVICE_RETRY_LIMIT {
            match self.device_path().await {
                Ok(path) => {
                    info!(interface = %self.interface, "wlan device present");
                    return Ok(path);
                }
                Err(error) => {
                    warn!(
                        interface = %self.interface,
                        attempt,
                        %error,
                        "wlan device not available yet, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
        Err(Error::CommandFailed(format!(
            "wlan device {} did not appear on NetworkManager",
            self.interface
        )))
    }

    /// Stream of device state codes (`device_state::*`).
    pub async fn state_changes(&self) -> Result<BoxStream<'static, u32>> {
        let path = self.wait_for_device().await?;
        let device = NmDeviceProxy::builder(&self.connection)
            .path(path)?
            .build()
            .await?;

        let stream = device.receive_state_changed().await?;
        Ok(Box::pin(stream.filter_map(|signal| async move {
            signal.args().ok().map(|args| *args.new_state())
        })))
    }

    pub async fn active_ssid(&self) -> Option<String> {
        let path = self.device_path().await.ok()?;
        let wireless = NmWirelessDeviceProxy::builder(&self.connection)
            .path(path)
            .ok()?
            .build()
            .await
            .ok()?;

        let ap_path = wireless.active_access_point().await.ok()?;
        if ap_path.as_str() == "/" {
            return None;
        }

        let ap = NmAccessPointProxy::builder(&self.connection)
            .path(ap_path)
            .ok()?
            .build()
            .await
            .ok()?;
        let ssid = ap.ssid().await.ok()?;
        String::from_utf8(ssid).ok()
    }

    pub async fn enable_wireless(&self) -> Result<()> {
        let nm = NetworkManagerProxy::new(&self.connection).await?;
        if !nm.wireless_enabled().await? {
            info!("enabling wireless radio");
            nm.set_wireless_enabled(true).await?;
        }
        Ok(())
    }

    /// Drops the device's association; autoconnect re-establishes it.
    pub async fn reset_wireless(&self) -> Result<()> {
        let path = self.device_path().await?;
        let device = NmDeviceProxy::builder(&self.connection)
            .path(path)?
            .build()
            .await?;
        device.disconnect().await?;
        Ok(())
    }
}
