use std::sync::Arc;

use tracing::{info, warn};

use crate::platform::Platform;
use crate::{Error, Result};

/// Picks the wireless interface the daemon supervises. The configured name
/// wins when present; otherwise the first available `wl*` interface is used.
pub struct WlanInterfaceSelector {
    platform: Arc<dyn Platform>,
}

impl WlanInterfaceSelector {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        WlanInterfaceSelector { platform }
    }

    pub async fn select(&self, interface: &str) -> Result<String> {
        self.platform.enable_wlan_interfaces().await?;

        let interfaces = self.platform.wlan_interfaces().await;
        if interfaces.is_empty() {
            return Err(Error::InvalidConfig(
                "no wireless interfaces found".to_string(),
            ));
        }

        if interfaces.iter().any(|i| i == interface) {
            info!(?interfaces, selected = interface, "selected specified interface");
            Ok(interface.to_string())
        } else {
            let selected = interfaces[0].clone();
            warn!(
                ?interfaces,
                specified = interface,
                %selected,
                "specified interface not found, using first available"
            );
            Ok(selected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockPlatform;

    #[tokio::test]
    async fn selects_configured_interface_when_present() {
        let platform = Arc::new(MockPlatform::with_interfaces(&["wlan0", "wlan1"]));
        let selector = WlanInterfaceSelector::new(platform);

        assert_eq!(selector.select("wlan1").await.unwrap(), "wlan1");
    }

    #[tokio::test]
    async fn falls_back_to_first_available() {
        let platform = Arc::new(MockPlatform::with_interfaces(&["wlan0"]));
        let selector = WlanInterfaceSelector::new(platform);

        assert_eq!(selector.select("wlan7").await.unwrap(), "wlan0");
    }

    #[tokio::test]
    async fn errors_when_no_wireless_interface_exists() {
        let platform = Arc::new(MockPlatform::with_interfaces(&[]));
        let selector = WlanInterfaceSelector::new(platform);

        assert!(selector.select("wlan0").await.is_err());
    }
}
