use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::platform::Platform;
use crate::util;
use crate::Result;

const BLUETOOTH_DISABLE_CONFIG: &str = "dtoverlay=disable-bt";
const ROAMING_DISABLE_CONFIG: &str = "options brcmfmac roamoff=1";

/// Enforces the kernel/boot flags the wireless setup depends on: Bluetooth
/// off in the boot config, wlan power save per configuration, and the
/// brcmfmac roaming flag. Returns whether a reboot is needed to apply.
pub struct PlatformConfig {
    platform: Arc<dyn Platform>,
    interface: String,
    boot_config_file: PathBuf,
    driver_config_file: PathBuf,
}

impl PlatformConfig {
    pub fn new(
        platform: Arc<dyn Platform>,
        interface: impl Into<String>,
        boot_config_file: impl Into<PathBuf>,
    ) -> Self {
        PlatformConfig {
            platform,
            interface: interface.into(),
            boot_config_file: boot_config_file.into(),
            driver_config_file: PathBuf::from("/etc/modprobe.d/brcmfmac.conf"),
        }
    }

    /// Boot config location moved under /boot/firmware with Debian 12.
    pub fn boot_config_path(debian_12_or_higher: bool) -> &'static str {
        if debian_12_or_higher {
            "/boot/firmware/config.txt"
        } else {
            "/boot/config.txt"
        }
    }

    pub async fn setup(&self, disable_power_save: bool, disable_roaming: bool) -> Result<bool> {
        let mut need_reboot = false;
        info!("setting up platform config");

        if self.is_bluetooth_enabled() {
            info!(file = %self.boot_config_file.display(), "disabling Bluetooth in boot config");
            create_or_append(&self.boot_config_file, BLUETOOTH_DISABLE_CONFIG)?;
            need_reboot = true;
        } else {
            info!(file = %self.boot_config_file.display(), "Bluetooth is already disabled");
        }

        if disable_power_save {
            info!("disabling Wi-Fi power saving");
        } else {
            info!("enabling Wi-Fi power saving");
        }
        self.platform
            .set_wlan_power_save(&self.interface, !disable_power_save)
            .await?;

        let roaming_disabled =
            util::file_contains_line(&self.driver_config_file, ROAMING_DISABLE_CONFIG);

        if disable_roaming && !roaming_disabled {
            info!(file = %self.driver_config_file.display(), "disabling Wi-Fi roaming in driver config");
            create_or_append(&self.driver_config_file, ROAMING_DISABLE_CONFIG)?;
            need_reboot = true;
        } else if !disable_roaming && roaming_disabled {
            info!(file = %self.driver_config_file.display(), "removing Wi-Fi roaming flag from driver config");
            util::replace_in_file(
                &self.driver_config_file,
                &format!("{ROAMING_DISABLE_CONFIG}\n"),
                "",
            )?;
            need_reboot = true;
        }

        Ok(need_reboot)
    }

    fn is_bluetooth_enabled(&self) -> bool {
        !util::file_contains_line(&self.boot_config_file, BLUETOOTH_DISABLE_CONFIG)
    }
}

fn create_or_append(path: &Path, line: &str) -> Result<()> {
    if path.exists() {
        util::append_line(path, line)
    } else {
        util::create_file(path, &format!("{line}\n"))
    }
}
