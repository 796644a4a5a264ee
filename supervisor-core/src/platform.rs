use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::{Error, Result};

/// OS-level primitives the supervisors depend on. Everything here is
/// process-global mutable state (interface addresses, NAT rules), so only the
/// supervisor owning the mode in effect should mutate through it.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Debian release number from `/etc/debian_version`.
    async fn platform_version(&self) -> Result<f64>;

    async fn enable_wlan_interfaces(&self) -> Result<()>;

    async fn wlan_interfaces(&self) -> Vec<String>;

    async fn set_wlan_power_save(&self, interface: &str, enable: bool) -> Result<()>;

    async fn hostname(&self) -> Result<String>;

    async fn cpu_serial(&self) -> Result<String>;

    async fn mac_address(&self, interface: &str) -> String;

    async fn ip_address(&self, interface: &str) -> String;

    async fn set_ip_address(&self, interface: &str, ip_address: &str) -> Result<()>;

    async fn flush_ip_addresses(&self, interface: &str) -> Result<()>;

    /// Installs the captive-portal NAT rules: TCP/80 from the hotspot /24 is
    /// redirected to `destination_host`, outbound traffic is masqueraded.
    async fn set_up_ip_tables(&self, ip_address: &str, destination_host: &str) -> Result<()>;

    async fn clean_up_ip_tables(&self) -> Result<()>;

    /// Runs a shell line, returning stdout. Non-zero exit is an error.
    async fn execute_command(&self, command: &str) -> Result<String>;

    async fn ping_default_gateway(&self, timeout_s: u64) -> bool;

    /// Pings `x.y.z.1` derived from the first `tun*` interface address.
    /// Vacuously true when no tunnel interface exists.
    async fn ping_tunnel_endpoint(&self, timeout_s: u64) -> bool;
}

pub struct LinuxPlatform {
    version_file: PathBuf,
}

impl LinuxPlatform {
    pub fn new() -> Self {
        LinuxPlatform {
            version_file: PathBuf::from("/etc/debian_version"),
        }
    }

    fn interfaces() -> Vec<String> {
        let Ok(entries) = fs::read_dir("/sys/class/net") else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    async fn ping(&self, target: &str, timeout_s: u64) -> bool {
        Command::new("ping")
            .args(["-c", "1", "-W", &timeout_s.to_string(), target])
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn default_gateway(&self) -> Option<String> {
        let output = Command::new("ip")
            .args(["route", "show", "default"])
            .output()
            .await
            .ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // "default via 192.168.1.1 dev wlan0 ..."
        let mut fields = stdout.split_whitespace();
        while let Some(field) = fields.next() {
            if field == "via" {
                return fields.next().map(str::to_string);
            }
        }
        None
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for LinuxPlatform {
    async fn platform_version(&self) -> Result<f64> {
        let content = fs::read_to_string(&self.version_file)?;
        content
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("unparsable Debian version: {content:?}")))
    }

    async fn enable_wlan_interfaces(&self) -> Result<()> {
        self.execute_command("rfkill unblock wlan").await?;
        Ok(())
    }

    async fn wlan_interfaces(&self) -> Vec<String> {
        Self::interfaces()
            .into_iter()
            .filter(|name| name.starts_with("wl"))
            .collect()
    }

    async fn set_wlan_power_save(&self, interface: &str, enable: bool) -> Result<()> {
        let value = if enable { "on" } else { "off" };
        self.execute_command(&format!("iw dev {interface} set power_save {value}"))
            .await?;
        Ok(())
    }

    async fn hostname(&self) -> Result<String> {
        Ok(fs::read_to_string("/proc/sys/kernel/hostname")?.trim().to_string())
    }

    async fn cpu_serial(&self) -> Result<String> {
        let raw = fs::read_to_string("/sys/firmware/devicetree/base/serial-number")?;
        let serial = raw.trim_matches(['\0', '\n', ' ']);
        let tail = serial.len().saturating_sub(8);
        Ok(serial[tail..].to_string())
    }

    async fn mac_address(&self, interface: &str) -> String {
        fs::read_to_string(format!("/sys/class/net/{interface}/address"))
            .map(|mac| mac.trim().to_string())
            .unwrap_or_default()
    }

    async fn ip_address(&self, interface: &str) -> String {
        let output = Command::new("ip")
            .args(["-4", "-o", "addr", "show", "dev", interface])
            .output()
            .await;
        let Ok(output) = output else {
            return String::new();
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        // "2: wlan0    inet 192.168.1.5/24 brd ..."
        stdout
            .split_whitespace()
            .skip_while(|field| *field != "inet")
            .nth(1)
            .and_then(|cidr| cidr.split('/').next())
            .unwrap_or_default()
            .to_string()
    }

    async fn set_ip_address(&self, interface: &str, ip_address: &str) -> Result<()> {
        self.execute_command(&format!(
            "ifconfig {interface} {ip_address} netmask 255.255.255.0"
        ))
        .await?;

        if self.ip_address(interface).await != ip_address {
            return Err(Error::CommandFailed(format!(
                "failed to set IP address {ip_address} on interface {interface}"
            )));
        }
        Ok(())
    }

    async fn flush_ip_addresses(&self, interface: &str) -> Result<()> {
        self.execute_command(&format!("ip addr flush dev {interface}"))
            .await?;
        Ok(())
    }

    async fn set_up_ip_tables(&self, ip_address: &str, destination_host: &str) -> Result<()> {
        let source_range = subnet_of(ip_address);
        self.execute_command(&format!(
            "iptables -t nat -A PREROUTING -s {source_range} -p tcp -m tcp --dport 80 \
             -j DNAT --to-destination {destination_host}"
        ))
        .await?;
        self.execute_command("iptables -t nat -A POSTROUTING -j MASQUERADE")
            .await?;
        Ok(())
    }

    async fn clean_up_ip_tables(&self) -> Result<()> {
        self.execute_command("iptables -t nat -F && iptables -t nat -X")
            .await?;
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> Result<String> {
        info!(command, "executing command");
        let output = Command::new("sh").args(["-c", command]).output().await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(command, %stderr, "error executing command");
            Err(Error::CommandFailed(format!("{command}: {}", stderr.trim())))
        }
    }

    async fn ping_default_gateway(&self, timeout_s: u64) -> bool {
        match self.default_gateway().await {
            Some(gateway) => self.ping(&gateway, timeout_s).await,
            None => {
                debug!("no default gateway present");
                false
            }
        }
    }

    async fn ping_tunnel_endpoint(&self, timeout_s: u64) -> bool {
        let tunnel = Self::interfaces()
            .into_iter()
            .find(|name| name.starts_with("tun"));
        let Some(tunnel) = tunnel else {
            return true;
        };

        let address = self.ip_address(&tunnel).await;
        if address.is_empty() {
            return true;
        }

        match tunnel_endpoint_of(&address) {
            Some(endpoint) => self.ping(&endpoint, timeout_s).await,
            None => true,
        }
    }
}

/// `192.168.100.1` -> `192.168.100.0/24`
fn subnet_of(ip_address: &str) -> String {
    let mut octets: Vec<&str> = ip_address.split('.').collect();
    if octets.len() == 4 {
        octets[3] = "0";
        format!("{}/24", octets.join("."))
    } else {
        format!("{ip_address}/24")
    }
}

/// `10.8.0.6` -> `10.8.0.1`
fn tunnel_endpoint_of(address: &str) -> Option<String> {
    let octets: Vec<&str> = address.split('.').collect();
    if octets.len() == 4 {
        Some(format!("{}.{}.{}.1", octets[0], octets[1], octets[2]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_is_derived_from_hotspot_ip() {
        assert_eq!(subnet_of("192.168.100.1"), "192.168.100.0/24");
    }

    #[test]
    fn tunnel_endpoint_replaces_last_octet() {
        assert_eq!(tunnel_endpoint_of("10.8.0.6"), Some("10.8.0.1".to_string()));
        assert_eq!(tunnel_endpoint_of("bogus"), None);
    }
}
