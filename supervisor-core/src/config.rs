use tracing::warn;

use crate::{Error, Result};

/// Daemon settings. Precedence: CLI flag > config file > these defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_file: Option<String>,
    pub log_level: String,

    pub api_server_port: u16,

    pub device_role: String,
    /// `{{var}}` pattern over `device_role`, `cpu_serial`, `mac_address`.
    pub device_hostname: String,

    pub wlan_interface: String,
    pub wlan_country: String,
    pub wlan_disable_power_save: bool,
    pub wlan_disable_roaming: bool,

    pub control_switch_fail_limit: u32,
    pub control_switch_fail_command: String,

    pub client_timeout: u64,
    pub client_restart_delay: u64,

    pub hotspot_password: String,
    pub hotspot_peer_timeout: u64,
    pub hotspot_static_ip: String,
    pub hotspot_dhcp_range: String,
    pub hotspot_startup_delay: u64,

    pub connection_ping_interval: u64,
    pub connection_ping_timeout: u64,
    pub connection_ping_fail_limit: u32,
    /// One restore action per line: `reset-wireless`, `restart-service <glob>`
    /// or `execute-command <shell line>`.
    pub connection_restore_actions: Vec<String>,

    pub identify_pin_gpio_number: u32,
    pub identify_pin_active_high: bool,
    pub identify_pin_initial_value: bool,
    pub identify_blink_frequency: f64,
    pub identify_blink_interval: f64,
    pub identify_blink_pause: f64,
    pub identify_blink_count: u32,

    /// Commands offered on the diagnostic execution page.
    pub web_execute_commands: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log_file: None,
            log_level: "info".to_string(),
            api_server_port: 8080,
            device_role: "edge".to_string(),
            device_hostname: "er-{{device_role}}-{{cpu_serial}}".to_string(),
            wlan_interface: "wlan0".to_string(),
            wlan_country: "HU".to_string(),
            wlan_disable_power_save: false,
            wlan_disable_roaming: false,
            control_switch_fail_limit: 5,
            control_switch_fail_command: "reboot".to_string(),
            client_timeout: 15,
            client_restart_delay: 5,
            hotspot_password: "p4ssw0rd".to_string(),
            hotspot_peer_timeout: 120,
            hotspot_static_ip: "192.168.100.1".to_string(),
            hotspot_dhcp_range: "192.168.100.2,192.168.100.254,255.255.255.0,2m".to_string(),
            hotspot_startup_delay: 5,
            connection_ping_interval: 60,
            connection_ping_timeout: 5,
            connection_ping_fail_limit: 5,
            connection_restore_actions: vec!["reset-wireless".to_string()],
            identify_pin_gpio_number: 12,
            identify_pin_active_high: true,
            identify_pin_initial_value: false,
            identify_blink_frequency: 440.0,
            identify_blink_interval: 0.5,
            identify_blink_pause: 0.5,
            identify_blink_count: 3,
            web_execute_commands: vec![
                "ip addr".to_string(),
                "iw dev".to_string(),
                "systemctl status hostapd".to_string(),
                "systemctl status dnsmasq".to_string(),
            ],
        }
    }
}

impl Settings {
    /// Overlays an INI-style document (single `[DEFAULT]` section, keys match
    /// the long CLI flag names with underscores). Indented lines continue the
    /// previous value.
    pub fn apply_ini(&mut self, content: &str) -> Result<()> {
        let mut pending: Option<(String, String)> = None;

        for raw_line in content.lines() {
            let line = raw_line.trim_end();
            let trimmed = line.trim_start();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            if trimmed.starts_with('[') {
                continue;
            }

            if line.starts_with(char::is_whitespace) {
                if let Some((_, value)) = pending.as_mut() {
                    value.push('\n');
                    value.push_str(trimmed);
                }
                continue;
            }

            if let Some((key, value)) = pending.take() {
                self.set(&key, &value)?;
            }

            match trimmed.split_once('=') {
                Some((key, value)) => {
                    pending = Some((
                        key.trim().to_lowercase().replace('-', "_"),
                        value.trim().to_string(),
                    ));
                }
                None => {
                    return Err(Error::InvalidConfig(format!(
                        "malformed configuration line: {trimmed:?}"
                    )));
                }
            }
        }

        if let Some((key, value)) = pending {
            self.set(&key, &value)?;
        }
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "log_file" => self.log_file = Some(value.to_string()),
            "log_level" => self.log_level = value.to_string(),
            "api_server_port" => self.api_server_port = parse(key, value)?,
            "device_role" => self.device_role = value.to_string(),
            "device_hostname" => self.device_hostname = value.to_string(),
            "wlan_interface" => self.wlan_interface = value.to_string(),
            "wlan_country" => self.wlan_country = value.to_string(),
            "wlan_disable_power_save" => self.wlan_disable_power_save = parse_bool(key, value)?,
            "wlan_disable_roaming" => self.wlan_disable_roaming = parse_bool(key, value)?,
            "control_switch_fail_limit" => self.control_switch_fail_limit = parse(key, value)?,
            "control_switch_fail_command" => {
                self.control_switch_fail_command = value.to_string();
            }
            "client_timeout" => self.client_timeout = parse(key, value)?,
            "client_restart_delay" => self.client_restart_delay = parse(key, value)?,
            "hotspot_password" => self.hotspot_password = value.to_string(),
            "hotspot_peer_timeout" => self.hotspot_peer_timeout = parse(key, value)?,
            "hotspot_static_ip" => self.hotspot_static_ip = value.to_string(),
            "hotspot_dhcp_range" => self.hotspot_dhcp_range = value.to_string(),
            "hotspot_startup_delay" => self.hotspot_startup_delay = parse(key, value)?,
            "connection_ping_interval" => self.connection_ping_interval = parse(key, value)?,
            "connection_ping_timeout" => self.connection_ping_timeout = parse(key, value)?,
            "connection_ping_fail_limit" => {
                self.connection_ping_fail_limit = parse(key, value)?;
            }
            "connection_restore_actions" => {
                self.connection_restore_actions = split_lines(value);
            }
            "identify_pin_gpio_number" => self.identify_pin_gpio_number = parse(key, value)?,
            "identify_pin_active_high" => self.identify_pin_active_high = parse_bool(key, value)?,
            "identify_pin_initial_value" => {
                self.identify_pin_initial_value = parse_bool(key, value)?;
            }
            "identify_blink_frequency" => self.identify_blink_frequency = parse(key, value)?,
            "identify_blink_interval" => self.identify_blink_interval = parse(key, value)?,
            "identify_blink_pause" => self.identify_blink_pause = parse(key, value)?,
            "identify_blink_count" => self.identify_blink_count = parse(key, value)?,
            "web_execute_commands" => self.web_execute_commands = split_lines(value),
            "config_file" => {}
            _ => {
                warn!(key, "ignoring unknown configuration key");
            }
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid value for {key}: {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig(format!(
            "invalid boolean for {key}: {value:?}"
        ))),
    }
}

fn split_lines(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
