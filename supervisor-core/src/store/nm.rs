use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use super::{NetworkStore, WifiNetwork};
use crate::Result;

const NETWORK_FILE_EXTENSION: &str = "nmconnection";

/// NetworkManager keyfile store: one `<ssid>.nmconnection` per network under
/// `system-connections/`, mode 0600. NetworkManager owns its global config,
/// so there is nothing to reconcile.
pub struct NetworkManagerStore {
    interface: String,
    network_dir: PathBuf,
}

impl NetworkManagerStore {
    pub fn new(interface: impl Into<String>, network_dir: impl Into<PathBuf>) -> Self {
        NetworkManagerStore {
            interface: interface.into(),
            network_dir: network_dir.into(),
        }
    }

    pub fn at_default_path(interface: impl Into<String>) -> Self {
        Self::new(interface, "/etc/NetworkManager/system-connections")
    }

    fn network_file(&self, ssid: &str) -> PathBuf {
        self.network_dir
            .join(format!("{ssid}.{NETWORK_FILE_EXTENSION}"))
    }

    fn read_network(path: &Path) -> Option<WifiNetwork> {
        let keyfile = Keyfile::load(path).ok()?;
        Some(WifiNetwork {
            ssid: keyfile.get("wifi", "ssid")?.to_string(),
            password: keyfile.get("wifi-security", "psk").unwrap_or_default().to_string(),
            enabled: keyfile.get("connection", "autoconnect").is_none_or(|v| v == "true"),
            priority: keyfile
                .get("connection", "autoconnect-priority")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }
}

impl NetworkStore for NetworkManagerStore {
    fn config_file(&self) -> &Path {
        &self.network_dir
    }

    fn get(&self, ssid: &str) -> Option<WifiNetwork> {
        let path = self.network_file(ssid);
        path.exists().then(|| Self::read_network(&path)).flatten()
    }

    fn list(&self) -> Vec<WifiNetwork> {
        let entries = match fs::read_dir(&self.network_dir) {
            Ok(entries) => entries,
            Err(_) => {
                warn!(dir = %self.network_dir.display(), "network directory does not exist");
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == NETWORK_FILE_EXTENSION)
            })
            .collect();
        paths.sort();

        paths
            .iter()
            .filter_map(|path| Self::read_network(path))
            .collect()
    }

    fn add(&self, network: &WifiNetwork) -> Result<()> {
        let path = self.network_file(&network.ssid);
        let enabled = network.enabled.to_string();
        let priority = network.priority.to_string();

        let mut keyfile = if path.exists() {
            info!(ssid = %network.ssid, file = %path.display(), "updating existing network configuration");
            Keyfile::load(&path)?
        } else {
            info!(ssid = %network.ssid, file = %path.display(), "creating new network configuration");
            let mut keyfile = Keyfile::default();
            keyfile.set("connection", "uuid", Uuid::new_v4().to_string());
            keyfile.set("connection", "type", "wifi");
            keyfile.set("connection", "interface-name", &self.interface);
            keyfile.set("wifi", "mode", "infrastructure");
            keyfile.set("wifi-security", "key-mgmt", "wpa-psk");
            keyfile.set("ipv4", "method", "auto");
            keyfile.set("ipv6", "method", "disabled");
            keyfile
        };

        keyfile.set("connection", "id", &network.ssid);
        keyfile.set("connection", "autoconnect", enabled);
        keyfile.set("connection", "autoconnect-priority", priority);
        keyfile.set("wifi", "ssid", &network.ssid);
        keyfile.set("wifi-security", "psk", &network.password);

        keyfile.save(&path)
    }

    fn remove(&self, ssid: &str) -> Result<()> {
        crate::util::delete_file(self.network_file(ssid))
    }

    fn needs_reconcile(&self) -> bool {
        false
    }

    fn reconcile(&self) -> Result<()> {
        Ok(())
    }
}

/// Minimal keyfile (INI) document preserving section order.
#[derive(Default)]
struct Keyfile {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Keyfile {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut sections: Vec<(String, Vec<(String, String)>)> = Vec::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                sections.push((name.to_string(), Vec::new()));
            } else if let Some((key, value)) = line.split_once('=') {
                if let Some((_, entries)) = sections.last_mut() {
                    entries.push((key.trim().to_string(), value.trim().to_string()));
                }
            }
        }

        Ok(Keyfile { sections })
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)?
            .1
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let entries = match self.sections.iter_mut().find(|(name, _)| name == section) {
            Some((_, entries)) => entries,
            None => {
                self.sections
                    .push((section.to_string(), vec![(key.to_string(), value.into())]));
                return;
            }
        };
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.into(),
            None => entries.push((key.to_string(), value.into())),
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let mut content = String::new();
        for (name, entries) in &self.sections {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&format!("[{name}]\n"));
            for (key, value) in entries {
                content.push_str(&format!("{key}={value}\n"));
            }
        }

        crate::util::create_file(path, &content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}
