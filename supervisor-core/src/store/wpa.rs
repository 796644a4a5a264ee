use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{NetworkStore, WifiNetwork};
use crate::util;
use crate::Result;

const NETWORK_START: &str = "network={";
const NETWORK_END: &str = "}";

/// The wpa_supplicant.conf credential store: a fixed preamble followed by
/// `network={...}` blocks. SSIDs and PSKs are normalized to quoted form on
/// write and stripped on read.
pub struct WpaSupplicantStore {
    country: String,
    config_file: PathBuf,
}

impl WpaSupplicantStore {
    pub fn new(country: impl Into<String>, config_file: impl Into<PathBuf>) -> Self {
        WpaSupplicantStore {
            country: country.into(),
            config_file: config_file.into(),
        }
    }

    pub fn at_default_path(country: impl Into<String>) -> Self {
        Self::new(country, "/etc/wpa_supplicant/wpa_supplicant.conf")
    }

    fn preamble(&self) -> Vec<String> {
        vec![
            "ctrl_interface=/run/wpa_supplicant".to_string(),
            "update_config=1".to_string(),
            "ap_scan=1".to_string(),
            "bgscan=\"\"".to_string(),
            format!("country={}", self.country),
        ]
    }

    fn parse(&self) -> Vec<WifiNetwork> {
        let content = match fs::read_to_string(&self.config_file) {
            Ok(content) => content,
            Err(_) => {
                warn!(file = %self.config_file.display(), "configuration file does not exist");
                return Vec::new();
            }
        };

        let mut networks: Vec<WifiNetwork> = Vec::new();
        let mut current: Option<WifiNetwork> = None;

        for line in content.lines().map(str::trim) {
            if line == NETWORK_START {
                current = Some(WifiNetwork {
                    ssid: String::new(),
                    password: String::new(),
                    enabled: true,
                    priority: 0,
                });
            } else if line == NETWORK_END {
                if let Some(network) = current.take() {
                    upsert(&mut networks, network);
                }
            } else if let Some(network) = current.as_mut() {
                if let Some((key, value)) = line.split_once('=') {
                    populate(network, key.trim(), value.trim());
                }
            }
        }

        networks
    }

    fn save(&self, networks: &[WifiNetwork]) -> Result<()> {
        let mut content = String::new();
        for line in self.preamble() {
            content.push_str(&line);
            content.push('\n');
        }

        for network in networks {
            content.push_str(&format!(
                "\n{NETWORK_START}\n\tssid={}\n\tpsk={}\n\tdisabled={}\n\tpriority={}\n{NETWORK_END}\n",
                quote(&network.ssid),
                quote(&network.password),
                i32::from(!network.enabled),
                network.priority,
            ));
        }

        util::create_file(&self.config_file, &content)
    }
}

impl NetworkStore for WpaSupplicantStore {
    fn config_file(&self) -> &Path {
        &self.config_file
    }

    fn get(&self, ssid: &str) -> Option<WifiNetwork> {
        let ssid = unquote(ssid);
        self.parse().into_iter().find(|n| n.ssid == ssid)
    }

    fn list(&self) -> Vec<WifiNetwork> {
        self.parse()
    }

    fn add(&self, network: &WifiNetwork) -> Result<()> {
        let mut networks = self.parse();
        let mut network = network.clone();
        network.ssid = unquote(&network.ssid).to_string();
        network.password = unquote(&network.password).to_string();
        upsert(&mut networks, network);
        self.save(&networks)
    }

    fn remove(&self, ssid: &str) -> Result<()> {
        let ssid = unquote(ssid);
        let mut networks = self.parse();
        networks.retain(|n| n.ssid != ssid);
        self.save(&networks)
    }

    fn needs_reconcile(&self) -> bool {
        let preamble = self.preamble();
        let lines: Vec<&str> = preamble.iter().map(String::as_str).collect();
        !util::file_contains_sequence(&self.config_file, &lines)
    }

    fn reconcile(&self) -> Result<()> {
        self.save(&self.parse())
    }
}

fn upsert(networks: &mut Vec<WifiNetwork>, network: WifiNetwork) {
    match networks.iter_mut().find(|n| n.ssid == network.ssid) {
        Some(existing) => *existing = network,
        None => networks.push(network),
    }
}

fn populate(network: &mut WifiNetwork, key: &str, value: &str) {
    match key {
        "ssid" => network.ssid = unquote(value).to_string(),
        "psk" => network.password = unquote(value).to_string(),
        "disabled" => network.enabled = value.trim() != "1",
        "priority" => network.priority = value.trim().parse().unwrap_or(0),
        _ => {}
    }
}

fn quote(value: &str) -> String {
    if value.starts_with('"') {
        value.to_string()
    } else {
        format!("\"{value}\"")
    }
}

fn unquote(value: &str) -> &str {
    value.trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> WpaSupplicantStore {
        WpaSupplicantStore::new("HU", dir.path().join("wpa_supplicant.conf"))
    }

    fn network(ssid: &str, password: &str) -> WifiNetwork {
        WifiNetwork {
            ssid: ssid.to_string(),
            password: password.to_string(),
            enabled: true,
            priority: 0,
        }
    }

    #[test]
    fn added_network_is_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.add(&network("home", "secret-pass")).unwrap();

        assert_eq!(store.list(), vec![network("home", "secret-pass")]);
        assert_eq!(store.get("home"), Some(network("home", "secret-pass")));
        assert_eq!(store.get("\"home\""), Some(network("home", "secret-pass")));
    }

    #[test]
    fn adding_same_ssid_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.add(&network("home", "first-pass")).unwrap();
        store.add(&network("home", "second-pass")).unwrap();
        store.add(&network("office", "other-pass")).unwrap();

        let networks = store.list();
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0], network("home", "second-pass"));
    }

    #[test]
    fn written_file_quotes_credentials_and_keeps_preamble() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.add(&network("home", "secret-pass")).unwrap();

        let content = fs::read_to_string(store.config_file()).unwrap();
        assert!(content.starts_with("ctrl_interface=/run/wpa_supplicant\n"));
        assert!(content.contains("country=HU"));
        assert!(content.contains("ssid=\"home\""));
        assert!(content.contains("psk=\"secret-pass\""));
        assert!(content.contains("disabled=0"));
        assert!(!store.needs_reconcile());
    }

    #[test]
    fn disabled_flag_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut net = network("home", "secret-pass");
        net.enabled = false;
        net.priority = 3;
        store.add(&net).unwrap();

        assert_eq!(store.list(), vec![net]);
    }

    #[test]
    fn country_change_requires_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wpa_supplicant.conf");

        let old = WpaSupplicantStore::new("HU", &path);
        old.add(&network("home", "secret-pass")).unwrap();

        let new = WpaSupplicantStore::new("DE", &path);
        assert!(new.needs_reconcile());

        new.reconcile().unwrap();
        assert!(!new.needs_reconcile());
        assert_eq!(new.list(), vec![network("home", "secret-pass")]);
    }

    #[test]
    fn remove_deletes_only_matching_ssid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.add(&network("home", "secret-pass")).unwrap();
        store.add(&network("office", "other-pass")).unwrap();
        store.remove("home").unwrap();

        assert_eq!(store.list(), vec![network("office", "other-pass")]);
    }
}
