use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{error, info};

use super::{
    client_state_event, ServiceCore, ServiceDependencies, Supervisor, WifiClientService,
    WifiService, CLIENT_STATE_EVENTS,
};
use crate::event::{EventData, WifiEvent};
use crate::store::{NetworkStore, WifiNetwork};
use crate::wpa_dbus::WpaSupplicantDbus;
use crate::Result;

const UNIT_PATH: &str = "/org/freedesktop/systemd1/unit/wpa_5fsupplicant_2eservice";

/// wpa_supplicant supervisor: the Debian 11 client variant. Unit lifecycle
/// runs through systemd; association state comes from the daemon's own
/// `State` property signal.
pub struct WpaSupplicantService {
    core: ServiceCore,
    store: Arc<dyn NetworkStore>,
    dbus: Arc<WpaSupplicantDbus>,
    dhcp_client: Arc<dyn Supervisor>,
    service_file: PathBuf,
    run_file: PathBuf,
    exec_start: String,
}

impl WpaSupplicantService {
    pub fn new(
        deps: ServiceDependencies,
        store: Arc<dyn NetworkStore>,
        dbus: Arc<WpaSupplicantDbus>,
        dhcp_client: Arc<dyn Supervisor>,
    ) -> Arc<Self> {
        Self::with_paths(
            deps,
            store,
            dbus,
            dhcp_client,
            "/lib/systemd/system/wpa_supplicant.service",
            "/run/wpa_supplicant",
        )
    }

    pub fn with_paths(
        deps: ServiceDependencies,
        store: Arc<dyn NetworkStore>,
        dbus: Arc<WpaSupplicantDbus>,
        dhcp_client: Arc<dyn Supervisor>,
        service_file: impl Into<PathBuf>,
        run_dir: impl AsRef<Path>,
    ) -> Arc<Self> {
        let interface = dbus.interface().to_string();
        let exec_start = exec_start_line(&interface, run_dir.as_ref(), store.config_file());
        Arc::new(WpaSupplicantService {
            core: ServiceCore::new("wpa_supplicant", UNIT_PATH, deps),
            store,
            dbus,
            dhcp_client,
            service_file: service_file.into(),
            run_file: run_dir.as_ref().join(&interface),
            exec_start,
        })
    }
}

#[async_trait]
impl Supervisor for WpaSupplicantService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn supported_events(&self) -> Vec<WifiEvent> {
        let mut events = vec![
            WifiEvent::ClientDisabled,
            WifiEvent::ClientInactive,
            WifiEvent::ClientScanning,
            WifiEvent::ClientConnecting,
            WifiEvent::ClientConnected,
            WifiEvent::ClientDisconnected,
        ];
        events.extend(CLIENT_STATE_EVENTS);
        events
    }

    fn map_unit_state(&self, state: &str) -> Option<WifiEvent> {
        client_state_event(state)
    }

    async fn prepare_start(&self) -> Result<()> {
        crate::util::delete_file(&self.run_file)?;
        self.dhcp_client.clone().start().await
    }

    async fn need_config_setup(&self) -> Result<bool> {
        Ok(!crate::util::file_contains_line(&self.service_file, &self.exec_start)
            || self.store.needs_reconcile())
    }

    async fn setup_config(&self) -> Result<()> {
        if !crate::util::file_contains_line(&self.service_file, &self.exec_start) {
            info!(file = %self.service_file.display(), "updating service file");
            update_exec_start(&self.service_file, &self.exec_start)?;
            self.core.systemd().reload_daemon().await?;
        }

        if self.store.needs_reconcile() {
            info!(file = %self.store.config_file().display(), "updating config file");
            self.store.reconcile()?;
        }
        Ok(())
    }

    async fn setup_custom_events(self: Arc<Self>) -> Result<()> {
        let mut states = self.dbus.state_changes().await?;
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(state) = states.next().await {
                if let Some(event) = supplicant_state_event(&state) {
                    this.execute_callback(event, EventData::default()).await;
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl WifiService for WpaSupplicantService {
    fn interface(&self) -> &str {
        self.dbus.interface()
    }
}

#[async_trait]
impl WifiClientService for WpaSupplicantService {
    async fn connected_ssid(&self) -> Option<String> {
        self.dbus.active_ssid().await
    }

    fn network_count(&self) -> usize {
        self.store.list().len()
    }

    fn networks(&self) -> Vec<WifiNetwork> {
        self.store.list()
    }

    async fn add_network(&self, network: &WifiNetwork) -> Result<()> {
        if self.is_active().await {
            if let Err(error) = self.dbus.add_network(network).await {
                error!(%error, "failed to register network with running supplicant");
            }
        }
        self.store.add(network)
    }

    async fn reset_wireless(&self) -> Result<()> {
        self.dbus.reset_wireless().await
    }
}

fn exec_start_line(interface: &str, run_dir: &Path, config_file: &Path) -> String {
    format!(
        "ExecStart=/sbin/wpa_supplicant -u -s -O {} -i{interface} -c{}",
        run_dir.display(),
        config_file.display()
    )
}

/// Replaces the unit file's ExecStart line in place.
fn update_exec_start(service_file: &Path, exec_start: &str) -> Result<()> {
    let content = fs::read_to_string(service_file)?;
    let updated: String = content
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("ExecStart=") {
                exec_start
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(service_file, updated + "\n")?;
    Ok(())
}

/// wpa_supplicant `State` property values mapped to events.
fn supplicant_state_event(state: &str) -> Option<WifiEvent> {
    match state {
        "interface_disabled" => Some(WifiEvent::ClientDisabled),
        "inactive" => Some(WifiEvent::ClientInactive),
        "scanning" => Some(WifiEvent::ClientScanning),
        "associating" => Some(WifiEvent::ClientConnecting),
        "completed" => Some(WifiEvent::ClientConnected),
        "disconnected" => Some(WifiEvent::ClientDisconnected),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supplicant_states_map_to_client_events() {
        assert_eq!(
            supplicant_state_event("scanning"),
            Some(WifiEvent::ClientScanning)
        );
        assert_eq!(
            supplicant_state_event("associating"),
            Some(WifiEvent::ClientConnecting)
        );
        assert_eq!(
            supplicant_state_event("completed"),
            Some(WifiEvent::ClientConnected)
        );
        assert_eq!(supplicant_state_event("4way_handshake"), None);
    }

    #[test]
    fn exec_start_names_interface_and_config() {
        let line = exec_start_line(
            "wlan0",
            Path::new("/run/wpa_supplicant"),
            Path::new("/etc/wpa_supplicant/wpa_supplicant.conf"),
        );
        assert_eq!(
            line,
            "ExecStart=/sbin/wpa_supplicant -u -s -O /run/wpa_supplicant \
             -iwlan0 -c/etc/wpa_supplicant/wpa_supplicant.conf"
        );
    }

    #[test]
    fn exec_start_line_is_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let service_file = dir.path().join("wpa_supplicant.service");
        fs::write(
            &service_file,
            "[Unit]\nDescription=WPA supplicant\n\n[Service]\n\
             ExecStart=/sbin/wpa_supplicant -u -s -O /run/wpa_supplicant\n",
        )
        .unwrap();

        let expected = exec_start_line(
            "wlan0",
            Path::new("/run/wpa_supplicant"),
            Path::new("/etc/wpa_supplicant/wpa_supplicant.conf"),
        );
        update_exec_start(&service_file, &expected).unwrap();

        assert!(crate::util::file_contains_line(&service_file, &expected));
        let content = fs::read_to_string(&service_file).unwrap();
        assert!(content.contains("Description=WPA supplicant"));
        assert_eq!(content.matches("ExecStart=").count(), 1);
    }
}
